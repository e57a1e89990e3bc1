// Relationship edges. Bulk insertion skips rows whose endpoints are missing
// (edges into files that failed extraction) instead of failing the batch.

use anyhow::Result;
use rusqlite::params;
use tracing::debug;

use crate::extractors::{Relationship, RelationshipColumns, RelationshipKind, UnresolvedEdge};

use super::SymbolDatabase;
use super::helpers::placeholders;

impl SymbolDatabase {
    pub fn add_relationships_batch(&mut self, columns: &RelationshipColumns) -> Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        let mut skipped = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO relationships
                 (from_symbol_id, to_symbol_id, kind, file_path, line_number, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for i in 0..columns.len() {
                let result = stmt.execute(params![
                    columns.from_symbol_ids[i],
                    columns.to_symbol_ids[i],
                    columns.kinds[i],
                    columns.file_paths[i],
                    columns.line_numbers[i],
                    columns.confidences[i],
                ]);
                match result {
                    Ok(_) => inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;

        if skipped > 0 {
            debug!(inserted, skipped, "relationship batch stored (missing endpoints skipped)");
        } else {
            debug!(inserted, "relationship batch stored");
        }
        Ok(inserted)
    }

    fn kinds_clause(kinds: &[RelationshipKind], offset: usize) -> (String, Vec<String>) {
        let names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let holes = (offset + 1..=offset + names.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        (holes, names)
    }

    /// Outgoing edges from a symbol, restricted to the given kinds.
    pub fn outgoing(&self, from_id: &str, kinds: &[RelationshipKind]) -> Result<Vec<Relationship>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let (holes, names) = Self::kinds_clause(kinds, 1);
        let query = format!(
            "SELECT from_symbol_id, to_symbol_id, kind, file_path, line_number, confidence
             FROM relationships
             WHERE from_symbol_id = ?1 AND kind IN ({holes})"
        );
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&from_id];
        for name in &names {
            params_vec.push(name);
        }
        let mut stmt = self.conn.prepare(&query)?;
        let edges = stmt
            .query_map(&params_vec[..], |row| self.row_to_relationship(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Incoming edges to a symbol, restricted to the given kinds.
    pub fn incoming(&self, to_id: &str, kinds: &[RelationshipKind]) -> Result<Vec<Relationship>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let (holes, names) = Self::kinds_clause(kinds, 1);
        let query = format!(
            "SELECT from_symbol_id, to_symbol_id, kind, file_path, line_number, confidence
             FROM relationships
             WHERE to_symbol_id = ?1 AND kind IN ({holes})"
        );
        let mut params_vec: Vec<&dyn rusqlite::ToSql> = vec![&to_id];
        for name in &names {
            params_vec.push(name);
        }
        let mut stmt = self.conn.prepare(&query)?;
        let edges = stmt
            .query_map(&params_vec[..], |row| self.row_to_relationship(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// All (from, to) pairs of the given kinds; the closure builder's input.
    pub fn edges_by_kinds(&self, kinds: &[RelationshipKind]) -> Result<Vec<(String, String)>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let query = format!(
            "SELECT from_symbol_id, to_symbol_id FROM relationships WHERE kind IN ({})",
            placeholders(names.len())
        );
        let refs: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
        let mut stmt = self.conn.prepare(&query)?;
        let pairs = stmt
            .query_map(&refs[..], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Edges into symbols of the given files from symbols OUTSIDE them. The
    /// scanner captures these before re-indexing a modified file and restores
    /// them afterwards; content-stable IDs mean they reattach whenever the
    /// target symbol survived the edit.
    pub fn inbound_edges_for_files(&self, paths: &[String]) -> Result<Vec<Relationship>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let holes = placeholders(paths.len());
        let query = format!(
            "SELECT r.from_symbol_id, r.to_symbol_id, r.kind, r.file_path, r.line_number, r.confidence
             FROM relationships r
             JOIN symbols t ON r.to_symbol_id = t.id
             JOIN symbols s ON r.from_symbol_id = s.id
             WHERE t.file_path IN ({holes})
               AND s.file_path NOT IN ({holes2})",
            holes = holes,
            holes2 = (paths.len() + 1..=paths.len() * 2)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut refs: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(paths.len() * 2);
        for path in paths {
            refs.push(path as &dyn rusqlite::ToSql);
        }
        for path in paths {
            refs.push(path as &dyn rusqlite::ToSql);
        }
        let mut stmt = self.conn.prepare(&query)?;
        let edges = stmt
            .query_map(&refs[..], |row| self.row_to_relationship(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Every edge with the files of both endpoints, for the architecture map.
    pub fn edges_with_files(&self) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s1.file_path, s2.file_path, r.kind
             FROM relationships r
             JOIN symbols s1 ON r.from_symbol_id = s1.id
             JOIN symbols s2 ON r.to_symbol_id = s2.id
             WHERE r.kind != 'contains'",
        )?;
        let edges = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Resolve edges whose target name was defined in some other file, by
    /// unique workspace-wide name match. Resolved edges are inserted;
    /// ambiguous or unknown names are dropped.
    pub fn resolve_edges(&mut self, unresolved: &[UnresolvedEdge]) -> Result<usize> {
        if unresolved.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut find = tx.prepare("SELECT id FROM symbols WHERE name = ?1 LIMIT 2")?;
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO relationships
                 (from_symbol_id, to_symbol_id, kind, file_path, line_number, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0.8)",
            )?;
            for edge in unresolved {
                let candidates: Vec<String> = find
                    .query_map([&edge.to_name], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                if candidates.len() != 1 || candidates[0] == edge.from_symbol_id {
                    continue;
                }
                let result = insert.execute(params![
                    edge.from_symbol_id,
                    candidates[0],
                    edge.kind.as_str(),
                    edge.file_path,
                    edge.line_number,
                ]);
                match result {
                    Ok(_) => inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;

        debug!(inserted, total = unresolved.len(), "resolved cross-file edges");
        Ok(inserted)
    }

    pub fn relationship_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::symbols::tests::{make_symbol, seed_file};
    use crate::extractors::SymbolColumns;

    fn edge(from: &str, to: &str) -> Relationship {
        Relationship {
            from_symbol_id: from.into(),
            to_symbol_id: to.into(),
            kind: RelationshipKind::Call,
            file_path: "a.py".into(),
            line_number: 2,
            confidence: 1.0,
        }
    }

    #[test]
    fn missing_endpoints_are_skipped_not_fatal() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "a.py");

        let alpha = make_symbol("alpha", "a.py", 0);
        let beta = make_symbol("beta", "a.py", 20);
        let mut symbols = SymbolColumns::default();
        symbols.push(&alpha);
        symbols.push(&beta);
        db.add_symbols_batch(&symbols).unwrap();

        let mut edges = RelationshipColumns::default();
        edges.push(&edge(&alpha.id, &beta.id));
        edges.push(&edge(&alpha.id, "missing-symbol"));
        let inserted = db.add_relationships_batch(&edges).unwrap();
        assert_eq!(inserted, 1);

        let outgoing = db.outgoing(&alpha.id, &[RelationshipKind::Call]).unwrap();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].to_symbol_id, beta.id);

        let incoming = db.incoming(&beta.id, &[RelationshipKind::Call]).unwrap();
        assert_eq!(incoming.len(), 1);
    }

    #[test]
    fn kind_filter_applies() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "a.py");

        let alpha = make_symbol("alpha", "a.py", 0);
        let beta = make_symbol("beta", "a.py", 20);
        let mut symbols = SymbolColumns::default();
        symbols.push(&alpha);
        symbols.push(&beta);
        db.add_symbols_batch(&symbols).unwrap();

        let mut edges = RelationshipColumns::default();
        let mut import = edge(&alpha.id, &beta.id);
        import.kind = RelationshipKind::Import;
        edges.push(&import);
        db.add_relationships_batch(&edges).unwrap();

        assert!(db.outgoing(&alpha.id, &[RelationshipKind::Call]).unwrap().is_empty());
        assert_eq!(
            db.outgoing(&alpha.id, &[RelationshipKind::Call, RelationshipKind::Import])
                .unwrap()
                .len(),
            1
        );
    }
}
