// Type intelligence queries backing fast_explore's types mode: who
// implements an interface, where a type sits in its hierarchy, and which
// functions produce or accept it.

use anyhow::Result;
use tracing::debug;

use crate::extractors::{RelationshipKind, Symbol};

use super::SymbolDatabase;
use super::helpers::SYMBOL_COLUMNS;

impl SymbolDatabase {
    /// Symbols with an `implements` edge to any symbol of the given name.
    pub fn implementations_of(&self, type_name: &str, limit: usize) -> Result<Vec<Symbol>> {
        let query = format!(
            "SELECT DISTINCT {} FROM symbols s
             INNER JOIN relationships r ON s.id = r.from_symbol_id
             INNER JOIN symbols t ON r.to_symbol_id = t.id
             WHERE r.kind = 'implements' AND t.name = ?1
             ORDER BY s.file_path, s.start_line
             LIMIT ?2",
            prefixed_columns("s")
        );
        let mut stmt = self.conn.prepare(&query)?;
        let implementations = stmt
            .query_map(rusqlite::params![type_name, limit as i64], |row| {
                self.row_to_symbol(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = implementations.len(), type_name, "implementations");
        Ok(implementations)
    }

    /// Parents and children of a type via `extends` edges.
    pub fn hierarchy(&self, type_name: &str, limit: usize) -> Result<(Vec<Symbol>, Vec<Symbol>)> {
        let ids: Vec<String> = self
            .get_symbols_by_name(type_name)?
            .into_iter()
            .map(|s| s.id)
            .collect();
        if ids.is_empty() {
            return Ok((vec![], vec![]));
        }

        let mut parents = Vec::new();
        let mut children = Vec::new();
        for id in &ids {
            for rel in self.outgoing(id, &[RelationshipKind::Extends])? {
                if let Some(parent) = self.get_symbol_by_id(&rel.to_symbol_id)? {
                    parents.push(parent);
                }
            }
            for rel in self.incoming(id, &[RelationshipKind::Extends])? {
                if let Some(child) = self.get_symbol_by_id(&rel.from_symbol_id)? {
                    children.push(child);
                }
            }
        }
        parents.truncate(limit);
        children.truncate(limit);
        Ok((parents, children))
    }

    /// Functions returning the type: `returns` edges first, then a signature
    /// scan for return annotations the extractor could not resolve.
    pub fn returns_type(&self, type_name: &str, limit: usize) -> Result<Vec<Symbol>> {
        let query = format!(
            "SELECT DISTINCT {} FROM symbols s
             INNER JOIN relationships r ON s.id = r.from_symbol_id
             INNER JOIN symbols t ON r.to_symbol_id = t.id
             WHERE r.kind = 'returns' AND t.name = ?1
             LIMIT ?2",
            prefixed_columns("s")
        );
        let mut stmt = self.conn.prepare(&query)?;
        let mut returners = stmt
            .query_map(rusqlite::params![type_name, limit as i64], |row| {
                self.row_to_symbol(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if returners.len() < limit {
            let pattern_arrow = format!("%-> {type_name}%");
            let pattern_colon = format!("%): {type_name}%");
            let query = format!(
                "SELECT {SYMBOL_COLUMNS} FROM symbols
                 WHERE (kind = 'function' OR kind = 'method')
                 AND (signature LIKE ?1 OR signature LIKE ?2)
                 LIMIT ?3"
            );
            let mut stmt = self.conn.prepare(&query)?;
            let extra = stmt
                .query_map(
                    rusqlite::params![pattern_arrow, pattern_colon, limit as i64],
                    |row| self.row_to_symbol(row),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for symbol in extra {
                if !returners.iter().any(|s| s.id == symbol.id) {
                    returners.push(symbol);
                }
            }
            returners.truncate(limit);
        }
        Ok(returners)
    }

    /// Functions accepting the type as a parameter. A plain signature scan;
    /// good enough without full type inference.
    pub fn parameters_of_type(&self, type_name: &str, limit: usize) -> Result<Vec<Symbol>> {
        let pattern = format!("%: {type_name}%");
        let query = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols
             WHERE (kind = 'function' OR kind = 'method' OR kind = 'constructor')
             AND signature LIKE ?1
             ORDER BY file_path, start_line
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let acceptors = stmt
            .query_map(rusqlite::params![pattern, limit as i64], |row| {
                self.row_to_symbol(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(acceptors)
    }
}

fn prefixed_columns(alias: &str) -> String {
    SYMBOL_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::symbols::tests::seed_file;
    use crate::extractors::{
        Relationship, RelationshipColumns, Symbol, SymbolColumns, SymbolKind,
    };

    fn typed_symbol(name: &str, kind: SymbolKind, path: &str, byte: u32) -> Symbol {
        let mut symbol = Symbol::new(
            name.into(),
            kind,
            "typescript".into(),
            path.into(),
            1,
            0,
            5,
            0,
            byte,
            byte + 20,
        );
        symbol.signature = Some(match kind {
            SymbolKind::Interface => format!("interface {name}"),
            SymbolKind::Class => format!("class {name}"),
            _ => format!("function {name}(repo: Repo): User"),
        });
        symbol
    }

    #[test]
    fn implementations_and_hierarchy() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "types.ts");

        let repo = typed_symbol("Repo", SymbolKind::Interface, "types.ts", 0);
        let sql_repo = typed_symbol("SqlRepo", SymbolKind::Class, "types.ts", 100);
        let cached_repo = typed_symbol("CachedRepo", SymbolKind::Class, "types.ts", 200);

        let mut symbols = SymbolColumns::default();
        symbols.push(&repo);
        symbols.push(&sql_repo);
        symbols.push(&cached_repo);
        db.add_symbols_batch(&symbols).unwrap();

        let mut edges = RelationshipColumns::default();
        edges.push(&Relationship {
            from_symbol_id: sql_repo.id.clone(),
            to_symbol_id: repo.id.clone(),
            kind: RelationshipKind::Implements,
            file_path: "types.ts".into(),
            line_number: 5,
            confidence: 1.0,
        });
        edges.push(&Relationship {
            from_symbol_id: cached_repo.id.clone(),
            to_symbol_id: sql_repo.id.clone(),
            kind: RelationshipKind::Extends,
            file_path: "types.ts".into(),
            line_number: 9,
            confidence: 1.0,
        });
        db.add_relationships_batch(&edges).unwrap();

        let impls = db.implementations_of("Repo", 10).unwrap();
        assert_eq!(impls.len(), 1);
        assert_eq!(impls[0].name, "SqlRepo");

        let (parents, children) = db.hierarchy("SqlRepo", 10).unwrap();
        assert!(parents.is_empty());
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "CachedRepo");
    }

    #[test]
    fn parameter_scan_matches_signatures() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "svc.ts");

        let func = typed_symbol("makeService", SymbolKind::Function, "svc.ts", 0);
        let mut symbols = SymbolColumns::default();
        symbols.push(&func);
        db.add_symbols_batch(&symbols).unwrap();

        let acceptors = db.parameters_of_type("Repo", 10).unwrap();
        assert_eq!(acceptors.len(), 1);
        let returners = db.returns_type("User", 10).unwrap();
        assert_eq!(returners.len(), 1);
    }
}
