// Symbol storage and queries. Bulk insertion binds straight from the
// columnar tables inside a single transaction; a failed batch rolls back
// whole.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::extractors::{Symbol, SymbolColumns};

use super::SymbolDatabase;
use super::helpers::{SYMBOL_COLUMNS, placeholders};

impl SymbolDatabase {
    /// Insert a batch of symbols from the columnar store.
    pub fn add_symbols_batch(&mut self, columns: &SymbolColumns) -> Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO symbols
                 (id, name, kind, language, file_path,
                  start_line, start_col, end_line, end_col, start_byte, end_byte,
                  signature, doc_comment, visibility, parent_symbol_id,
                  code_body, code_context, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for i in 0..columns.len() {
                stmt.execute(params![
                    columns.ids[i],
                    columns.names[i],
                    columns.kinds[i],
                    columns.languages[i],
                    columns.file_paths[i],
                    columns.start_lines[i],
                    columns.start_columns[i],
                    columns.end_lines[i],
                    columns.end_columns[i],
                    columns.start_bytes[i],
                    columns.end_bytes[i],
                    columns.signatures[i],
                    columns.doc_comments[i],
                    columns.visibilities[i],
                    columns.parent_symbol_ids[i],
                    columns.code_bodies[i],
                    columns.code_contexts[i],
                    columns.confidences[i],
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = columns.len(), "stored symbol batch");
        Ok(columns.len())
    }

    pub fn get_symbol_by_id(&self, id: &str) -> Result<Option<Symbol>> {
        let query = format!("SELECT {SYMBOL_COLUMNS} FROM symbols WHERE id = ?1");
        let symbol = self
            .conn
            .query_row(&query, [id], |row| self.row_to_symbol(row))
            .optional()?;
        Ok(symbol)
    }

    pub fn get_symbols_by_ids(&self, ids: &[String]) -> Result<Vec<Symbol>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&query)?;
        let refs: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let symbols = stmt
            .query_map(&refs[..], |row| self.row_to_symbol(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    /// Exact-name lookup; no fuzzy matching.
    pub fn get_symbols_by_name(&self, name: &str) -> Result<Vec<Symbol>> {
        let query = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols WHERE name = ?1 ORDER BY file_path, start_line"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let symbols = stmt
            .query_map([name], |row| self.row_to_symbol(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    pub fn get_symbols_for_file(&self, file_path: &str) -> Result<Vec<Symbol>> {
        let query = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols WHERE file_path = ?1 ORDER BY start_byte"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let symbols = stmt
            .query_map([file_path], |row| self.row_to_symbol(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    pub fn symbol_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM symbols", [], |row| row.get(0))?)
    }

    /// Symbols of the given name, disambiguated by the defining file when one
    /// is provided. Supports `Parent.method` qualified names.
    pub fn lookup_symbols(&self, name: &str, file: Option<&str>) -> Result<Vec<Symbol>> {
        let (parent, leaf) = match name.rsplit_once('.') {
            Some((parent, leaf)) if !parent.is_empty() => (Some(parent), leaf),
            _ => (None, name),
        };

        let mut symbols = self.get_symbols_by_name(leaf)?;
        if let Some(parent_name) = parent {
            symbols.retain(|s| {
                s.parent_symbol_id
                    .as_deref()
                    .and_then(|pid| self.get_symbol_by_id(pid).ok().flatten())
                    .map(|p| p.name == parent_name)
                    .unwrap_or(false)
            });
        }
        if let Some(file) = file {
            symbols.retain(|s| s.file_path == file);
        }
        Ok(symbols)
    }

    /// Incoming-reference counts per symbol, combining resolved identifiers
    /// and relationship edges. Used by hot-spot exploration.
    pub fn reference_counts(&self, limit: usize) -> Result<Vec<(Symbol, i64)>> {
        let query = format!(
            "SELECT {SYMBOL_COLUMNS}, (
                 (SELECT COUNT(*) FROM identifiers i WHERE i.target_symbol_id = symbols.id)
                 + (SELECT COUNT(*) FROM relationships r WHERE r.to_symbol_id = symbols.id)
             ) AS refs
             FROM symbols
             ORDER BY refs DESC
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((self.row_to_symbol(row)?, row.get::<_, i64>("refs")?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Symbols nothing points at: no resolved identifier, no inbound edge
    /// other than containment. Candidates for dead code.
    pub fn unreferenced_symbols(&self, limit: usize) -> Result<Vec<Symbol>> {
        let query = format!(
            "SELECT {SYMBOL_COLUMNS} FROM symbols s
             WHERE NOT EXISTS (
                 SELECT 1 FROM identifiers i WHERE i.target_symbol_id = s.id
             )
             AND NOT EXISTS (
                 SELECT 1 FROM relationships r
                 WHERE r.to_symbol_id = s.id AND r.kind != 'contains'
             )
             ORDER BY s.file_path, s.start_line
             LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let symbols = stmt
            .query_map([limit as i64], |row| self.row_to_symbol(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(symbols)
    }

    /// Every distinct symbol name; feeds nearest-name suggestions.
    pub fn distinct_symbol_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT name FROM symbols ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Symbol counts per file, for hot-spot reporting.
    pub fn symbol_counts_by_file(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, COUNT(*) FROM symbols GROUP BY file_path")?;
        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (path, count) = row?;
            counts.insert(path, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::FileRecord;
    use crate::extractors::{SymbolKind, symbol_id};

    pub(crate) fn seed_file(db: &SymbolDatabase, path: &str) {
        db.add_file(&FileRecord {
            path: path.into(),
            language: "python".into(),
            content_hash: "hash".into(),
            size_bytes: 1,
            last_indexed: 1,
        })
        .unwrap();
    }

    pub(crate) fn make_symbol(name: &str, path: &str, start_byte: u32) -> Symbol {
        let mut symbol = Symbol::new(
            name.into(),
            SymbolKind::Function,
            "python".into(),
            path.into(),
            1,
            0,
            3,
            0,
            start_byte,
            start_byte + 10,
        );
        symbol.signature = Some(format!("def {name}():"));
        symbol
    }

    #[test]
    fn bulk_insert_and_query_by_name() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "a.py");

        let mut columns = SymbolColumns::default();
        columns.push(&make_symbol("alpha", "a.py", 0));
        columns.push(&make_symbol("beta", "a.py", 20));
        assert_eq!(db.add_symbols_batch(&columns).unwrap(), 2);

        let found = db.get_symbols_by_name("alpha").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, symbol_id("a.py", SymbolKind::Function, "alpha", 0));
        assert!(db.get_symbols_by_name("gamma").unwrap().is_empty());
    }

    #[test]
    fn deleting_file_cascades_to_symbols() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "a.py");

        let mut columns = SymbolColumns::default();
        columns.push(&make_symbol("alpha", "a.py", 0));
        db.add_symbols_batch(&columns).unwrap();

        let deleted = db.delete_file("a.py").unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(db.symbol_count().unwrap(), 0);
    }

    #[test]
    fn qualified_lookup_filters_by_parent() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "svc.py");

        let mut parent = make_symbol("UserService", "svc.py", 0);
        parent.kind = SymbolKind::Class;
        parent.id = symbol_id("svc.py", SymbolKind::Class, "UserService", 0);
        let mut method = make_symbol("create", "svc.py", 30);
        method.kind = SymbolKind::Method;
        method.id = symbol_id("svc.py", SymbolKind::Method, "create", 30);
        method.parent_symbol_id = Some(parent.id.clone());

        let mut other = make_symbol("create", "svc.py", 90);
        other.id = symbol_id("svc.py", SymbolKind::Function, "create", 90);

        let mut columns = SymbolColumns::default();
        columns.push(&parent);
        columns.push(&method);
        columns.push(&other);
        db.add_symbols_batch(&columns).unwrap();

        let qualified = db.lookup_symbols("UserService.create", None).unwrap();
        assert_eq!(qualified.len(), 1);
        assert_eq!(qualified[0].id, method.id);

        let unqualified = db.lookup_symbols("create", None).unwrap();
        assert_eq!(unqualified.len(), 2);
    }
}
