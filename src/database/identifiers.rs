// Identifier storage and queries. Every usage site lands here; fast_refs,
// trace fallbacks and rename all read from this table.

use anyhow::Result;
use rusqlite::params;
use tracing::debug;

use crate::extractors::{Identifier, IdentifierColumns};

use super::SymbolDatabase;

/// Lightweight identifier projection for reference listings.
#[derive(Debug, Clone)]
pub struct IdentifierRef {
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_column: u32,
    pub containing_symbol_id: Option<String>,
    pub target_symbol_id: Option<String>,
    pub code_context: Option<String>,
}

const IDENTIFIER_REF_COLUMNS: &str = "name, kind, file_path, start_line, start_col, end_col, \
     containing_symbol_id, target_symbol_id, code_context";

impl SymbolDatabase {
    pub fn add_identifiers_batch(&mut self, columns: &IdentifierColumns) -> Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO identifiers
                 (id, name, kind, file_path,
                  start_line, start_col, end_line, end_col, start_byte, end_byte,
                  containing_symbol_id, target_symbol_id, code_context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for i in 0..columns.len() {
                stmt.execute(params![
                    columns.ids[i],
                    columns.names[i],
                    columns.kinds[i],
                    columns.file_paths[i],
                    columns.start_lines[i],
                    columns.start_columns[i],
                    columns.end_lines[i],
                    columns.end_columns[i],
                    columns.start_bytes[i],
                    columns.end_bytes[i],
                    columns.containing_symbol_ids[i],
                    columns.target_symbol_ids[i],
                    columns.code_contexts[i],
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = columns.len(), "stored identifier batch");
        Ok(columns.len())
    }

    fn row_to_identifier_ref(&self, row: &rusqlite::Row) -> rusqlite::Result<IdentifierRef> {
        Ok(IdentifierRef {
            name: row.get("name")?,
            kind: row.get("kind")?,
            file_path: row.get("file_path")?,
            start_line: row.get("start_line")?,
            start_column: row.get("start_col")?,
            end_column: row.get("end_col")?,
            containing_symbol_id: row.get("containing_symbol_id")?,
            target_symbol_id: row.get("target_symbol_id")?,
            code_context: row.get("code_context")?,
        })
    }

    /// Occurrences resolved to the given symbol.
    pub fn identifiers_by_target(&self, target_symbol_id: &str) -> Result<Vec<IdentifierRef>> {
        let query = format!(
            "SELECT {IDENTIFIER_REF_COLUMNS} FROM identifiers
             WHERE target_symbol_id = ?1
             ORDER BY file_path, start_line"
        );
        let mut stmt = self.conn.prepare(&query)?;
        let refs = stmt
            .query_map([target_symbol_id], |row| self.row_to_identifier_ref(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    /// Occurrences of a name, optionally restricted to unresolved ones.
    /// fast_refs unions resolved-by-target with unresolved-by-name.
    pub fn identifiers_by_name(&self, name: &str, unresolved_only: bool) -> Result<Vec<IdentifierRef>> {
        let query = if unresolved_only {
            format!(
                "SELECT {IDENTIFIER_REF_COLUMNS} FROM identifiers
                 WHERE name = ?1 AND target_symbol_id IS NULL
                 ORDER BY file_path, start_line"
            )
        } else {
            format!(
                "SELECT {IDENTIFIER_REF_COLUMNS} FROM identifiers
                 WHERE name = ?1
                 ORDER BY file_path, start_line"
            )
        };
        let mut stmt = self.conn.prepare(&query)?;
        let refs = stmt
            .query_map([name], |row| self.row_to_identifier_ref(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(refs)
    }

    /// Identifier rows (full) occurring inside the given symbol with a known
    /// target; the downstream-trace fallback when no Call edges exist.
    pub fn identifiers_contained_by(&self, containing_symbol_id: &str) -> Result<Vec<Identifier>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, kind, file_path, start_line, start_col, end_line, end_col,
                    start_byte, end_byte, containing_symbol_id, target_symbol_id, code_context
             FROM identifiers
             WHERE containing_symbol_id = ?1 AND target_symbol_id IS NOT NULL",
        )?;
        let identifiers = stmt
            .query_map([containing_symbol_id], |row| self.row_to_identifier(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(identifiers)
    }

    /// The distinct symbols whose bodies reference the target; the upstream
    /// trace uses these as callers, not the occurrences themselves.
    pub fn containing_symbols_of_target(&self, target_symbol_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT containing_symbol_id FROM identifiers
             WHERE target_symbol_id = ?1 AND containing_symbol_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map([target_symbol_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Resolve unresolved identifier targets by unique name match across the
    /// workspace. Ambiguous names stay unresolved. Returns how many rows were
    /// updated.
    pub fn resolve_identifier_targets(&mut self) -> Result<usize> {
        let names: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT DISTINCT name FROM identifiers WHERE target_symbol_id IS NULL",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            let mut find = tx.prepare("SELECT id FROM symbols WHERE name = ?1 LIMIT 2")?;
            let mut update = tx.prepare(
                "UPDATE identifiers SET target_symbol_id = ?1
                 WHERE name = ?2 AND target_symbol_id IS NULL",
            )?;
            for name in names {
                let candidates: Vec<String> = find
                    .query_map([&name], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                if candidates.len() == 1 {
                    updated += update.execute(params![candidates[0], name])?;
                }
            }
        }
        tx.commit()?;

        if updated > 0 {
            debug!(updated, "resolved identifier targets");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::symbols::tests::{make_symbol, seed_file};
    use crate::extractors::{IdentifierKind, SymbolColumns};

    fn make_identifier(name: &str, path: &str, line: u32) -> Identifier {
        Identifier::new(
            name.into(),
            IdentifierKind::Call,
            path.into(),
            line,
            4,
            line,
            4 + name.len() as u32,
            0,
            0,
        )
    }

    #[test]
    fn unique_names_resolve_ambiguous_stay_null() {
        let mut db = SymbolDatabase::in_memory().unwrap();
        seed_file(&db, "a.py");
        seed_file(&db, "b.py");

        let mut symbols = SymbolColumns::default();
        symbols.push(&make_symbol("unique_fn", "a.py", 0));
        symbols.push(&make_symbol("dup_fn", "a.py", 50));
        symbols.push(&make_symbol("dup_fn", "b.py", 0));
        db.add_symbols_batch(&symbols).unwrap();

        let mut identifiers = IdentifierColumns::default();
        identifiers.push(&make_identifier("unique_fn", "b.py", 3));
        identifiers.push(&make_identifier("dup_fn", "a.py", 7));
        db.add_identifiers_batch(&identifiers).unwrap();

        let updated = db.resolve_identifier_targets().unwrap();
        assert_eq!(updated, 1);

        let resolved = db.identifiers_by_name("unique_fn", false).unwrap();
        assert!(resolved[0].target_symbol_id.is_some());
        let ambiguous = db.identifiers_by_name("dup_fn", false).unwrap();
        assert!(ambiguous[0].target_symbol_id.is_none());
    }
}
