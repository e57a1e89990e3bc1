// Row mapping and shared query helpers.

use anyhow::Result;
use rusqlite::Row;

use crate::extractors::{
    Identifier, IdentifierKind, Relationship, RelationshipKind, Symbol, SymbolKind, Visibility,
};

use super::SymbolDatabase;

/// Standard SELECT column list for Symbol queries. Must stay in sync with
/// `row_to_symbol`; when a column is added, update both.
pub(crate) const SYMBOL_COLUMNS: &str = "id, name, kind, language, file_path, \
     start_line, start_col, end_line, end_col, start_byte, end_byte, \
     signature, doc_comment, visibility, parent_symbol_id, \
     code_body, code_context, confidence";

/// Database-wide statistics for health reporting.
#[derive(Debug, Default, Clone)]
pub struct DatabaseStats {
    pub total_files: i64,
    pub total_symbols: i64,
    pub total_identifiers: i64,
    pub total_relationships: i64,
    pub total_reachability: i64,
    pub languages: Vec<String>,
    pub db_size_bytes: u64,
}

impl SymbolDatabase {
    pub(crate) fn row_to_symbol(&self, row: &Row) -> rusqlite::Result<Symbol> {
        let kind: String = row.get("kind")?;
        let visibility: Option<String> = row.get("visibility")?;
        Ok(Symbol {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: SymbolKind::from_str_lossy(&kind),
            language: row.get("language")?,
            file_path: row.get("file_path")?,
            start_line: row.get("start_line")?,
            start_column: row.get("start_col")?,
            end_line: row.get("end_line")?,
            end_column: row.get("end_col")?,
            start_byte: row.get("start_byte")?,
            end_byte: row.get("end_byte")?,
            signature: row.get("signature")?,
            doc_comment: row.get("doc_comment")?,
            visibility: visibility.as_deref().and_then(Visibility::parse),
            parent_symbol_id: row.get("parent_symbol_id")?,
            code_body: row.get("code_body")?,
            code_context: row.get("code_context")?,
            confidence: row.get("confidence")?,
        })
    }

    pub(crate) fn row_to_identifier(&self, row: &Row) -> rusqlite::Result<Identifier> {
        let kind: String = row.get("kind")?;
        Ok(Identifier {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: IdentifierKind::from_str_lossy(&kind),
            file_path: row.get("file_path")?,
            start_line: row.get("start_line")?,
            start_column: row.get("start_col")?,
            end_line: row.get("end_line")?,
            end_column: row.get("end_col")?,
            start_byte: row.get::<_, Option<u32>>("start_byte")?.unwrap_or(0),
            end_byte: row.get::<_, Option<u32>>("end_byte")?.unwrap_or(0),
            containing_symbol_id: row.get("containing_symbol_id")?,
            target_symbol_id: row.get("target_symbol_id")?,
            code_context: row.get("code_context")?,
        })
    }

    pub(crate) fn row_to_relationship(&self, row: &Row) -> rusqlite::Result<Relationship> {
        let kind: String = row.get("kind")?;
        Ok(Relationship {
            from_symbol_id: row.get("from_symbol_id")?,
            to_symbol_id: row.get("to_symbol_id")?,
            kind: RelationshipKind::from_str_lossy(&kind),
            file_path: row.get("file_path")?,
            line_number: row.get("line_number")?,
            confidence: row.get("confidence")?,
        })
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };

        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT language FROM files ORDER BY language")?;
        let languages = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let db_size_bytes = std::fs::metadata(&self.file_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(DatabaseStats {
            total_files: count("files")?,
            total_symbols: count("symbols")?,
            total_identifiers: count("identifiers")?,
            total_relationships: count("relationships")?,
            total_reachability: count("reachability")?,
            languages,
            db_size_bytes,
        })
    }
}

/// Build `?N` placeholder lists for IN clauses.
pub(crate) fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}
