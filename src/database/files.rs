// File tracking: one row per workspace-relative path, Blake3 content hash
// for change detection, cascading deletes for everything the file owned.

use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::SymbolDatabase;
use super::helpers::placeholders;

#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub language: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub last_indexed: i64,
}

impl SymbolDatabase {
    /// Insert or update a file row. `last_indexed` never moves backwards.
    pub fn add_file(&self, record: &FileRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO files (path, language, content_hash, size_bytes, last_indexed)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                 language = excluded.language,
                 content_hash = excluded.content_hash,
                 size_bytes = excluded.size_bytes,
                 last_indexed = MAX(files.last_indexed, excluded.last_indexed)",
            params![
                record.path,
                record.language,
                record.content_hash,
                record.size_bytes,
                record.last_indexed,
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT path, language, content_hash, size_bytes, last_indexed
                 FROM files WHERE path = ?1",
                [path],
                |row| {
                    Ok(FileRecord {
                        path: row.get(0)?,
                        language: row.get(1)?,
                        content_hash: row.get(2)?,
                        size_bytes: row.get(3)?,
                        last_indexed: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_file_hash(&self, path: &str) -> Result<Option<String>> {
        let hash = self
            .conn
            .query_row("SELECT content_hash FROM files WHERE path = ?1", [path], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(hash)
    }

    /// All indexed paths, used by the scanner to detect deletions.
    pub fn all_file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT path FROM files ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    /// Delete a file and everything it owns. Returns the IDs of the symbols
    /// that were removed so the caller can clear their vector rows.
    pub fn delete_file(&mut self, path: &str) -> Result<Vec<String>> {
        self.delete_files_batch(std::slice::from_ref(&path.to_string()))
    }

    /// Batch deletion in one transaction; cascades handle children.
    pub fn delete_files_batch(&mut self, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.conn.transaction()?;
        let mut deleted_symbol_ids = Vec::new();
        {
            let query = format!(
                "SELECT id FROM symbols WHERE file_path IN ({})",
                placeholders(paths.len())
            );
            let mut stmt = tx.prepare(&query)?;
            let refs: Vec<&dyn rusqlite::ToSql> =
                paths.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(&refs[..], |row| row.get::<_, String>(0))?;
            for row in rows {
                deleted_symbol_ids.push(row?);
            }

            let delete = format!("DELETE FROM files WHERE path IN ({})", placeholders(paths.len()));
            tx.execute(&delete, &refs[..])?;
        }
        tx.commit()?;

        debug!(
            files = paths.len(),
            symbols = deleted_symbol_ids.len(),
            "deleted files with cascade"
        );
        Ok(deleted_symbol_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, hash: &str, ts: i64) -> FileRecord {
        FileRecord {
            path: path.into(),
            language: "python".into(),
            content_hash: hash.into(),
            size_bytes: 42,
            last_indexed: ts,
        }
    }

    #[test]
    fn add_file_is_upsert_and_monotonic() {
        let db = SymbolDatabase::in_memory().unwrap();
        db.add_file(&record("a.py", "h1", 100)).unwrap();
        db.add_file(&record("a.py", "h2", 50)).unwrap();

        let row = db.get_file("a.py").unwrap().unwrap();
        assert_eq!(row.content_hash, "h2");
        // last_indexed does not move backwards
        assert_eq!(row.last_indexed, 100);
    }

    #[test]
    fn missing_file_is_none() {
        let db = SymbolDatabase::in_memory().unwrap();
        assert!(db.get_file("nope.py").unwrap().is_none());
        assert!(db.get_file_hash("nope.py").unwrap().is_none());
    }
}
