// Precomputed transitive closure. Cleared and rebuilt atomically by the
// closure builder; impact analysis then answers in one indexed lookup.

use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::SymbolDatabase;

impl SymbolDatabase {
    pub fn clear_reachability(&self) -> Result<()> {
        self.conn.execute("DELETE FROM reachability", [])?;
        Ok(())
    }

    /// Bulk insert `(from, to, distance)` rows in one transaction.
    pub fn add_reachability_batch(&mut self, entries: &[(String, String, u32)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO reachability (from_symbol_id, to_symbol_id, distance)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (from, to, distance) in entries {
                match stmt.execute(params![from, to, distance]) {
                    Ok(n) => inserted += n,
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == rusqlite::ErrorCode::ConstraintViolation => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;
        debug!(inserted, "stored reachability batch");
        Ok(inserted)
    }

    /// Everything reachable from a symbol, nearest first.
    pub fn reachable_from(&self, from_id: &str) -> Result<Vec<(String, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT to_symbol_id, distance FROM reachability
             WHERE from_symbol_id = ?1 ORDER BY distance, to_symbol_id",
        )?;
        let rows = stmt
            .query_map([from_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// O(1) impact check: the precomputed distance between two symbols.
    pub fn reachability_distance(&self, from_id: &str, to_id: &str) -> Result<Option<u32>> {
        let distance = self
            .conn
            .query_row(
                "SELECT distance FROM reachability
                 WHERE from_symbol_id = ?1 AND to_symbol_id = ?2",
                [from_id, to_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(distance)
    }

    pub fn reachability_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM reachability", [], |row| row.get(0))?)
    }
}
