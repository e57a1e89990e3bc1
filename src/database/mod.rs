// Relational storage for one workspace index.
//
// SQLite with WAL journaling and foreign keys on; cascading deletes keep the
// symbol graph free of orphans when files disappear. One connection per
// database; writers serialize behind the mutex the owner wraps this in,
// readers ride WAL snapshots.

mod files;
mod helpers;
mod identifiers;
mod reachability;
mod relationships;
mod schema;
mod symbols;
mod type_queries;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

pub use files::FileRecord;
pub use helpers::DatabaseStats;
pub use identifiers::IdentifierRef;

pub struct SymbolDatabase {
    conn: Connection,
    file_path: PathBuf,
}

impl SymbolDatabase {
    /// Open (creating if needed) the symbol database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create index directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open symbol database {}", path.display()))?;

        // WAL must be active before any schema work so readers never block writers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let mut db = Self {
            conn,
            file_path: path.to_path_buf(),
        };
        db.initialize_schema()?;
        debug!(path = %db.file_path.display(), "symbol database ready");
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mut db = Self {
            conn,
            file_path: PathBuf::from(":memory:"),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Checkpoint the WAL; called on shutdown to bound log growth.
    pub fn checkpoint_wal(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
        Ok(())
    }
}
