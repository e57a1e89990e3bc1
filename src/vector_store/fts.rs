// FTS index creation with bounded retry.
//
// Index creation can hit transient locking failures (most often on Windows,
// where another handle on the database file races the schema change). Retry
// with exponential backoff a few times, then give up and leave the store in
// degraded vector-only mode rather than failing the workspace.

use rusqlite::Connection;
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;

/// Create the FTS table and its sync triggers. Returns whether FTS is
/// available; `false` means search degrades to vector-only.
pub(super) fn create_fts_index(conn: &Connection) -> bool {
    let mut last_error = None;
    for attempt in 0..MAX_RETRIES {
        match try_create(conn) {
            Ok(()) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "FTS index created on retry");
                }
                return true;
            }
            Err(e) => {
                let retryable = matches!(
                    &e,
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == rusqlite::ErrorCode::DatabaseBusy
                            || err.code == rusqlite::ErrorCode::DatabaseLocked
                            || err.code == rusqlite::ErrorCode::PermissionDenied
                );
                last_error = Some(e);
                if retryable && attempt + 1 < MAX_RETRIES {
                    let delay = std::time::Duration::from_millis(100 * (1 << attempt));
                    debug!(
                        attempt = attempt + 1,
                        ?delay,
                        "FTS index creation hit transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    continue;
                }
                break;
            }
        }
    }

    warn!(
        error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
        "FTS index creation failed, search degraded to vector-only"
    );
    false
}

fn try_create(conn: &Connection) -> rusqlite::Result<()> {
    // Trigram tokenization keeps code-idiom characters (: < > [ ] ( ) { })
    // searchable as substrings, which a word tokenizer would throw away.
    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vector_fts USING fts5(
            code_pattern,
            content='vector_rows',
            content_rowid='rowid',
            tokenize='trigram'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS vector_rows_ai AFTER INSERT ON vector_rows BEGIN
            INSERT INTO vector_fts(rowid, code_pattern) VALUES (new.rowid, new.code_pattern);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS vector_rows_ad AFTER DELETE ON vector_rows BEGIN
            INSERT INTO vector_fts(vector_fts, rowid, code_pattern)
            VALUES ('delete', old.rowid, old.code_pattern);
        END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS vector_rows_au AFTER UPDATE ON vector_rows BEGIN
            INSERT INTO vector_fts(vector_fts, rowid, code_pattern)
            VALUES ('delete', old.rowid, old.code_pattern);
            INSERT INTO vector_fts(rowid, code_pattern) VALUES (new.rowid, new.code_pattern);
        END",
        [],
    )?;
    Ok(())
}

/// Build an FTS5 MATCH expression from free-form query text. Tokens shorter
/// than the trigram minimum cannot be matched by the index and are verified
/// by the post-filter instead; returns None when no token is indexable.
pub(super) fn fts_match_expression(query: &str) -> Option<String> {
    let phrases: Vec<String> = query
        .split_whitespace()
        .filter(|token| token.chars().count() >= 3)
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" AND "))
    }
}

/// Every whitespace token must appear as a (case-insensitive) substring of
/// the candidate's code pattern; this is what lets `: BaseClass` match
/// `class Foo(BaseClass):`.
pub(super) fn matches_all_tokens(code_pattern: &str, query: &str) -> bool {
    let haystack = code_pattern.to_lowercase();
    query
        .split_whitespace()
        .all(|token| haystack.contains(&token.to_lowercase()))
}
