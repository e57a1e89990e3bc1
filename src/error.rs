// Contract-level error kinds for the tool boundary.
//
// Internally everything propagates anyhow errors; at the surface, failures
// collapse into these kinds. NotFound and Degraded are not failures at all:
// tools translate them into empty results or best-effort results with a
// note, never into an error the caller sees.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MillerError {
    /// A query arrived before the initialization barrier opened and the wait
    /// timed out. Names the missing subsystem.
    #[error("{0} is not ready yet; initialization still in progress")]
    NotReady(&'static str),

    /// Workspace, symbol or file missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unparseable source or snippet.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Lock contention or other retryable I/O trouble that exhausted its
    /// retries.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// A capability (embeddings, FTS, reranker) is unavailable; results are
    /// best-effort.
    #[error("degraded: {0}")]
    Degraded(String),

    /// Storage corruption or resource exhaustion. Surfaced and logged; the
    /// process keeps serving other tools.
    #[error("fatal: {0}")]
    Fatal(String),
}
