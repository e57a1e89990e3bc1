// Shared fixtures: a temp workspace with files on disk, indexed end to end.
//
// Embeddings are disabled for tests (MILLER_DISABLE_EMBEDDINGS) so nothing
// touches the network; the scanner exercises its degraded path and stores
// vector rows with placeholder vectors, which keeps text and pattern search
// fully functional.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::scanner::ScanStats;
use crate::state::ServerState;

pub fn disable_embeddings() {
    std::env::set_var("MILLER_DISABLE_EMBEDDINGS", "1");
}

/// Write fixture files under a temp dir and build server state on it.
pub async fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Arc<ServerState>) {
    disable_embeddings();
    let temp = TempDir::new().expect("temp workspace");
    write_files(temp.path(), files);
    let state = ServerState::initialize(temp.path().to_path_buf())
        .await
        .expect("state init");
    (temp, state)
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

/// Index the primary workspace and return the scan stats.
pub async fn index_primary(state: &ServerState) -> ScanStats {
    let _guard = state.indexing_lock.lock().await;
    let scanner = state.scanner_for(state.primary());
    scanner.full_scan().await.expect("full scan")
}

/// The classic three-function call graph used across trace tests.
pub const CALL_GRAPH_PY: &str = "\
def function_a():
    function_b()
    function_c()

def function_b():
    pass

def function_c():
    function_b()
";
