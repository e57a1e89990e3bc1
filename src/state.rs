// Process-wide server state, held explicitly and threaded into every tool
// handler. Built once at startup, torn down at shutdown, never reconstructed
// mid-run.
//
// Shared scarce resources live here with their disciplines:
//   - the embedding manager owns the device (its own internal lock),
//   - the indexing lock serializes indexing across workspaces,
//   - per-workspace storage serializes writers behind its mutex,
//   - the initialization barrier gates tools until subsystems exist.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::database::SymbolDatabase;
use crate::embeddings::{EMBEDDING_DIMENSIONS, EmbeddingManager};
use crate::error::MillerError;
use crate::reranker::ReRanker;
use crate::scanner::{IgnoreRules, WorkspaceScanner};
use crate::vector_store::VectorStore;
use crate::watcher::{FileChange, FileWatcher};
use crate::workspace::{WorkspaceKind, WorkspacePaths, WorkspaceRegistry};

pub const INITIALIZATION_TIMEOUT: Duration = Duration::from_secs(30);
const EMBEDDING_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// One-shot readiness gate. Storage readiness opens first; tools that need
/// vectors wait for the second stage.
pub struct InitBarrier {
    storage_tx: watch::Sender<bool>,
    vectors_tx: watch::Sender<bool>,
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl InitBarrier {
    pub fn new() -> Self {
        let (storage_tx, _) = watch::channel(false);
        let (vectors_tx, _) = watch::channel(false);
        Self {
            storage_tx,
            vectors_tx,
        }
    }

    pub fn mark_storage_ready(&self) {
        let _ = self.storage_tx.send(true);
    }

    pub fn mark_vectors_ready(&self) {
        let _ = self.vectors_tx.send(true);
    }

    pub fn storage_ready(&self) -> bool {
        *self.storage_tx.borrow()
    }

    pub fn vectors_ready(&self) -> bool {
        *self.vectors_tx.borrow()
    }

    async fn wait(tx: &watch::Sender<bool>, timeout: Duration, name: &'static str) -> Result<(), MillerError> {
        let mut rx = tx.subscribe();
        if *rx.borrow() {
            return Ok(());
        }
        let outcome = tokio::time::timeout(timeout, async {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if outcome.is_err() && !*tx.borrow() {
            return Err(MillerError::NotReady(name));
        }
        Ok(())
    }

    pub async fn wait_storage(&self, timeout: Duration) -> Result<(), MillerError> {
        Self::wait(&self.storage_tx, timeout, "storage").await
    }

    pub async fn wait_vectors(&self, timeout: Duration) -> Result<(), MillerError> {
        Self::wait(&self.vectors_tx, timeout, "vector store").await
    }
}

/// The storage pair for one workspace, shareable across tasks.
#[derive(Clone)]
pub struct WorkspaceHandle {
    pub workspace_id: String,
    pub root: PathBuf,
    pub db: Arc<Mutex<SymbolDatabase>>,
    pub vectors: Arc<Mutex<VectorStore>>,
}

pub struct ServerState {
    pub workspace_root: PathBuf,
    pub paths: WorkspacePaths,
    pub registry: Mutex<WorkspaceRegistry>,
    pub embeddings: Arc<EmbeddingManager>,
    pub reranker: Arc<ReRanker>,
    pub ignore: Arc<IgnoreRules>,
    pub init: InitBarrier,
    /// Serializes indexing across workspaces; storage, vectors and the
    /// embedding device are shared
    pub indexing_lock: Mutex<()>,
    /// Set after incremental batches; the closure rebuilds lazily on the
    /// next request that needs it
    pub closure_dirty: AtomicBool,
    primary: WorkspaceHandle,
    /// Reference workspaces opened on demand
    open_workspaces: Mutex<HashMap<String, WorkspaceHandle>>,
    watcher: Mutex<Option<FileWatcher>>,
}

impl ServerState {
    /// Build the full state for a workspace root. Registers the primary
    /// workspace, opens its storage pair, constructs the shared embedding
    /// manager and reranker, and opens the barrier stages.
    pub async fn initialize(workspace_root: PathBuf) -> Result<Arc<Self>> {
        let workspace_root = workspace_root
            .canonicalize()
            .unwrap_or(workspace_root);
        let paths = WorkspacePaths::for_workspace_root(&workspace_root);

        let mut registry = WorkspaceRegistry::load(paths.registry_path())?;
        let name = workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());
        let workspace_id = registry.add_workspace(
            &workspace_root.to_string_lossy(),
            &name,
            WorkspaceKind::Primary,
        )?;

        let db = SymbolDatabase::new(paths.symbols_db_path(&workspace_id))?;
        let vectors = VectorStore::new(paths.vectors_db_path(&workspace_id), EMBEDDING_DIMENSIONS)?;
        let embeddings = Arc::new(EmbeddingManager::new(paths.model_cache_dir())?);
        let reranker = Arc::new(ReRanker::new(paths.model_cache_dir()));
        let ignore = Arc::new(IgnoreRules::default_rules()?);

        let primary = WorkspaceHandle {
            workspace_id: workspace_id.clone(),
            root: workspace_root.clone(),
            db: Arc::new(Mutex::new(db)),
            vectors: Arc::new(Mutex::new(vectors)),
        };

        let state = Arc::new(Self {
            workspace_root,
            paths,
            registry: Mutex::new(registry),
            embeddings,
            reranker,
            ignore,
            init: InitBarrier::new(),
            indexing_lock: Mutex::new(()),
            closure_dirty: AtomicBool::new(false),
            primary,
            open_workspaces: Mutex::new(HashMap::new()),
            watcher: Mutex::new(None),
        });

        state.init.mark_storage_ready();
        // The embedding manager is lazy; its existence is what vector-needing
        // tools wait for
        state.init.mark_vectors_ready();

        state.clone().spawn_embedding_cleanup();
        info!(workspace = %state.primary.workspace_id, "server state initialized");
        Ok(state)
    }

    fn spawn_embedding_cleanup(self: Arc<Self>) {
        let embeddings = self.embeddings.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EMBEDDING_CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                embeddings.maybe_unload_idle().await;
            }
        });
    }

    pub fn primary(&self) -> &WorkspaceHandle {
        &self.primary
    }

    /// Resolve "primary" or a workspace ID to its storage pair, opening
    /// reference workspace indexes on demand.
    pub async fn resolve_workspace(&self, workspace: &str) -> Result<WorkspaceHandle, MillerError> {
        if workspace.is_empty() || workspace == "primary" || workspace == self.primary.workspace_id
        {
            return Ok(self.primary.clone());
        }

        {
            let open = self.open_workspaces.lock().await;
            if let Some(handle) = open.get(workspace) {
                return Ok(handle.clone());
            }
        }

        let entry = {
            let registry = self.registry.lock().await;
            registry.get_workspace(workspace).cloned()
        };
        let Some(entry) = entry else {
            return Err(MillerError::NotFound(format!("workspace '{workspace}'")));
        };

        let db = SymbolDatabase::new(self.paths.symbols_db_path(workspace))
            .map_err(|e| MillerError::Fatal(format!("failed to open workspace index: {e}")))?;
        let vectors = VectorStore::new(
            self.paths.vectors_db_path(workspace),
            EMBEDDING_DIMENSIONS,
        )
        .map_err(|e| MillerError::Fatal(format!("failed to open workspace vectors: {e}")))?;

        let handle = WorkspaceHandle {
            workspace_id: workspace.to_string(),
            root: PathBuf::from(&entry.path),
            db: Arc::new(Mutex::new(db)),
            vectors: Arc::new(Mutex::new(vectors)),
        };
        let mut open = self.open_workspaces.lock().await;
        Ok(open
            .entry(workspace.to_string())
            .or_insert(handle)
            .clone())
    }

    /// Drop a cached reference-workspace handle (after remove/clean).
    pub async fn evict_workspace(&self, workspace_id: &str) {
        let mut open = self.open_workspaces.lock().await;
        open.remove(workspace_id);
    }

    /// A scanner for the given workspace handle, sharing the process-wide
    /// embedding manager.
    pub fn scanner_for(&self, handle: &WorkspaceHandle) -> WorkspaceScanner {
        WorkspaceScanner::new(
            handle.root.clone(),
            self.ignore.clone(),
            handle.db.clone(),
            handle.vectors.clone(),
            self.embeddings.clone(),
        )
    }

    /// Start the primary-workspace watcher. Debounced batches feed the
    /// scanner; callback errors are logged and never stop the watcher.
    pub async fn start_watcher(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.watcher.lock().await;
        if slot.is_some() {
            anyhow::bail!("watcher already started");
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<FileChange>>();
        let state = self.clone();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let _guard = state.indexing_lock.lock().await;
                let scanner = state.scanner_for(&state.primary);
                match scanner.apply_changes(&batch).await {
                    Ok(stats) if stats.closure_stale => {
                        state.closure_dirty.store(true, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "incremental indexing failed"),
                }
            }
        });

        let mut watcher = FileWatcher::new(self.workspace_root.clone(), self.ignore.clone());
        {
            let db = self.primary.db.lock().await;
            if let Ok(paths) = db.all_file_paths() {
                let root = self.workspace_root.clone();
                watcher.mark_known(paths.into_iter().map(|p| root.join(p)));
            }
        }
        watcher.start(Box::new(move |batch| {
            tx.send(batch)
                .map_err(|_| anyhow::anyhow!("index task is gone"))
        }))?;
        *slot = Some(watcher);
        Ok(())
    }

    pub async fn watcher_running(&self) -> bool {
        self.watcher.lock().await.is_some()
    }

    pub async fn stop_watcher(&self) {
        let mut slot = self.watcher.lock().await;
        if let Some(mut watcher) = slot.take() {
            watcher.stop().await;
        }
    }

    /// Rebuild the reachability closure if incremental changes left it
    /// stale.
    pub async fn ensure_closure_fresh(&self, handle: &WorkspaceHandle) -> Result<()> {
        if handle.workspace_id == self.primary.workspace_id
            && self.closure_dirty.swap(false, Ordering::Relaxed)
        {
            let mut db = handle.db.lock().await;
            crate::closure::compute_transitive_closure(&mut db, Default::default())
                .context("closure rebuild failed")?;
        }
        Ok(())
    }

    /// Orderly teardown: watcher drained, WAL checkpointed.
    pub async fn shutdown(&self) {
        self.stop_watcher().await;
        let db = self.primary.db.lock().await;
        if let Err(e) = db.checkpoint_wal() {
            warn!(error = %e, "WAL checkpoint on shutdown failed");
        }
        info!("server state shut down");
    }
}

/// Resolve the workspace root the way the server binary would: explicit
/// argument, MILLER_WORKSPACE env var, then the current directory.
pub fn resolve_workspace_root(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        let expanded = shellexpand::tilde(path).to_string();
        let path = PathBuf::from(expanded);
        return path.canonicalize().unwrap_or(path);
    }
    if let Ok(path) = std::env::var("MILLER_WORKSPACE") {
        let expanded = shellexpand::tilde(&path).to_string();
        let path = PathBuf::from(expanded);
        if path.exists() {
            return path.canonicalize().unwrap_or(path);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn barrier_opens_immediately_when_ready() {
        let barrier = InitBarrier::new();
        barrier.mark_storage_ready();
        barrier
            .wait_storage(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(barrier.storage_ready());
        assert!(!barrier.vectors_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_times_out_naming_the_subsystem() {
        let barrier = InitBarrier::new();
        let err = barrier
            .wait_vectors(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vector store"));
    }

    #[tokio::test]
    async fn barrier_releases_waiters_on_ready() {
        let barrier = Arc::new(InitBarrier::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_storage(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        barrier.mark_storage_ready();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn initialize_opens_primary_workspace() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("main.py"), "def main():\n    pass\n").unwrap();

        let state = ServerState::initialize(temp.path().to_path_buf()).await.unwrap();
        assert!(state.init.storage_ready());
        assert!(state.init.vectors_ready());
        assert!(state.paths.registry_path().exists());

        let handle = state.resolve_workspace("primary").await.unwrap();
        assert_eq!(handle.workspace_id, state.primary().workspace_id);

        let missing = state.resolve_workspace("nope_00000000").await;
        assert!(matches!(missing, Err(MillerError::NotFound(_))));
        state.shutdown().await;
    }
}
