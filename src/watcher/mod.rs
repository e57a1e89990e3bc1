// File watcher: wraps the OS watcher (inotify / FSEvents /
// ReadDirectoryChangesW via notify) and normalizes its events into debounced
// batches of FileChange. A move becomes DELETED(src) + CREATED(dst); a
// CREATED for a path we already know is rewritten to MODIFIED; anything
// outside the workspace root is dropped.

mod debouncer;
mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tracing::{debug, info, warn};

use crate::scanner::IgnoreRules;

pub use debouncer::{DEFAULT_BATCH_CAP, DEFAULT_DEBOUNCE_WINDOW, DebounceQueue, FlushFn};
pub use types::{FileChange, FileEvent};

const STOP_GRACE: Duration = Duration::from_secs(5);

pub struct FileWatcher {
    workspace_root: PathBuf,
    ignore: Arc<IgnoreRules>,
    window: Duration,
    batch_cap: usize,
    /// Paths the index already contains; CREATED events for these become
    /// MODIFIED (editors on some platforms report saves as creations)
    known_paths: Arc<Mutex<HashSet<PathBuf>>>,
    watcher: Option<notify::RecommendedWatcher>,
    queue: Option<DebounceQueue>,
}

impl FileWatcher {
    pub fn new(workspace_root: PathBuf, ignore: Arc<IgnoreRules>) -> Self {
        Self {
            workspace_root,
            ignore,
            window: DEFAULT_DEBOUNCE_WINDOW,
            batch_cap: DEFAULT_BATCH_CAP,
            known_paths: Arc::new(Mutex::new(HashSet::new())),
            watcher: None,
            queue: None,
        }
    }

    pub fn with_debounce(mut self, window: Duration, batch_cap: usize) -> Self {
        self.window = window;
        self.batch_cap = batch_cap;
        self
    }

    /// Seed the known-path set from the index, so the CREATED -> MODIFIED
    /// rewrite works from the first event.
    pub fn mark_known<I: IntoIterator<Item = PathBuf>>(&self, paths: I) {
        let mut known = self.known_paths.lock().unwrap();
        known.extend(paths);
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching. Starting twice is an error; stop first.
    pub fn start(&mut self, flush: FlushFn) -> Result<()> {
        if self.watcher.is_some() {
            bail!("watcher already started");
        }

        let queue = DebounceQueue::new(self.window, self.batch_cap, flush);
        let root = self.workspace_root.clone();
        let ignore = self.ignore.clone();
        let known = self.known_paths.clone();
        let tx_queue = QueueHandle {
            queue: queue.raw_sender(),
        };

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => handle_event(&root, &ignore, &known, &tx_queue, event),
                Err(e) => warn!(error = %e, "file watcher backend error"),
            }
        })
        .context("failed to create file watcher")?;

        watcher
            .watch(&self.workspace_root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", self.workspace_root.display()))?;

        info!(root = %self.workspace_root.display(), "file watcher started");
        self.watcher = Some(watcher);
        self.queue = Some(queue);
        Ok(())
    }

    /// Stop watching. Safe to call when already stopped. Pending debounced
    /// events flush; in-flight callbacks get a bounded grace period.
    pub async fn stop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
        }
        if let Some(queue) = self.queue.take() {
            queue.shutdown(STOP_GRACE).await;
            info!("file watcher stopped");
        }
    }
}

/// Thin clonable handle the notify callback uses to feed the queue.
struct QueueHandle {
    queue: tokio::sync::mpsc::UnboundedSender<FileChange>,
}

impl QueueHandle {
    fn push(&self, event: FileEvent, path: PathBuf) {
        let _ = self.queue.send(FileChange::new(event, path));
    }
}

fn handle_event(
    root: &Path,
    ignore: &IgnoreRules,
    known: &Mutex<HashSet<PathBuf>>,
    queue: &QueueHandle,
    event: Event,
) {
    let emits: Vec<(FileEvent, PathBuf)> = match event.kind {
        EventKind::Create(_) => event
            .paths
            .into_iter()
            .map(|p| (FileEvent::Created, p))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // notify reports [src, dst] for a complete rename
            let mut out = Vec::new();
            let mut paths = event.paths.into_iter();
            if let Some(src) = paths.next() {
                out.push((FileEvent::Deleted, src));
            }
            if let Some(dst) = paths.next() {
                out.push((FileEvent::Created, dst));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .into_iter()
            .map(|p| (FileEvent::Deleted, p))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .into_iter()
            .map(|p| (FileEvent::Created, p))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .into_iter()
            .map(|p| (FileEvent::Modified, p))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .into_iter()
            .map(|p| (FileEvent::Deleted, p))
            .collect(),
        other => {
            debug!(kind = ?other, "ignoring watcher event kind");
            Vec::new()
        }
    };

    for (mut file_event, path) in emits {
        // Paths outside the workspace root are dropped; symlinked escapes
        // resolve outside the root and fall out here too
        if !path.starts_with(root) {
            continue;
        }
        if !ignore.should_index(&path, root) {
            continue;
        }

        {
            let mut known = known.lock().unwrap();
            match file_event {
                FileEvent::Created => {
                    // Known path reported as created: it's a modification
                    if !known.insert(path.clone()) {
                        file_event = FileEvent::Modified;
                    }
                }
                FileEvent::Modified => {
                    known.insert(path.clone());
                }
                FileEvent::Deleted => {
                    known.remove(&path);
                }
            }
        }

        queue.push(file_event, path);
    }
}
