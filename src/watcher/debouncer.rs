// Event debouncing. Rapid changes to the same path collapse inside the
// debounce window:
//
//   MODIFIED + MODIFIED -> MODIFIED
//   CREATED  + MODIFIED -> CREATED
//   MODIFIED + DELETED  -> DELETED
//   CREATED  + DELETED  -> dropped entirely
//
// A flush fires after the window of quiescence or as soon as the queue hits
// the batch cap. Flush-callback errors are logged and never stop the worker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::types::{FileChange, FileEvent};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);
pub const DEFAULT_BATCH_CAP: usize = 256;

pub type FlushFn = Box<dyn FnMut(Vec<FileChange>) -> anyhow::Result<()> + Send>;

pub struct DebounceQueue {
    tx: mpsc::UnboundedSender<FileChange>,
    worker: Option<JoinHandle<()>>,
}

impl DebounceQueue {
    pub fn new(window: Duration, batch_cap: usize, flush: FlushFn) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, window, batch_cap, flush));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Queue an event; coalescing happens in the worker.
    pub fn add(&self, event: FileEvent, path: PathBuf) {
        // Send fails only after shutdown, when dropping events is correct
        let _ = self.tx.send(FileChange::new(event, path));
    }

    /// A raw sender for callers that feed the queue from a non-async
    /// callback (the notify bridge).
    pub(crate) fn raw_sender(&self) -> mpsc::UnboundedSender<FileChange> {
        self.tx.clone()
    }

    /// Close the queue, flush whatever is pending, and wait for the worker
    /// up to the given grace period.
    pub async fn shutdown(mut self, grace: Duration) {
        drop(self.tx);
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(grace, worker).await.is_err() {
                error!("debounce worker did not drain within grace period");
            }
        }
    }
}

struct Pending {
    /// Coalesced event per path
    events: HashMap<PathBuf, FileEvent>,
    /// Insertion order of live paths
    order: Vec<PathBuf>,
}

impl Pending {
    fn new() -> Self {
        Self {
            events: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn apply(&mut self, change: FileChange) {
        let FileChange { event, path } = change;
        match self.events.get(&path) {
            None => {
                self.events.insert(path.clone(), event);
                self.order.push(path);
            }
            Some(FileEvent::Created) => match event {
                // Creation followed by edits is still a creation
                FileEvent::Modified => {}
                // Created then deleted inside the window: a no-op
                FileEvent::Deleted => {
                    self.events.remove(&path);
                    self.order.retain(|p| p != &path);
                }
                FileEvent::Created => {}
            },
            Some(FileEvent::Modified) => match event {
                FileEvent::Modified => {}
                other => {
                    self.events.insert(path, other);
                }
            },
            Some(FileEvent::Deleted) => {
                // Delete then recreate: latest wins
                self.events.insert(path, event);
            }
        }
    }

    fn drain(&mut self) -> Vec<FileChange> {
        let mut batch = Vec::with_capacity(self.events.len());
        for path in self.order.drain(..) {
            if let Some(event) = self.events.remove(&path) {
                batch.push(FileChange::new(event, path));
            }
        }
        batch
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<FileChange>,
    window: Duration,
    batch_cap: usize,
    mut flush: FlushFn,
) {
    let mut pending = Pending::new();

    let mut do_flush = |pending: &mut Pending| {
        let batch = pending.drain();
        if batch.is_empty() {
            return;
        }
        debug!(events = batch.len(), "flushing debounced file events");
        if let Err(e) = flush(batch) {
            error!(error = %e, "flush callback failed; watcher continues");
        }
    };

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(change) => pending.apply(change),
                None => break,
            }
            continue;
        }

        if pending.len() >= batch_cap {
            do_flush(&mut pending);
            continue;
        }

        // Each new event restarts the quiescence window
        let deadline = tokio::time::Instant::now() + window;
        tokio::select! {
            change = rx.recv() => match change {
                Some(change) => pending.apply(change),
                None => {
                    do_flush(&mut pending);
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                do_flush(&mut pending);
            }
        }
    }

    // Channel closed with nothing buffered mid-loop; drain stragglers
    do_flush(&mut pending);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> (Arc<Mutex<Vec<Vec<FileChange>>>>, FlushFn) {
        let batches: Arc<Mutex<Vec<Vec<FileChange>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let flush: FlushFn = Box::new(move |batch| {
            sink.lock().unwrap().push(batch);
            Ok(())
        });
        (batches, flush)
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_modifications_collapse() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Modified, path("a.py"));
        queue.add(FileEvent::Modified, path("a.py"));
        queue.add(FileEvent::Modified, path("a.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![FileChange::new(FileEvent::Modified, path("a.py"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn created_then_deleted_flushes_nothing() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Created, path("tmp.py"));
        queue.add(FileEvent::Deleted, path("tmp.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        assert!(batches.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn created_then_modified_stays_created() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Created, path("new.py"));
        queue.add(FileEvent::Modified, path("new.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(
            batches[0],
            vec![FileChange::new(FileEvent::Created, path("new.py"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn modified_then_deleted_becomes_deleted() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Modified, path("gone.py"));
        queue.add(FileEvent::Deleted, path("gone.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        let batches = batches.lock().unwrap();
        assert_eq!(
            batches[0],
            vec![FileChange::new(FileEvent::Deleted, path("gone.py"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quiescence_window_flushes_without_shutdown() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Modified, path("a.py"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(batches.lock().unwrap().len(), 1);
        queue.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn batch_cap_forces_flush() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_secs(60), 3, flush);

        queue.add(FileEvent::Modified, path("a.py"));
        queue.add(FileEvent::Modified, path("b.py"));
        queue.add(FileEvent::Modified, path("c.py"));
        // Give the worker a chance to observe the cap
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(batches.lock().unwrap()[0].len(), 3);
        queue.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn per_path_order_is_preserved() {
        let (batches, flush) = collector();
        let queue = DebounceQueue::new(Duration::from_millis(200), 64, flush);

        queue.add(FileEvent::Created, path("a.py"));
        queue.add(FileEvent::Modified, path("b.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        let batches = batches.lock().unwrap();
        let paths: Vec<&PathBuf> = batches[0].iter().map(|c| &c.path).collect();
        assert_eq!(paths, [&path("a.py"), &path("b.py")]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_errors_do_not_stop_the_worker() {
        let calls = Arc::new(Mutex::new(0usize));
        let counter = calls.clone();
        let flush: FlushFn = Box::new(move |_batch| {
            *counter.lock().unwrap() += 1;
            anyhow::bail!("indexing blew up")
        });
        let queue = DebounceQueue::new(Duration::from_millis(100), 64, flush);

        queue.add(FileEvent::Modified, path("a.py"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        queue.add(FileEvent::Modified, path("b.py"));
        queue.shutdown(Duration::from_secs(5)).await;

        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
