//! Workspace-to-object-store sync bridge.
//!
//! The filesystem sidecar reports every mutation of the lab workspace as a
//! [`SyncEvent`]. Events are buffered in a shared queue and replayed against
//! the object store in batches: a flush runs as soon as the queue reaches the
//! batch size, and a periodic tick drains whatever is left. Only one flush is
//! ever in flight.
//!
//! Delivery is at-least-once. A failed operation is logged and re-queued for a
//! later batch, never retried inside the batch that failed, and dropped once it
//! has been attempted `max_attempts` times. Later events touching the same key
//! or directory are held back behind it, so a retry never lands on top of
//! newer content.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::layout::WorkspaceScope;
use crate::store::{delete_prefix, move_path, ObjectStore};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Filesystem mutation reported by the workspace sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    Create { content: Vec<u8> },
    Update { content: Vec<u8> },
    CreateDir,
    Delete,
    DeleteDir,
    /// Rename `from` to the event path. Works for files and directories.
    Move { from: String },
    /// Audit only; nothing is written remotely.
    Read,
}

impl SyncOperation {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::CreateDir => "create_dir",
            Self::Delete => "delete",
            Self::DeleteDir => "delete_dir",
            Self::Move { .. } => "move",
            Self::Read => "read",
        }
    }
}

/// One queued mutation, addressed by a workspace-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub path: String,
    pub operation: SyncOperation,
    pub queued_at: DateTime<Utc>,
}

impl SyncEvent {
    #[must_use]
    pub fn new(path: impl Into<String>, operation: SyncOperation) -> Self {
        Self {
            path: path.into(),
            operation,
            queued_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn update(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::new(
            path,
            SyncOperation::Update {
                content: content.into(),
            },
        )
    }

    #[must_use]
    pub fn moved(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(to, SyncOperation::Move { from: from.into() })
    }
}

/// Batching policy for a [`SyncBridge`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub applied: usize,
    /// Failed or held back, and back in the queue
    pub requeued: usize,
    /// Not attempted because an earlier event on the same path failed
    pub deferred: usize,
    pub dropped: usize,
}

/// Running totals across all flushes.
#[derive(Debug, Default)]
pub struct SyncStats {
    flushes: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl SyncStats {
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Pending {
    event: SyncEvent,
    attempts: u32,
}

/// Buffers workspace events and replays them against the object store.
pub struct SyncBridge {
    store: Arc<dyn ObjectStore>,
    scope: WorkspaceScope,
    config: SyncConfig,
    queue: Mutex<Vec<Pending>>,
    flush_lock: tokio::sync::Mutex<()>,
    batch_ready: Notify,
    stats: SyncStats,
}

impl SyncBridge {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, scope: WorkspaceScope, config: SyncConfig) -> Self {
        Self {
            store,
            scope,
            config,
            queue: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            batch_ready: Notify::new(),
            stats: SyncStats::default(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Queue an event. Wakes the worker once a full batch is waiting.
    pub fn enqueue(&self, event: SyncEvent) {
        debug!(operation = event.operation.name(), path = %event.path, "Queued sync event");
        let len = {
            let mut queue = self.queue();
            queue.push(Pending { event, attempts: 0 });
            queue.len()
        };
        if len >= self.config.batch_size {
            self.batch_ready.notify_one();
        }
    }

    /// Replay everything currently queued.
    ///
    /// The queue is snapshotted and cleared up front, so events arriving during
    /// the flush wait for the next cycle.
    pub async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let batch = std::mem::take(&mut *self.queue());
        if batch.is_empty() {
            return FlushReport::default();
        }

        info!(count = batch.len(), lab_id = %self.scope.lab_id(), "Processing sync batch");
        let mut report = FlushReport {
            attempted: batch.len(),
            ..FlushReport::default()
        };
        let mut retry = Vec::new();
        let mut blocked: Vec<String> = Vec::new();

        for mut pending in batch {
            let touched = self.touched_keys(&pending.event);
            if touched
                .iter()
                .any(|key| blocked.iter().any(|b| keys_overlap(key, b)))
            {
                debug!(
                    operation = pending.event.operation.name(),
                    path = %pending.event.path,
                    "Holding back sync event behind a failed one"
                );
                report.deferred += 1;
                blocked.extend(touched);
                retry.push(pending);
                continue;
            }

            pending.attempts += 1;
            match self.apply(&pending.event).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    if pending.attempts >= self.config.max_attempts {
                        error!(
                            operation = pending.event.operation.name(),
                            path = %pending.event.path,
                            attempts = pending.attempts,
                            error = %e,
                            "Dropping sync event after repeated failures"
                        );
                        report.dropped += 1;
                    } else {
                        warn!(
                            operation = pending.event.operation.name(),
                            path = %pending.event.path,
                            attempt = pending.attempts,
                            error = %e,
                            "Sync event failed, will retry in a later batch"
                        );
                        blocked.extend(touched);
                        retry.push(pending);
                    }
                }
            }
        }

        // Retries are older than anything queued while this batch ran.
        report.requeued = retry.len();
        if !retry.is_empty() {
            let mut queue = self.queue();
            let newer = std::mem::replace(&mut *queue, retry);
            queue.extend(newer);
        }

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .applied
            .fetch_add(report.applied as u64, Ordering::Relaxed);
        self.stats
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        info!(
            applied = report.applied,
            requeued = report.requeued,
            dropped = report.dropped,
            "Completed sync batch"
        );
        report
    }

    /// Object keys an event reads or writes. Directory events cover their subtree.
    fn touched_keys(&self, event: &SyncEvent) -> Vec<String> {
        let key = self.scope.key_for(&event.path);
        match &event.operation {
            SyncOperation::Move { from } => vec![self.scope.key_for(from), key],
            SyncOperation::Read => Vec::new(),
            _ => vec![key],
        }
    }

    async fn apply(&self, event: &SyncEvent) -> Result<()> {
        let key = self.scope.key_for(&event.path);
        let store = self.store.as_ref();

        match &event.operation {
            SyncOperation::Create { content } | SyncOperation::Update { content } => {
                store.put(&key, content.clone()).await
            }
            SyncOperation::CreateDir => store.put(&format!("{key}/"), Vec::new()).await,
            SyncOperation::Delete => store.delete(&key).await,
            SyncOperation::DeleteDir => delete_prefix(store, &format!("{key}/")).await.map(|_| ()),
            SyncOperation::Move { from } => {
                move_path(store, &self.scope.key_for(from), &key).await.map(|_| ())
            }
            SyncOperation::Read => {
                debug!(path = %event.path, "Read recorded, no remote action");
                Ok(())
            }
        }
    }

    /// Start the background flusher.
    ///
    /// The worker flushes on every full batch and on every tick, and performs a
    /// final flush when `cancel` fires.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> SyncWorker {
        let bridge = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(
                batch_size = bridge.config.batch_size,
                interval_secs = bridge.config.flush_interval.as_secs(),
                "Sync worker started"
            );

            loop {
                tokio::select! {
                    biased;

                    () = token.cancelled() => {
                        bridge.flush().await;
                        break;
                    }

                    () = bridge.batch_ready.notified() => {
                        bridge.flush().await;
                    }

                    _ = ticker.tick() => {
                        if bridge.pending() > 0 {
                            bridge.flush().await;
                        }
                    }
                }
            }

            info!("Sync worker stopped");
        });

        SyncWorker { cancel, handle }
    }
}

/// Same key, or one is a directory containing the other.
fn keys_overlap(a: &str, b: &str) -> bool {
    let a = a.trim_end_matches('/');
    let b = b.trim_end_matches('/');
    a == b || is_under(a, b) || is_under(b, a)
}

fn is_under(key: &str, dir: &str) -> bool {
    key.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Handle to a running sync worker.
pub struct SyncWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Cancel the worker, wait for its final flush and join it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Sync worker terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryObjectStore;
    use crate::store::MockObjectStore;
    use crate::ObjectStoreError;

    fn bridge_with(store: Arc<dyn ObjectStore>) -> Arc<SyncBridge> {
        Arc::new(SyncBridge::new(
            store,
            WorkspaceScope::new("node", "lab1"),
            SyncConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_full_batch_is_flushed_in_one_cycle() {
        let mut mock = MockObjectStore::new();
        mock.expect_put()
            .withf(|key, _| key.starts_with("code/node/lab1/file"))
            .times(5)
            .returning(|_, _| Ok(()));
        let bridge = bridge_with(Arc::new(mock));

        for i in 0..5 {
            bridge.enqueue(SyncEvent::update(format!("/file{i}.js"), "x"));
        }
        let report = bridge.flush().await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.applied, 5);
        assert_eq!(bridge.pending(), 0);
        assert_eq!(bridge.stats().flushes(), 1);
    }

    #[tokio::test]
    async fn test_worker_flushes_when_batch_fills() {
        let store = Arc::new(MemoryObjectStore::new());
        let bridge = bridge_with(store.clone());
        let worker = bridge.spawn(CancellationToken::new());

        for i in 0..5 {
            bridge.enqueue(SyncEvent::update(format!("src/{i}.js"), vec![b'a'; i]));
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while bridge.stats().flushes() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(bridge.stats().flushes(), 1);
        assert_eq!(store.len(), 5);
        assert_eq!(bridge.pending(), 0);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_partial_batch() {
        let store = Arc::new(MemoryObjectStore::new());
        let bridge = bridge_with(store.clone());
        let worker = bridge.spawn(CancellationToken::new());

        bridge.enqueue(SyncEvent::new("notes", SyncOperation::CreateDir));
        worker.shutdown().await;

        assert!(store.contains("code/node/lab1/notes/"));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_requeued_then_dropped() {
        let mut mock = MockObjectStore::new();
        mock.expect_delete()
            .times(3)
            .returning(|key| Err(ObjectStoreError::request("delete", key, "503")));
        let bridge = bridge_with(Arc::new(mock));

        bridge.enqueue(SyncEvent::new("gone.txt", SyncOperation::Delete));

        let first = bridge.flush().await;
        assert_eq!((first.requeued, first.dropped), (1, 0));
        assert_eq!(bridge.pending(), 1);

        bridge.flush().await;
        let last = bridge.flush().await;
        assert_eq!((last.requeued, last.dropped), (0, 1));
        assert_eq!(bridge.pending(), 0);
        assert_eq!(bridge.stats().failed(), 3);
    }

    /// Fails the first `put` and delegates everything else.
    struct FirstPutFails {
        inner: MemoryObjectStore,
        failed: std::sync::atomic::AtomicBool,
    }

    impl FirstPutFails {
        fn new() -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                failed: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl ObjectStore for FirstPutFails {
        async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(ObjectStoreError::request("put", key, "503"));
            }
            self.inner.put(key, body).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn delete_many(&self, keys: &[String]) -> Result<()> {
            self.inner.delete_many(keys).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix).await
        }

        async fn copy(&self, from: &str, to: &str) -> Result<()> {
            self.inner.copy(from, to).await
        }
    }

    #[tokio::test]
    async fn test_retried_write_does_not_overwrite_newer_content() {
        let store = Arc::new(FirstPutFails::new());
        let bridge = bridge_with(store.clone());

        bridge.enqueue(SyncEvent::update("a.js", "v1"));
        bridge.enqueue(SyncEvent::update("a.js", "v2"));
        bridge.enqueue(SyncEvent::update("other.js", "x"));

        let first = bridge.flush().await;
        assert_eq!(first.applied, 1);
        assert_eq!(first.deferred, 1);
        assert_eq!(first.requeued, 2);
        assert!(store.inner.get("code/node/lab1/a.js").is_none());
        assert_eq!(store.inner.get("code/node/lab1/other.js"), Some(b"x".to_vec()));

        bridge.flush().await;
        assert_eq!(store.inner.get("code/node/lab1/a.js"), Some(b"v2".to_vec()));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn test_retried_write_does_not_resurrect_deleted_file() {
        let store = Arc::new(FirstPutFails::new());
        let bridge = bridge_with(store.clone());

        bridge.enqueue(SyncEvent::update("b.js", "draft"));
        bridge.enqueue(SyncEvent::new("b.js", SyncOperation::Delete));
        bridge.flush().await;
        bridge.flush().await;

        assert!(!store.inner.contains("code/node/lab1/b.js"));
        assert_eq!(bridge.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_holds_back_directory_removal() {
        let store = Arc::new(FirstPutFails::new());
        let bridge = bridge_with(store.clone());

        bridge.enqueue(SyncEvent::update("src/a.js", "a"));
        bridge.enqueue(SyncEvent::new("src", SyncOperation::DeleteDir));
        let first = bridge.flush().await;
        assert_eq!(first.deferred, 1);

        bridge.flush().await;
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_retries_run_before_events_queued_later() {
        let store = Arc::new(FirstPutFails::new());
        let bridge = bridge_with(store.clone());

        bridge.enqueue(SyncEvent::update("a.js", "v1"));
        bridge.flush().await;
        bridge.enqueue(SyncEvent::update("a.js", "v2"));
        bridge.flush().await;

        assert_eq!(store.inner.get("code/node/lab1/a.js"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_key_overlap() {
        assert!(keys_overlap("code/a.js", "code/a.js"));
        assert!(keys_overlap("code/src/", "code/src/a.js"));
        assert!(keys_overlap("code/src/a.js", "code/src"));
        assert!(!keys_overlap("code/a.js", "code/a.js.bak"));
        assert!(!keys_overlap("code/src", "code/srcx/a.js"));
    }

    #[tokio::test]
    async fn test_read_events_touch_nothing() {
        let mock = MockObjectStore::new();
        let bridge = bridge_with(Arc::new(mock));

        bridge.enqueue(SyncEvent::new("README.md", SyncOperation::Read));
        let report = bridge.flush().await;
        assert_eq!(report.applied, 1);
    }

    #[tokio::test]
    async fn test_directory_operations() {
        let store = Arc::new(MemoryObjectStore::new());
        let bridge = bridge_with(store.clone());

        bridge.enqueue(SyncEvent::new("src", SyncOperation::CreateDir));
        bridge.enqueue(SyncEvent::new(
            "src/a.js",
            SyncOperation::Create {
                content: b"a".to_vec(),
            },
        ));
        bridge.enqueue(SyncEvent::moved("src", "lib"));
        bridge.flush().await;
        assert!(store.contains("code/node/lab1/lib/"));
        assert!(store.contains("code/node/lab1/lib/a.js"));
        assert!(!store.contains("code/node/lab1/src/a.js"));

        bridge.enqueue(SyncEvent::new("lib", SyncOperation::DeleteDir));
        bridge.flush().await;
        assert!(store.is_empty());
    }
}
