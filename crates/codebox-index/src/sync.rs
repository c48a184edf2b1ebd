//! Filesystem watcher that keeps a project's index current.
//!
//! Events are debounced per file and collected into a coalescing queue.
//! A single consumer drains the queue into incremental builds, so bursts of
//! saves produce one rebuild of the affected files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codebox_core::{CodeboxError, Result};
use codebox_scan::WalkOptions;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::builder::BuildOptions;
use crate::project::Project;

/// Pending paths above this count collapse into a full incremental scan.
const QUEUE_CAPACITY: usize = 4096;

/// Wait before retrying when another build holds the lock.
const BUSY_RETRY: Duration = Duration::from_millis(250);

/// Collects per-file events until each file has been quiet for `window`.
///
/// A file flushes once its own last event is older than `window`. When
/// `max_batch` files are pending, everything flushes at once.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use codebox_index::sync::Debouncer;
/// use tokio::time::Instant;
///
/// let mut debouncer = Debouncer::new(Duration::from_millis(100), 10);
/// let start = Instant::now();
/// debouncer.record(PathBuf::from("a.rs"), start);
/// debouncer.record(PathBuf::from("a.rs"), start + Duration::from_millis(50));
/// assert!(debouncer.take_ready(start + Duration::from_millis(100)).is_empty());
/// assert_eq!(debouncer.take_ready(start + Duration::from_millis(150)).len(), 1);
/// ```
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_batch: usize,
    pending: BTreeMap<PathBuf, Instant>,
}

impl Debouncer {
    /// Debouncer with quiet period `window` and flush size `max_batch`.
    pub fn new(window: Duration, max_batch: usize) -> Self {
        Self {
            window,
            max_batch: max_batch.max(1),
            pending: BTreeMap::new(),
        }
    }

    /// Note an event on `path` at `now`, restarting its quiet period.
    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now);
    }

    /// Whether no file is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// When the earliest pending file becomes ready.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().map(|last| *last + self.window)
    }

    /// Remove and return every file that is ready at `now`.
    pub fn take_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        if self.pending.len() >= self.max_batch {
            return std::mem::take(&mut self.pending).into_keys().collect();
        }
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= self.window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready
    }
}

/// What the next incremental build should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSync {
    /// Only these paths changed.
    Paths(BTreeSet<PathBuf>),
    /// Too many changes to track; scan everything.
    All,
}

impl PendingSync {
    fn merge(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        if let PendingSync::Paths(set) = self {
            set.extend(paths);
            if set.len() > QUEUE_CAPACITY {
                *self = PendingSync::All;
            }
        }
    }

    fn into_hint(self) -> Option<Vec<PathBuf>> {
        match self {
            PendingSync::Paths(set) => Some(set.into_iter().collect()),
            PendingSync::All => None,
        }
    }
}

/// Holds at most one pending rebuild; new requests merge into it.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use codebox_index::sync::{PendingSync, RebuildQueue};
///
/// let queue = RebuildQueue::default();
/// queue.enqueue(vec![PathBuf::from("a.rs")]);
/// queue.enqueue(vec![PathBuf::from("b.rs"), PathBuf::from("a.rs")]);
/// match queue.take() {
///     Some(PendingSync::Paths(paths)) => assert_eq!(paths.len(), 2),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert!(queue.take().is_none());
/// ```
#[derive(Debug, Default)]
pub struct RebuildQueue {
    pending: Mutex<Option<PendingSync>>,
    notify: Notify,
}

impl RebuildQueue {
    /// Merge `paths` into the pending request.
    pub fn enqueue(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        self.merge(PendingSync::Paths(paths.into_iter().collect()));
    }

    /// Merge a whole pending request, as when a build must be retried.
    pub fn requeue(&self, sync: PendingSync) {
        self.merge(sync);
    }

    fn merge(&self, sync: PendingSync) {
        {
            let mut guard = match self.pending.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let merged = match (guard.take(), sync) {
                (None, sync) => sync,
                (Some(mut current), PendingSync::Paths(paths)) => {
                    current.merge(paths);
                    current
                }
                (Some(_), PendingSync::All) => PendingSync::All,
            };
            *guard = Some(merged);
        }
        self.notify.notify_one();
    }

    /// Take the pending request, leaving the queue empty.
    pub fn take(&self) -> Option<PendingSync> {
        match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Wait until something is enqueued.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Filesystem watch on a project root, released on drop.
struct WatchGuard {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl WatchGuard {
    fn acquire(root: &Path, tx: mpsc::UnboundedSender<notify::Result<Event>>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| CodeboxError::Watch(e.to_string()))?;
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| CodeboxError::Watch(format!("{}: {e}", root.display())))?;
        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            tracing::debug!(root = %self.root.display(), error = %e, "unwatch failed");
        }
        tracing::debug!(root = %self.root.display(), "filesystem watch released");
    }
}

/// Decides which event paths matter to the index.
#[derive(Debug, Clone)]
struct EventFilter {
    root: PathBuf,
    data_dir: PathBuf,
    walk: WalkOptions,
}

impl EventFilter {
    /// Path relative to the root, or `None` when the event is irrelevant.
    fn relevant(&self, path: &Path) -> Option<PathBuf> {
        if path.starts_with(&self.data_dir) {
            return None;
        }
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() || self.walk.is_ignored(relative) {
            return None;
        }
        Some(relative.to_path_buf())
    }
}

fn is_content_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    )
}

/// A running watcher.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SyncHandle {
    /// Ask the watcher to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the control loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the control loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Watch`] if the loop stopped because its
    /// notification channel closed or the task panicked.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| CodeboxError::Watch(format!("watcher task failed: {e}")))?
    }
}

/// Watch `project` until `cancel` fires or the root disappears.
pub(crate) fn spawn_watcher(project: Arc<Project>, cancel: CancellationToken) -> Result<SyncHandle> {
    let (tx, rx) = mpsc::unbounded_channel();
    let guard = WatchGuard::acquire(project.root(), tx)?;
    let filter = EventFilter {
        root: project.root().to_path_buf(),
        data_dir: project.data_dir().to_path_buf(),
        walk: WalkOptions::from_config(&project.config().index),
    };
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        // Held for the lifetime of the task; dropped on every exit path.
        let _guard = guard;
        control_loop(project, filter, rx, task_cancel).await
    });
    Ok(SyncHandle { cancel, task })
}

async fn control_loop(
    project: Arc<Project>,
    filter: EventFilter,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) -> Result<()> {
    let settings = &project.config().sync;
    let mut debouncer = Debouncer::new(Duration::from_millis(settings.debounce_ms), settings.max_batch);
    let queue = Arc::new(RebuildQueue::default());
    let stop = cancel.child_token();
    let consumer = tokio::spawn(consume(Arc::clone(&project), Arc::clone(&queue), stop.clone()));
    tracing::info!(root = %filter.root.display(), "watching for changes");

    let outcome = loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            event = rx.recv() => match event {
                Some(Ok(event)) => {
                    if !is_content_event(&event.kind) {
                        continue;
                    }
                    if !filter.root.exists() {
                        tracing::warn!(root = %filter.root.display(), "project root removed, stopping watcher");
                        break Ok(());
                    }
                    let now = Instant::now();
                    for path in &event.paths {
                        if let Some(relative) = filter.relevant(path) {
                            debouncer.record(relative, now);
                        }
                    }
                    let ready = debouncer.take_ready(now);
                    queue.enqueue(ready);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "watch error");
                }
                None => {
                    tracing::warn!(root = %filter.root.display(), "watch channel closed, stopping watcher");
                    break Err(CodeboxError::Watch("notification channel closed".into()));
                }
            },
            _ = sleep_until(deadline), if deadline.is_some() => {
                let ready = debouncer.take_ready(Instant::now());
                queue.enqueue(ready);
            }
        }
    };

    stop.cancel();
    if let Err(e) = consumer.await {
        tracing::warn!(error = %e, "sync consumer failed");
    }
    tracing::info!(root = %filter.root.display(), "watcher stopped");
    outcome
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drain `queue` into incremental builds, one at a time.
async fn consume(project: Arc<Project>, queue: Arc<RebuildQueue>, stop: CancellationToken) {
    loop {
        let pending = match queue.take() {
            Some(pending) => pending,
            None => {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    () = queue.wait() => {}
                }
                continue;
            }
        };
        let hint = pending.clone().into_hint();
        let options = BuildOptions {
            cancel: stop.child_token(),
            ..BuildOptions::default()
        };
        let outcome = match hint {
            Some(paths) => project.sync_paths(paths, options).await,
            None => project.incremental_sync(options).await,
        };
        match outcome {
            Ok(report) => tracing::info!(
                generation = report.generation_id,
                rebuilt = report.files_rebuilt,
                removed = report.files_removed,
                "index synced"
            ),
            Err(CodeboxError::BuildInProgress(_)) => {
                queue.requeue(pending);
                tokio::select! {
                    _ = stop.cancelled() => return,
                    () = tokio::time::sleep(BUSY_RETRY) => {}
                }
            }
            Err(CodeboxError::Cancelled(_)) => return,
            Err(e) => tracing::warn!(error = %e, "incremental sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebox_core::IndexConfig;

    #[test]
    fn bursts_on_one_file_collapse() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100), 10);
        let start = Instant::now();
        for step in 0..5 {
            debouncer.record(PathBuf::from("a.rs"), start + Duration::from_millis(step * 30));
        }
        assert!(
            debouncer.take_ready(start + Duration::from_millis(150)).is_empty(),
            "last event at 120ms is still inside the window"
        );
        assert_eq!(
            debouncer.take_ready(start + Duration::from_millis(220)),
            vec![PathBuf::from("a.rs")]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn quiet_files_flush_independently() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100), 10);
        let start = Instant::now();
        debouncer.record(PathBuf::from("a.rs"), start);
        debouncer.record(PathBuf::from("b.rs"), start + Duration::from_millis(80));
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(
            debouncer.take_ready(start + Duration::from_millis(100)),
            vec![PathBuf::from("a.rs")]
        );
        assert_eq!(debouncer.next_deadline(), Some(start + Duration::from_millis(180)));
    }

    #[test]
    fn full_batch_flushes_early() {
        let mut debouncer = Debouncer::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        for name in ["a.rs", "b.rs", "c.rs"] {
            debouncer.record(PathBuf::from(name), now);
        }
        assert_eq!(debouncer.take_ready(now).len(), 3);
    }

    #[test]
    fn queue_coalesces_and_overflows_to_full_scan() {
        let queue = RebuildQueue::default();
        let many: Vec<PathBuf> = (0..=QUEUE_CAPACITY).map(|i| PathBuf::from(format!("f{i}.rs"))).collect();
        queue.enqueue(many);
        queue.enqueue(vec![PathBuf::from("late.rs")]);
        assert_eq!(queue.take(), Some(PendingSync::All));
        assert_eq!(queue.take(), None);
    }

    #[test]
    fn requeue_merges_with_newer_paths() {
        let queue = RebuildQueue::default();
        queue.enqueue(vec![PathBuf::from("new.rs")]);
        queue.requeue(PendingSync::Paths([PathBuf::from("old.rs")].into_iter().collect()));
        let Some(PendingSync::Paths(paths)) = queue.take() else {
            panic!("expected paths");
        };
        assert!(paths.contains(Path::new("new.rs")) && paths.contains(Path::new("old.rs")));
    }

    #[test]
    fn filter_drops_data_dir_and_ignored_paths() {
        let filter = EventFilter {
            root: PathBuf::from("/repo"),
            data_dir: PathBuf::from("/repo/.codebox"),
            walk: WalkOptions::from_config(&IndexConfig::default()),
        };
        assert_eq!(filter.relevant(Path::new("/repo/src/a.rs")), Some(PathBuf::from("src/a.rs")));
        assert_eq!(filter.relevant(Path::new("/repo/.codebox/gen-000001.db")), None);
        assert_eq!(filter.relevant(Path::new("/repo/node_modules/x/index.js")), None);
        assert_eq!(filter.relevant(Path::new("/elsewhere/a.rs")), None);
        assert_eq!(filter.relevant(Path::new("/repo")), None);
    }
}
