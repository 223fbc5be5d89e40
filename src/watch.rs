//! File watching for loaded config files.
//!
//! The aggregator does not talk to the OS directly. It asks a
//! [`ChangeNotifier`] to report changes for a path, filters the reported
//! [`ChangeSet`] down to that path, and runs the reload action for it.
//!
//! [`NotifyNotifier`] is the stock notifier. It watches the file's parent
//! directory (so editors that save by rename are still seen) and debounces
//! rapid writes into one change set.

use crate::error::{FigiError, Result};
use notify_debouncer_mini::{DebounceEventResult, DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Paths reported by one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub modified: Vec<PathBuf>,
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            modified: vec![path.into()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Every reported path.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.modified
            .iter()
            .chain(&self.added)
            .chain(&self.removed)
            .map(PathBuf::as_path)
    }

    /// Whether any reported path refers to `target`.
    pub fn touches(&self, target: &Path) -> bool {
        self.paths().any(|path| same_file(path, target))
    }
}

/// Compare two paths, tolerating symlinked parent directories
/// (`/var` vs `/private/var` on macOS).
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if a.file_name() != b.file_name() {
        return false;
    }
    match (
        a.parent().and_then(|p| p.canonicalize().ok()),
        b.parent().and_then(|p| p.canonicalize().ok()),
    ) {
        (Some(pa), Some(pb)) => pa == pb,
        _ => false,
    }
}

/// Callback a notifier invokes with every batch of changes.
pub type ChangeHandler = Box<dyn Fn(ChangeSet) + Send + Sync>;

/// Keeps a notifier subscription alive; dropping it stops notifications.
pub type WatchGuard = Box<dyn Send>;

/// Reports file changes.
pub trait ChangeNotifier: Send + Sync {
    fn watch(&self, path: &Path, on_change: ChangeHandler) -> Result<WatchGuard>;
}

/// Configuration for the stock file notifier.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Notifier backed by `notify` with debouncing.
#[derive(Debug, Clone, Default)]
pub struct NotifyNotifier {
    config: WatcherConfig,
}

impl NotifyNotifier {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }
}

impl ChangeNotifier for NotifyNotifier {
    fn watch(&self, path: &Path, on_change: ChangeHandler) -> Result<WatchGuard> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !dir.exists() {
            return Err(FigiError::file_not_found(dir, None));
        }

        let (notify_tx, notify_rx) = mpsc::channel();
        let mut debouncer = new_debouncer(self.config.debounce_duration, notify_tx)?;
        debouncer
            .watcher()
            .watch(dir, notify::RecursiveMode::NonRecursive)?;
        info!("Watching config file: {}", path.display());

        // The thread ends once the debouncer (and with it the sender) is dropped.
        let label = path.display().to_string();
        std::thread::Builder::new()
            .name("figi-watch".to_string())
            .spawn(move || process_notify_events(notify_rx, on_change, &label))
            .map_err(|e| FigiError::config(format!("Failed to spawn watcher thread: {e}")))?;

        Ok(Box::new(debouncer))
    }
}

/// Forward debounced events to the handler until the channel closes.
fn process_notify_events(
    rx: mpsc::Receiver<DebounceEventResult>,
    handler: ChangeHandler,
    label: &str,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changes = classify_events(events);
                if !changes.is_empty() {
                    debug!("Change detected near {}: {:?}", label, changes);
                    handler(changes);
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error for {}: {}", label, e);
            }
            Err(_) => {
                info!("Watcher for {} stopped", label);
                return;
            }
        }
    }
}

/// Sort debounced events into modified and removed paths.
fn classify_events(events: Vec<notify_debouncer_mini::DebouncedEvent>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for event in events {
        if !matches!(
            event.kind,
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
        ) {
            continue;
        }
        if event.path.exists() {
            changes.modified.push(event.path);
        } else {
            changes.removed.push(event.path);
        }
    }
    changes
}

/// Reloads one file. The flag reports whether the watch is still live and is
/// checked again right before the reloaded tree is stored.
pub(crate) type ReloadAction = Arc<dyn Fn(&AtomicBool) + Send + Sync>;

/// A live watch on one file. Dropping it unsubscribes and makes any reload
/// still in flight discard its result.
pub(crate) struct FileWatch {
    path: PathBuf,
    reload: ReloadAction,
    active: Arc<AtomicBool>,
    _guard: WatchGuard,
}

impl FileWatch {
    /// Subscribe to `path` through `notifier`; `reload` runs for every change
    /// set that touches the path.
    pub(crate) fn start(
        notifier: &dyn ChangeNotifier,
        path: PathBuf,
        reload: ReloadAction,
    ) -> Result<Self> {
        let active = Arc::new(AtomicBool::new(true));
        let target = path.clone();
        let on_reload = Arc::clone(&reload);
        let live = Arc::clone(&active);
        let guard = notifier.watch(
            &path,
            Box::new(move |changes: ChangeSet| {
                if live.load(Ordering::Acquire) && changes.touches(&target) {
                    on_reload(&live);
                }
            }),
        )?;
        Ok(Self {
            path,
            reload,
            active,
            _guard: guard,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Run the reload as if a change had been reported. The returned closure
    /// can be called after the watch map lock is released.
    pub(crate) fn trigger(&self) -> impl Fn() + Send + Sync + use<> {
        let reload = Arc::clone(&self.reload);
        let active = Arc::clone(&self.active);
        move || reload(&active)
    }
}

impl Drop for FileWatch {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
