//! Remote configuration sources.
//!
//! A remote source wraps a caller-supplied loader. It can be polled on demand
//! or, when registered with an interval, refreshed by a background tokio task:
//!
//! - without an interval, `start` fetches once and the source stays idle
//! - with an interval, `start` (re)spawns the one polling loop; the first
//!   tick fires immediately
//! - `stop` ends the loop and is a no-op on an idle source
//! - a retired source (removed, replaced, or reset away) never stores again
//!
//! Stop and retirement are checked under the store lock right before a
//! fetched tree is stored, so a fetch that finishes after either is dropped.
//!
//! Failures inside the loop are logged and the loop waits for the next tick.

use crate::engine::Engine;
use crate::error::{FigiError, Result};
use crate::store::SourceTag;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Fetches a configuration tree from somewhere outside the process.
#[async_trait]
pub trait RemoteLoader: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F> RemoteLoader for F
where
    F: Fn() -> anyhow::Result<Value> + Send + Sync,
{
    async fn fetch(&self) -> anyhow::Result<Value> {
        self()
    }
}

/// Handle to a running poll loop.
struct PollTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn cancel(self) {
        let _ = self.shutdown.send(true);
        self.handle.abort();
    }
}

/// One registered remote source.
pub struct RemoteSource {
    name: String,
    loader: Arc<dyn RemoteLoader>,
    interval: Option<Duration>,
    engine: Arc<Engine>,
    task: Mutex<Option<PollTask>>,
    retired: Arc<AtomicBool>,
}

impl RemoteSource {
    pub(crate) fn new(
        name: &str,
        loader: Arc<dyn RemoteLoader>,
        interval: Option<Duration>,
        engine: Arc<Engine>,
    ) -> Result<Self> {
        if interval.is_some_and(|every| every.is_zero()) {
            return Err(FigiError::config(format!(
                "Remote source '{name}' needs a non-zero poll interval"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            loader,
            interval,
            engine,
            task: Mutex::new(None),
            retired: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch once and store the result. Fetch failures are returned as
    /// `RemoteError`. Returns whether the live table changed.
    pub async fn poll(&self) -> Result<bool> {
        let retired = &self.retired;
        poll_once(&self.name, self.loader.as_ref(), &self.engine, || {
            !retired.load(Ordering::Acquire)
        })
        .await
    }

    /// Start the source.
    ///
    /// Without an interval this is a single fetch whose error is returned.
    /// With an interval any running loop is stopped first, so there is never
    /// more than one loop per source. Needs a tokio runtime.
    pub async fn start(&self) -> Result<()> {
        let Some(every) = self.interval else {
            self.poll().await?;
            return Ok(());
        };

        self.stop();

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            FigiError::config(format!(
                "Remote source '{}' needs a tokio runtime to poll: {}",
                self.name, e
            ))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = self.name.clone();
        let loader = Arc::clone(&self.loader);
        let engine = Arc::clone(&self.engine);
        let retired = Arc::clone(&self.retired);
        let poll_loop = run_poll_loop(name, loader, engine, every, shutdown_rx, retired);
        let handle = runtime.spawn(poll_loop);

        info!(
            remote = %self.name,
            interval_ms = every.as_millis() as u64,
            "Remote polling started"
        );
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(PollTask {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the polling loop, if any.
    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.cancel();
            info!(remote = %self.name, "Remote polling stopped");
        }
    }

    /// Stop for good. Fetches still in flight are discarded and later polls
    /// store nothing.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.stop();
    }

    /// Whether a polling loop is active.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

impl Drop for RemoteSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn poll_once(
    name: &str,
    loader: &dyn RemoteLoader,
    engine: &Engine,
    may_store: impl FnOnce() -> bool,
) -> Result<bool> {
    let tree = loader
        .fetch()
        .await
        .map_err(|e| FigiError::remote(name, format!("{e:#}")))?;
    let tree = match tree {
        Value::Object(_) => tree,
        Value::Null => Value::Object(Map::new()),
        other => {
            return Err(FigiError::parse(
                format!("remote source '{name}'"),
                format!(
                    "top-level value must be a mapping, got {}",
                    crate::tree::describe(&other)
                ),
            ));
        }
    };
    debug!(remote = %name, "Fetched remote config");
    Ok(engine.set_entry_if(SourceTag::Remote, name, &tree, may_store))
}

async fn run_poll_loop(
    name: String,
    loader: Arc<dyn RemoteLoader>,
    engine: Arc<Engine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    retired: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Separate handle so the store check does not borrow the receiver the
    // select is waiting on.
    let stopped = shutdown.clone();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let may_store = || !*stopped.borrow() && !retired.load(Ordering::Acquire);
                if let Err(e) = poll_once(&name, loader.as_ref(), &engine, may_store).await {
                    warn!(remote = %name, "Background poll failed: {}", e);
                }
            }
        }
    }
    debug!(remote = %name, "Poll loop exited");
}
