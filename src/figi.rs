//! The configuration aggregator.
//!
//! [`Figi`] owns the source buckets, the live table, the environment binder,
//! remote sources, and file watches. Sources merge in fixed priority order:
//!
//! 1. **defaults** - `set_default` / `set_defaults`
//! 2. **files** - `load_file` / `read_in_config`
//! 3. **remote** - `add_remote` + `start_remote` / `refresh_remote`
//! 4. **env** - `load_env` / `load_env_from`
//! 5. **cli** - `set` / `set_overrides`
//!
//! Every write rebuilds the live table; change callbacks fire only when the
//! merged content actually changed.

use crate::engine::{ChangeCallback, Engine};
use crate::env::EnvBinder;
use crate::error::{FigiError, Result};
use crate::files::{FileSearch, read_file};
use crate::parser::{ConfigParser, DefaultParser};
use crate::remote::{RemoteLoader, RemoteSource};
use crate::snapshot::Snapshot;
use crate::store::SourceTag;
use crate::watch::{ChangeNotifier, FileWatch, NotifyNotifier, ReloadAction, WatcherConfig};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Entry name used for `set_default` / `set_defaults`.
pub const DEFAULTS_ENTRY: &str = "defaults";
/// Entry name used for `set` / `set_overrides`.
pub const OVERRIDES_ENTRY: &str = "overrides";
/// Entry name used for the environment snapshot.
pub const ENV_ENTRY: &str = "process";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Figi`].
pub struct FigiBuilder {
    env: EnvBinder,
    search: FileSearch,
    parser: Arc<dyn ConfigParser>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    watcher_config: WatcherConfig,
}

impl Default for FigiBuilder {
    fn default() -> Self {
        Self {
            env: EnvBinder::new(),
            search: FileSearch::default(),
            parser: Arc::new(DefaultParser),
            notifier: None,
            watcher_config: WatcherConfig::default(),
        }
    }
}

impl FigiBuilder {
    /// Enable env auto-binding for `PREFIX_...` variables.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env.set_prefix(prefix);
        self
    }

    pub fn env_separator(mut self, separator: impl Into<String>) -> Self {
        self.env.set_separator(separator);
        self
    }

    /// Base file name probed by `read_in_config`.
    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        self.search.set_name(name);
        self
    }

    /// Add a search directory for `read_in_config`.
    pub fn config_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search.add_path(dir);
        self
    }

    pub fn parser(mut self, parser: impl ConfigParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn notifier(mut self, notifier: impl ChangeNotifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Debounce settings for the stock notifier. Ignored with a custom notifier.
    pub fn watcher_config(mut self, config: WatcherConfig) -> Self {
        self.watcher_config = config;
        self
    }

    pub fn build(self) -> Figi {
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(NotifyNotifier::new(self.watcher_config)));
        Figi {
            engine: Arc::new(Engine::new()),
            parser: self.parser,
            notifier,
            env: RwLock::new(self.env.clone()),
            search: RwLock::new(self.search.clone()),
            initial_env: self.env,
            initial_search: self.search,
            remotes: Mutex::new(BTreeMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }
}

/// Layered configuration aggregator.
pub struct Figi {
    engine: Arc<Engine>,
    parser: Arc<dyn ConfigParser>,
    notifier: Arc<dyn ChangeNotifier>,
    env: RwLock<EnvBinder>,
    search: RwLock<FileSearch>,
    initial_env: EnvBinder,
    initial_search: FileSearch,
    remotes: Mutex<BTreeMap<String, Arc<RemoteSource>>>,
    watchers: Mutex<HashMap<PathBuf, FileWatch>>,
}

impl Default for Figi {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Figi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Figi")
            .field("table", &self.engine.live())
            .field("remotes", &self.remote_names())
            .field("watched_files", &self.watched_files())
            .finish_non_exhaustive()
    }
}

impl Figi {
    /// An empty aggregator with the default parser and notifier.
    pub fn new() -> Self {
        FigiBuilder::default().build()
    }

    pub fn builder() -> FigiBuilder {
        FigiBuilder::default()
    }

    // ----- aliases -----

    /// Make `alias` another name for `canonical` on reads and writes.
    pub fn register_alias(&self, alias: &str, canonical: &str) {
        self.engine.register_alias(alias, canonical);
    }

    /// Canonical form of a key.
    pub fn resolve_key(&self, key: &str) -> String {
        self.engine.resolve(key)
    }

    // ----- defaults and overrides -----

    pub fn set_default(&self, key: &str, value: impl Into<Value>) {
        self.engine
            .set_key(SourceTag::Defaults, DEFAULTS_ENTRY, key, &value.into());
    }

    /// Merge a whole tree into the defaults.
    pub fn set_defaults(&self, tree: &Value) -> Result<()> {
        require_mapping("defaults", tree)?;
        self.engine
            .merge_entry(SourceTag::Defaults, DEFAULTS_ENTRY, tree);
        Ok(())
    }

    /// Runtime override; beats every other source.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.engine
            .set_key(SourceTag::Cli, OVERRIDES_ENTRY, key, &value.into());
    }

    /// Merge a whole override block.
    pub fn set_overrides(&self, tree: &Value) -> Result<()> {
        require_mapping("overrides", tree)?;
        self.engine.merge_entry(SourceTag::Cli, OVERRIDES_ENTRY, tree);
        Ok(())
    }

    pub fn clear_overrides(&self) {
        self.engine.clear(SourceTag::Cli, None);
    }

    /// Drop one entry (or the whole bucket when `name` is `None`) from a source.
    pub fn clear_source(&self, tag: SourceTag, name: Option<&str>) -> bool {
        self.engine.clear(tag, name)
    }

    /// Store a tree directly under a source entry.
    pub fn set_source(&self, tag: SourceTag, name: &str, tree: &Value) -> Result<bool> {
        require_mapping(name, tree)?;
        Ok(self.engine.set_entry(tag, name, tree))
    }

    /// Entry names loaded under a source, in merge order.
    pub fn source_entries(&self, tag: SourceTag) -> Vec<String> {
        self.engine.entry_names(tag)
    }

    /// Re-merge all sources. Returns whether the live table changed.
    pub fn rebuild(&self) -> bool {
        self.engine.rebuild()
    }

    // ----- files -----

    pub fn add_config_path(&self, dir: impl Into<PathBuf>) {
        self.search
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_path(dir);
    }

    pub fn set_config_name(&self, name: impl Into<String>) {
        self.search
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_name(name);
    }

    /// Load a single file into the `files` source.
    ///
    /// The entry is keyed by the absolute path, so loading the same file
    /// again replaces it.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = absolute(path.as_ref())?;
        reload_file(&self.engine, self.parser.as_ref(), &path, || true)?;
        Ok(path)
    }

    /// Load a file and keep it live.
    pub fn load_file_and_watch(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.load_file(path)?;
        self.watch_file(&path)?;
        Ok(path)
    }

    /// Discover and load `<dir>/<name>.{json,yml,yaml,toml}` across all search
    /// directories. Returns the loaded paths in merge order.
    pub fn read_in_config(&self) -> Result<Vec<PathBuf>> {
        let search = self
            .search
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(name) = search.name.clone() else {
            return Err(FigiError::config("No config name set"));
        };

        let found = search.discover();
        if found.is_empty() {
            return Err(FigiError::file_not_found(name, None));
        }

        let mut loaded = Vec::with_capacity(found.len());
        for path in found {
            loaded.push(self.load_file(&path)?);
        }
        info!("Loaded {} config file(s) for '{}'", loaded.len(), name);
        Ok(loaded)
    }

    /// `read_in_config`, then watch every loaded file.
    pub fn read_in_config_and_watch(&self) -> Result<Vec<PathBuf>> {
        let loaded = self.read_in_config()?;
        for path in &loaded {
            self.watch_file(path)?;
        }
        Ok(loaded)
    }

    /// Watch a file and reload it whenever it changes. Watching a path that is
    /// already watched does nothing.
    ///
    /// Reload failures (missing file, parse errors) are logged and the
    /// previous table stays in effect.
    pub fn watch_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = absolute(path.as_ref())?;
        let mut watchers = lock(&self.watchers);
        if watchers.contains_key(&path) {
            debug!("Already watching {}", path.display());
            return Ok(());
        }
        let reload = self.reload_action(&path);
        let watch = FileWatch::start(self.notifier.as_ref(), path.clone(), reload)?;
        watchers.insert(path, watch);
        Ok(())
    }

    /// Stop watching a file. Returns whether it was watched.
    pub fn unwatch_file(&self, path: impl AsRef<Path>) -> bool {
        match absolute(path.as_ref()) {
            Ok(path) => lock(&self.watchers).remove(&path).is_some(),
            Err(_) => false,
        }
    }

    pub fn watched_files(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock(&self.watchers)
            .values()
            .map(|watch| watch.path().to_path_buf())
            .collect();
        paths.sort();
        paths
    }

    /// Run the reload logic for `path` as if its watcher had fired. Works
    /// whether or not the path is watched; errors are logged, not returned.
    pub fn simulate_change(&self, path: impl AsRef<Path>) {
        let path = match absolute(path.as_ref()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot reload {}: {}", path.as_ref().display(), e);
                return;
            }
        };
        // Take the action out of the map first so callbacks can watch files.
        let trigger = lock(&self.watchers).get(&path).map(FileWatch::trigger);
        match trigger {
            Some(trigger) => trigger(),
            None => self.reload_action(&path)(&AtomicBool::new(true)),
        }
    }

    fn reload_action(&self, path: &Path) -> ReloadAction {
        let engine = Arc::clone(&self.engine);
        let parser = Arc::clone(&self.parser);
        let path = path.to_path_buf();
        Arc::new(move |active: &AtomicBool| {
            let still_watched = || active.load(Ordering::Acquire);
            match reload_file(&engine, parser.as_ref(), &path, still_watched) {
                Ok(changed) => {
                    info!(changed, "Reloaded config file {}", path.display());
                }
                Err(e) => {
                    warn!("Reload of {} failed, keeping previous config: {}", path.display(), e);
                }
            }
        })
    }

    // ----- environment -----

    pub fn set_env_prefix(&self, prefix: impl Into<String>) {
        self.env_mut().set_prefix(prefix);
    }

    pub fn set_env_separator(&self, separator: impl Into<String>) {
        self.env_mut().set_separator(separator);
    }

    pub fn set_env_formatter(&self, formatter: impl Fn(&[&str]) -> String + Send + Sync + 'static) {
        self.env_mut().set_formatter(formatter);
    }

    /// Bind one variable to a key with default coercion.
    pub fn bind_env(&self, var: impl Into<String>, key: impl Into<String>) {
        self.env_mut().bind(var, key);
    }

    /// Bind one variable to a key through a transformer.
    pub fn bind_env_with(
        &self,
        var: impl Into<String>,
        key: impl Into<String>,
        transformer: impl Fn(&str) -> Value + Send + Sync + 'static,
    ) {
        self.env_mut().bind_with(var, key, transformer);
    }

    fn env_mut(&self) -> std::sync::RwLockWriteGuard<'_, EnvBinder> {
        self.env.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the process environment into the `env` source. Variables that
    /// are not valid UTF-8 are skipped.
    pub fn load_env(&self) -> bool {
        self.load_env_from(crate::env::utf8_vars(std::env::vars_os()))
    }

    /// Read an injected environment snapshot into the `env` source, replacing
    /// whatever the previous load produced.
    pub fn load_env_from<I, K, V>(&self, snapshot: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let aliases = self.engine.aliases();
        let tree = self
            .env
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .read(snapshot, |key| aliases.resolve(key).to_string());
        self.engine.set_entry(SourceTag::Env, ENV_ENTRY, &tree)
    }

    // ----- remote sources -----

    /// Register a remote source. Re-registering a name stops and replaces the
    /// previous source. The source stays idle until started or refreshed.
    pub fn add_remote(
        &self,
        name: &str,
        loader: impl RemoteLoader + 'static,
        interval: Option<Duration>,
    ) -> Result<()> {
        let source = RemoteSource::new(name, Arc::new(loader), interval, Arc::clone(&self.engine))?;
        if let Some(previous) = lock(&self.remotes).insert(name.to_string(), Arc::new(source)) {
            previous.retire();
        }
        Ok(())
    }

    /// Stop and forget a remote source. Its last fetched tree is removed too.
    pub fn remove_remote(&self, name: &str) -> bool {
        let removed = lock(&self.remotes).remove(name);
        match removed {
            Some(source) => {
                source.retire();
                self.engine.clear(SourceTag::Remote, Some(name));
                true
            }
            None => false,
        }
    }

    fn remote(&self, name: &str) -> Result<Arc<RemoteSource>> {
        lock(&self.remotes)
            .get(name)
            .cloned()
            .ok_or_else(|| FigiError::config(format!("Unknown remote source '{name}'")))
    }

    /// Start a remote source: one fetch, or the polling loop when it has an interval.
    pub async fn start_remote(&self, name: &str) -> Result<()> {
        self.remote(name)?.start().await
    }

    pub fn stop_remote(&self, name: &str) -> Result<()> {
        self.remote(name)?.stop();
        Ok(())
    }

    /// Fetch a remote source now. Errors propagate.
    pub async fn refresh_remote(&self, name: &str) -> Result<bool> {
        self.remote(name)?.poll().await
    }

    /// Fetch every remote source once. All sources are attempted; the first
    /// error is returned.
    pub async fn refresh_all_remotes(&self) -> Result<()> {
        let sources: Vec<Arc<RemoteSource>> = lock(&self.remotes).values().cloned().collect();
        let mut first_error = None;
        for source in sources {
            if let Err(e) = source.poll().await {
                warn!(remote = %source.name(), "Refresh failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_remote_running(&self, name: &str) -> bool {
        lock(&self.remotes)
            .get(name)
            .is_some_and(|source| source.is_running())
    }

    pub fn remote_names(&self) -> Vec<String> {
        lock(&self.remotes).keys().cloned().collect()
    }

    // ----- reads -----

    /// Consistent view of the current table.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.engine.live(), self.engine.aliases())
    }

    /// The whole merged table.
    pub fn all_settings(&self) -> Value {
        Value::clone(&self.engine.live())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot().get(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.snapshot().is_set(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.snapshot().keys()
    }

    pub fn get_string(&self, key: &str, default: &str) -> Result<String> {
        self.snapshot().get_string(key, default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> Result<i64> {
        self.snapshot().get_int(key, default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> Result<f64> {
        self.snapshot().get_float(key, default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        self.snapshot().get_bool(key, default)
    }

    pub fn get_array(&self, key: &str, default: Vec<Value>) -> Result<Vec<Value>> {
        self.snapshot().get_array(key, default)
    }

    pub fn get_hash(&self, key: &str, default: Map<String, Value>) -> Result<Map<String, Value>> {
        self.snapshot().get_hash(key, default)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.snapshot().get_as(key)
    }

    // ----- change notification -----

    /// Register a callback for table changes. Callbacks run in registration
    /// order; errors and panics are logged and do not stop later callbacks.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        self.engine.on_change(callback);
    }

    // ----- lifecycle -----

    /// Stop all background work and return to the freshly built state.
    pub fn reset(&self) {
        let remotes = std::mem::take(&mut *lock(&self.remotes));
        for source in remotes.values() {
            source.retire();
        }
        let watchers = std::mem::take(&mut *lock(&self.watchers));
        drop(watchers);

        self.engine.reset();
        *self.env_mut() = self.initial_env.clone();
        *self.search.write().unwrap_or_else(PoisonError::into_inner) = self.initial_search.clone();
        info!("Configuration reset");
    }
}

impl Drop for Figi {
    fn drop(&mut self) {
        for source in lock(&self.remotes).values() {
            source.retire();
        }
    }
}

/// Read, parse, and store one file under `files/<path>`. The tree is dropped
/// when `may_store` returns false under the store lock.
fn reload_file(
    engine: &Engine,
    parser: &dyn ConfigParser,
    path: &Path,
    may_store: impl FnOnce() -> bool,
) -> Result<bool> {
    let tree = read_file(path, parser)?;
    let name = path.display().to_string();
    debug!("Loaded config file {}", name);
    Ok(engine.set_entry_if(SourceTag::Files, &name, &tree, may_store))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| FigiError::file_not_found(path, Some(e)))
}

fn require_mapping(origin: &str, tree: &Value) -> Result<()> {
    if tree.is_object() {
        Ok(())
    } else {
        Err(FigiError::parse(
            origin,
            format!(
                "top-level value must be a mapping, got {}",
                crate::tree::describe(tree)
            ),
        ))
    }
}
