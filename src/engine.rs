//! Shared merge state: source buckets, the live table, aliases, and change
//! callbacks.
//!
//! All writers go through the store mutex, so at most one rebuild runs at a
//! time. The live table is an `ArcSwap`: readers load a complete snapshot
//! without taking the lock and never observe a partial merge.
//!
//! Callbacks run after the lock is released, so a callback may call back into
//! the aggregator. Delivery is serialized: one thread at a time runs the
//! callbacks, always with the newest table, and a table older than one
//! already delivered is never delivered. Changes made while a round is running
//! (including from inside a callback) are coalesced into the next round.

use crate::alias::AliasTable;
use crate::store::{SourceStore, SourceTag};
use crate::tree::{self, merge_into};
use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Callback invoked with the new live table after a change.
pub type ChangeCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

pub(crate) struct Engine {
    store: Mutex<SourceStore>,
    live: ArcSwap<Value>,
    aliases: ArcSwap<AliasTable>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    /// Bumped under the store lock for every changed rebuild.
    generation: AtomicU64,
    /// Newest changed table not yet handed to callbacks.
    pending: Mutex<Option<(u64, Arc<Value>)>>,
    /// Set while one thread is running callbacks.
    delivering: AtomicBool,
    delivered: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self {
            store: Mutex::new(SourceStore::new()),
            live: ArcSwap::from_pointee(Value::Object(Map::new())),
            aliases: ArcSwap::from_pointee(AliasTable::new()),
            callbacks: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
            delivering: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        }
    }

    pub(crate) fn live(&self) -> Arc<Value> {
        self.live.load_full()
    }

    pub(crate) fn aliases(&self) -> Arc<AliasTable> {
        self.aliases.load_full()
    }

    pub(crate) fn register_alias(&self, alias: &str, canonical: &str) {
        self.aliases.rcu(|current| {
            let mut next = AliasTable::clone(current);
            next.register(alias, canonical);
            next
        });
    }

    pub(crate) fn resolve(&self, key: &str) -> String {
        self.aliases.load().resolve(key).to_string()
    }

    pub(crate) fn normalize(&self, raw: &Value) -> Value {
        tree::normalize(raw, &self.aliases.load())
    }

    /// Replace one bucket entry with a normalized copy of `raw`, then rebuild.
    pub(crate) fn set_entry(&self, tag: SourceTag, name: &str, raw: &Value) -> bool {
        self.set_entry_if(tag, name, raw, || true)
    }

    /// Like `set_entry`, but `may_store` is checked under the store lock and
    /// the write is dropped when it returns false. Background writers use this
    /// so nothing lands after their owner stopped or was reset.
    pub(crate) fn set_entry_if(
        &self,
        tag: SourceTag,
        name: &str,
        raw: &Value,
        may_store: impl FnOnce() -> bool,
    ) -> bool {
        let normalized = self.normalize(raw);
        self.mutate(|store| {
            if !may_store() {
                debug!(source = %tag, entry = name, "Discarded write from stopped source");
                return false;
            }
            store.set_bucket_entry(tag, name, normalized);
            true
        })
    }

    /// Merge `raw` into one bucket entry (creating it if needed), then rebuild.
    pub(crate) fn merge_entry(&self, tag: SourceTag, name: &str, raw: &Value) -> bool {
        let normalized = self.normalize(raw);
        self.mutate(|store| {
            let mut entry = match store.entry(tag, name) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            if let Value::Object(incoming) = &normalized {
                merge_into(&mut entry, incoming);
            }
            store.set_bucket_entry(tag, name, Value::Object(entry));
            true
        })
    }

    /// Assign one value at a key inside a bucket entry, then rebuild.
    pub(crate) fn set_key(&self, tag: SourceTag, name: &str, key: &str, value: &Value) -> bool {
        let canonical = self.resolve(key);
        let value = self.normalize(value);
        self.mutate(|store| {
            let mut entry = match store.entry(tag, name) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            tree::set_path(&mut entry, &canonical, value);
            store.set_bucket_entry(tag, name, Value::Object(entry));
            true
        })
    }

    pub(crate) fn clear(&self, tag: SourceTag, name: Option<&str>) -> bool {
        self.mutate(|store| {
            store.clear_bucket(tag, name);
            true
        })
    }

    pub(crate) fn entry_names(&self, tag: SourceTag) -> Vec<String> {
        lock(&self.store).entry_names(tag)
    }

    /// Re-merge without changing any bucket.
    pub(crate) fn rebuild(&self) -> bool {
        self.mutate(|_| true)
    }

    /// Apply a store mutation, rebuild, swap the live table, and notify
    /// callbacks if the content changed. Returns whether it changed.
    /// `apply` returns false to skip the rebuild entirely.
    fn mutate(&self, apply: impl FnOnce(&mut SourceStore) -> bool) -> bool {
        let changed_table = {
            let mut store = lock(&self.store);
            if !apply(&mut store) {
                return false;
            }
            let (table, changed) = store.rebuild();
            if changed {
                let table = Arc::new(table);
                self.live.store(Arc::clone(&table));
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                Some((generation, table))
            } else {
                None
            }
        };

        match changed_table {
            Some((generation, table)) => {
                debug!(generation, "Live table rebuilt with changes");
                self.deliver(generation, table);
                true
            }
            None => {
                debug!("Live table rebuilt, no changes");
                false
            }
        }
    }

    /// Queue a changed table and, unless another thread is already
    /// delivering, run callback rounds until nothing newer is pending.
    fn deliver(&self, generation: u64, table: Arc<Value>) {
        {
            let mut pending = lock(&self.pending);
            if pending.as_ref().is_none_or(|(queued, _)| *queued < generation) {
                *pending = Some((generation, table));
            }
        }

        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                // Release the pending lock before callbacks run; they may write.
                let next = lock(&self.pending).take();
                let Some((generation, table)) = next else {
                    break;
                };
                if generation <= self.delivered.load(Ordering::Acquire) {
                    continue;
                }
                self.delivered.store(generation, Ordering::Release);
                self.notify(&table);
            }
            self.delivering.store(false, Ordering::Release);
            // A writer may have queued after the last take but before the
            // flag was cleared; pick it up rather than strand it.
            if lock(&self.pending).is_none() {
                return;
            }
        }
    }

    pub(crate) fn on_change(&self, callback: ChangeCallback) {
        lock(&self.callbacks).push(callback);
    }

    /// Run every callback in registration order. Failures and panics are
    /// logged per callback and never reach the caller.
    fn notify(&self, table: &Value) {
        let callbacks: Vec<ChangeCallback> = lock(&self.callbacks).clone();
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(table))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(callback = index, "Change callback failed: {:#}", e);
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(callback = index, "Change callback panicked: {}", message);
                }
            }
        }
    }

    /// Drop all sources, aliases, and callbacks. Callbacks are not notified.
    pub(crate) fn reset(&self) {
        let mut store = lock(&self.store);
        store.clear();
        self.live.store(Arc::new(Value::Object(Map::new())));
        self.aliases.store(Arc::new(AliasTable::new()));
        lock(&self.callbacks).clear();
        lock(&self.pending).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn callback(
        f: impl Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ChangeCallback {
        Arc::new(f)
    }

    fn counting_callback(counter: &Arc<AtomicUsize>) -> ChangeCallback {
        let counter = Arc::clone(counter);
        callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_callbacks_only_on_change() {
        let engine = Engine::new();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.on_change(counting_callback(&calls));

        assert!(engine.set_entry(SourceTag::Files, "a", &json!({"a": 1})));
        assert!(!engine.rebuild());
        assert!(!engine.set_entry(SourceTag::Files, "a", &json!({"a": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callbacks_do_not_block_others() {
        let engine = Engine::new();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.on_change(callback(|_| anyhow::bail!("boom")));
        engine.on_change(callback(|_| panic!("kaboom")));
        engine.on_change(counting_callback(&calls));

        assert!(engine.set_entry(SourceTag::Cli, "overrides", &json!({"x": 1})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let engine = Engine::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = Arc::clone(&order);
            engine.on_change(callback(move |_| {
                order.lock().unwrap().push(id);
                Ok(())
            }));
        }
        engine.set_entry(SourceTag::Defaults, "defaults", &json!({"a": 1}));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_callback_receives_new_table() {
        let engine = Engine::new();
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        engine.on_change(callback(move |table| {
            *sink.lock().unwrap() = table.clone();
            Ok(())
        }));
        engine.set_entry(SourceTag::Env, "process", &json!({"service.enabled": true}));
        assert_eq!(*seen.lock().unwrap(), json!({"service": {"enabled": true}}));
    }

    #[test]
    fn test_callback_may_reenter() {
        let engine = Arc::new(Engine::new());
        let inner = Arc::clone(&engine);
        engine.on_change(callback(move |table| {
            if table.get("derived").is_none() {
                inner.set_key(SourceTag::Cli, "derived", "derived", &json!(true));
            }
            Ok(())
        }));
        engine.set_entry(SourceTag::Files, "a", &json!({"a": 1}));
        assert_eq!(*engine.live(), json!({"a": 1, "derived": true}));
    }

    #[test]
    fn test_last_delivered_table_is_live_table() {
        let engine = Arc::new(Engine::new());
        let last = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&last);
        engine.on_change(callback(move |table| {
            // Widen the window in which other writers race this round.
            std::thread::sleep(std::time::Duration::from_millis(1));
            *sink.lock().unwrap() = table.clone();
            Ok(())
        }));

        let writers: Vec<_> = (0..8)
            .map(|writer| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for step in 0..20 {
                        let value = json!([writer, step]);
                        engine.set_key(SourceTag::Cli, "overrides", "value", &value);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(*last.lock().unwrap(), *engine.live());
    }

    #[test]
    fn test_discarded_write_leaves_table_alone() {
        let engine = Engine::new();
        let calls = Arc::new(AtomicUsize::new(0));
        engine.on_change(counting_callback(&calls));

        assert!(!engine.set_entry_if(SourceTag::Remote, "kv", &json!({"a": 1}), || false));
        assert_eq!(*engine.live(), json!({}));
        assert!(engine.entry_names(SourceTag::Remote).is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_key_resolves_alias() {
        let engine = Engine::new();
        engine.register_alias("db_host", "database.host");
        engine.set_key(SourceTag::Cli, "overrides", "db_host", &json!("x"));
        assert_eq!(*engine.live(), json!({"database": {"host": "x"}}));
    }

    #[test]
    fn test_reset_clears_everything() {
        let engine = Engine::new();
        engine.register_alias("a", "b");
        engine.set_entry(SourceTag::Files, "a", &json!({"a": 1}));
        engine.reset();
        assert_eq!(*engine.live(), json!({}));
        assert_eq!(engine.resolve("a"), "a");
        assert!(engine.entry_names(SourceTag::Files).is_empty());
    }
}
