//! Per-source configuration buckets and priority merging.
//!
//! Every fragment lives under a [`SourceTag`] and an entry name (a file path,
//! a remote source name, ...). Rebuilding folds entries within a tag in their
//! first-insert order, then folds the tags from lowest to highest priority.

use crate::tree::{deep_merge_all, merge_into};
use serde_json::{Map, Value};
use std::fmt;

/// Source priority classes (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTag {
    /// Registered defaults (lowest priority)
    Defaults = 0,
    /// Config files on disk
    Files = 1,
    /// Remote providers
    Remote = 2,
    /// Environment variables
    Env = 3,
    /// Runtime overrides (highest priority)
    Cli = 4,
}

impl SourceTag {
    /// All tags in merge order.
    pub const ALL: [SourceTag; 5] = [
        SourceTag::Defaults,
        SourceTag::Files,
        SourceTag::Remote,
        SourceTag::Env,
        SourceTag::Cli,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Defaults => "defaults",
            SourceTag::Files => "files",
            SourceTag::Remote => "remote",
            SourceTag::Env => "env",
            SourceTag::Cli => "cli",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named entries under one source tag, kept in first-insert order.
#[derive(Debug, Clone, Default)]
struct Bucket {
    entries: Vec<(String, Value)>,
}

impl Bucket {
    fn set(&mut self, name: &str, tree: Value) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = tree,
            None => self.entries.push((name.to_string(), tree)),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| n != name);
        before != self.entries.len()
    }

    fn merged(&self) -> Value {
        deep_merge_all(self.entries.iter().map(|(_, tree)| tree))
    }
}

/// All source buckets plus the last merged table.
#[derive(Debug, Clone)]
pub struct SourceStore {
    buckets: [Bucket; 5],
    table: Value,
}

impl Default for SourceStore {
    fn default() -> Self {
        Self {
            buckets: Default::default(),
            table: Value::Object(Map::new()),
        }
    }
}

impl SourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace one named entry under a tag.
    pub fn set_bucket_entry(&mut self, tag: SourceTag, name: &str, tree: Value) {
        self.buckets[tag as usize].set(name, tree);
    }

    /// Remove one entry, or the whole bucket when `name` is `None`.
    /// Returns whether anything was removed.
    pub fn clear_bucket(&mut self, tag: SourceTag, name: Option<&str>) -> bool {
        let bucket = &mut self.buckets[tag as usize];
        match name {
            Some(name) => bucket.remove(name),
            None => {
                let had_entries = !bucket.entries.is_empty();
                bucket.entries.clear();
                had_entries
            }
        }
    }

    /// Look up the tree stored for one entry.
    pub fn entry(&self, tag: SourceTag, name: &str) -> Option<&Value> {
        self.buckets[tag as usize]
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tree)| tree)
    }

    /// Entry names under a tag, in merge order.
    pub fn entry_names(&self, tag: SourceTag) -> Vec<String> {
        self.buckets[tag as usize]
            .entries
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Merge all buckets into a fresh table and report whether it differs
    /// structurally from the previous one.
    pub fn rebuild(&mut self) -> (Value, bool) {
        let mut merged = Map::new();
        for tag in SourceTag::ALL {
            if let Value::Object(layer) = self.buckets[tag as usize].merged() {
                merge_into(&mut merged, &layer);
            }
        }
        let table = Value::Object(merged);
        let changed = table != self.table;
        self.table = table.clone();
        (table, changed)
    }

    /// Drop every entry and forget the last table.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
