//! Key aliasing.
//!
//! Aliases map a caller-facing key onto its canonical dotted key. Lookups are
//! a single hop: `a -> b` and `b -> c` resolve `a` to `b`, never to `c`.

use std::collections::HashMap;

/// Alias key to canonical key table.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` as another name for `canonical`. Re-registering an
    /// alias replaces its target.
    pub fn register(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    /// Resolve a key to its canonical form, or return it unchanged.
    pub fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        self.aliases.get(key).map(String::as_str).unwrap_or(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_alias() {
        let mut table = AliasTable::new();
        table.register("db_host", "database.host");
        assert_eq!(table.resolve("db_host"), "database.host");
    }

    #[test]
    fn test_unknown_key_passes_through() {
        let table = AliasTable::new();
        assert_eq!(table.resolve("database.port"), "database.port");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let mut table = AliasTable::new();
        table.register("db_host", "database.host");
        assert_eq!(table.resolve("DB_HOST"), "DB_HOST");
    }

    #[test]
    fn test_single_hop_only() {
        let mut table = AliasTable::new();
        table.register("a", "b");
        table.register("b", "c");
        assert_eq!(table.resolve("a"), "b");
        assert_eq!(table.resolve("b"), "c");
    }
}
