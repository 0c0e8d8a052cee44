//! Name-keyed handler tables
//!
//! Three independent tables exist per endpoint (events, call methods,
//! transaction types). They are populated on a builder before any traffic is
//! processed and are read-only afterwards, so lookups need no locking.

use std::collections::HashMap;

/// Immutable-after-setup mapping from a name to a registered callback.
pub(crate) struct HandlerTable<H> {
    entries: HashMap<String, H>,
}

impl<H> HandlerTable<H> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a callback. The last registration for a name wins.
    pub(crate) fn register(&mut self, name: impl Into<String>, handler: H) {
        self.entries.insert(name.into(), handler);
    }

    /// Exact-match lookup.
    pub(crate) fn get(&self, name: &str) -> Option<&H> {
        self.entries.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let mut table = HandlerTable::new();
        table.register("ping", 1);
        table.register("ping", 2);

        assert_eq!(table.get("ping"), Some(&2));
    }

    #[test]
    fn test_missing_entry_is_none() {
        let table: HandlerTable<u32> = HandlerTable::new();
        assert_eq!(table.get("absent"), None);
    }
}
