//! Static alias directory
//!
//! Resolves alias list names from a fixed in-memory table.

use std::collections::HashMap;
use std::sync::Arc;

use trunk_engine::{AliasDirectory, AliasList};

/// An alias directory over a fixed set of lists
#[derive(Default)]
pub struct StaticAliasDirectory {
    lists: HashMap<String, Arc<AliasList>>,
}

impl StaticAliasDirectory {
    /// An empty directory; every lookup misses
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a list under its own name
    pub fn add(&mut self, list: AliasList) {
        self.lists.insert(list.name().to_string(), Arc::new(list));
    }
}

impl AliasDirectory for StaticAliasDirectory {
    fn resolve(&self, name: &str) -> Option<Arc<AliasList>> {
        self.lists.get(name).cloned()
    }
}
