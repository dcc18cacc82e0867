//! Alias directory lookup
//!
//! Alias lists map raw idents to human-readable names. The directory that
//! stores and edits them lives outside this engine; channels only resolve
//! a configured list name to a read-only handle and attach it to the call
//! events they produce.

use std::collections::HashMap;
use std::sync::Arc;

use trunk_protocol::Ident;

/// A read-only ident-to-name lookup table
#[derive(Debug, Default)]
pub struct AliasList {
    name: String,
    aliases: HashMap<u16, String>,
}

impl AliasList {
    /// Create an empty alias list
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: HashMap::new(),
        }
    }

    /// Name of this list as referenced by channel configuration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an alias for an ident
    pub fn insert(&mut self, ident: Ident, alias: impl Into<String>) {
        self.aliases.insert(ident.as_u16(), alias.into());
    }

    /// Look up the alias for an ident
    pub fn lookup(&self, ident: Ident) -> Option<&str> {
        self.aliases.get(&ident.as_u16()).map(String::as_str)
    }
}

/// Resolves a configured alias list name to its list
pub trait AliasDirectory: Send + Sync {
    /// Resolve a list by name; None when no such list exists
    fn resolve(&self, name: &str) -> Option<Arc<AliasList>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_round_trip() {
        let mut list = AliasList::new("fleet");
        list.insert(Ident(1234), "Ops 1");

        assert_eq!(list.lookup(Ident(1234)), Some("Ops 1"));
        assert_eq!(list.lookup(Ident(99)), None);
        assert_eq!(list.name(), "fleet");
    }
}
