// LOMan - core/naming.rs
//
// Display-name lookup for tiles. The heuristic that derives names from
// historical server logs lives outside this crate; the supervisor only
// consumes it through `NameLookup`.

use std::collections::HashMap;

/// Source of human-readable tile names, keyed by server id.
pub trait NameLookup: Send + Sync {
    /// Name for `server_id`, or `None` when unknown.
    fn name_for(&self, server_id: &str) -> Option<String>;

    /// Name for `server_id`, falling back to the id itself.
    fn name_or_id(&self, server_id: &str) -> String {
        self.name_for(server_id)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| server_id.to_string())
    }
}

/// Fixed name table, typically the `[names]` section of config.toml.
#[derive(Debug, Clone, Default)]
pub struct StaticNames {
    names: HashMap<String, String>,
}

impl StaticNames {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl NameLookup for StaticNames {
    fn name_for(&self, server_id: &str) -> Option<String> {
        self.names.get(server_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_names_fall_back_to_id() {
        let mut map = HashMap::new();
        map.insert("Disc0oasis0".to_string(), "Ancient City".to_string());
        map.insert("Disc0oasis1".to_string(), "   ".to_string());
        let names = StaticNames::new(map);

        assert_eq!(names.name_or_id("Disc0oasis0"), "Ancient City");
        assert_eq!(names.name_or_id("Disc0oasis1"), "Disc0oasis1");
        assert_eq!(names.name_or_id("Disc0oasis2"), "Disc0oasis2");
    }
}
