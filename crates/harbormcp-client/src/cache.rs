//! Per-server list caches.
//!
//! Concurrent maps keyed by connector name, refreshed by the aggregator on
//! `list_changed` notifications. Writes are last-write-wins; readers always
//! see a complete list for a server or nothing.

use dashmap::DashMap;

use harbormcp_protocol::types::{Prompt, Resource, ResourceTemplate, Tool};

/// Concurrent caches for the four list surfaces.
#[derive(Debug, Default)]
pub struct CacheManager {
    tools: DashMap<String, Vec<Tool>>,
    resources: DashMap<String, Vec<Resource>>,
    templates: DashMap<String, Vec<ResourceTemplate>>,
    prompts: DashMap<String, Vec<Prompt>>,
}

impl CacheManager {
    /// Create empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached tools for a server.
    pub fn tools(&self, server: &str) -> Option<Vec<Tool>> {
        self.tools.get(server).map(|v| v.clone())
    }

    /// Replace the cached tools for a server.
    pub fn set_tools(&self, server: &str, tools: Vec<Tool>) {
        self.tools.insert(server.to_string(), tools);
    }

    /// Cached resources for a server.
    pub fn resources(&self, server: &str) -> Option<Vec<Resource>> {
        self.resources.get(server).map(|v| v.clone())
    }

    /// Replace the cached resources for a server.
    pub fn set_resources(&self, server: &str, resources: Vec<Resource>) {
        self.resources.insert(server.to_string(), resources);
    }

    /// Cached resource templates for a server.
    pub fn resource_templates(&self, server: &str) -> Option<Vec<ResourceTemplate>> {
        self.templates.get(server).map(|v| v.clone())
    }

    /// Replace the cached resource templates for a server.
    pub fn set_resource_templates(&self, server: &str, templates: Vec<ResourceTemplate>) {
        self.templates.insert(server.to_string(), templates);
    }

    /// Cached prompts for a server.
    pub fn prompts(&self, server: &str) -> Option<Vec<Prompt>> {
        self.prompts.get(server).map(|v| v.clone())
    }

    /// Replace the cached prompts for a server.
    pub fn set_prompts(&self, server: &str, prompts: Vec<Prompt>) {
        self.prompts.insert(server.to_string(), prompts);
    }

    /// Drop everything cached for a server.
    pub fn invalidate(&self, server: &str) {
        self.tools.remove(server);
        self.resources.remove(server);
        self.templates.remove(server);
        self.prompts.remove(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn last_write_wins() {
        let cache = CacheManager::new();
        cache.set_tools("a", vec![tool("one")]);
        cache.set_tools("a", vec![tool("two")]);
        let cached = cache.tools("a").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "two");
    }

    #[test]
    fn invalidate_clears_all_kinds() {
        let cache = CacheManager::new();
        cache.set_tools("a", vec![tool("one")]);
        cache.set_prompts("a", vec![]);
        cache.invalidate("a");
        assert!(cache.tools("a").is_none());
        assert!(cache.prompts("a").is_none());
    }
}
