//! Tool registry — the catalogue of tools a run may call.
//!
//! The agent loop uses this to:
//! 1. Get tool definitions to send to the LLM
//! 2. Look up tools when the LLM requests them
//!
//! Definitions are cached and only rebuilt after the set of tools changes, so
//! every turn of every run shares one `Arc<Vec<ToolDefinition>>`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use helmsman_core::provider::ToolDefinition;
use helmsman_core::tool::Tool;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Model APIs reject other characters in function names.
pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Thread-safe registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// `None` when stale.
    definitions: RwLock<Option<Arc<Vec<ToolDefinition>>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            definitions: RwLock::new(None),
        }
    }

    /// Register a tool under its sanitized name, replacing any existing tool
    /// with that name. Returns the name the tool is registered under.
    pub fn register(&self, tool: Arc<dyn Tool>) -> String {
        let name = sanitize_tool_name(tool.name());
        if name != tool.name() {
            tracing::debug!(original = tool.name(), sanitized = %name, "Sanitized tool name");
        }

        let mut tools = write(&self.tools);
        let replaced = tools.insert(name.clone(), tool).is_some();
        *write(&self.definitions) = None;
        drop(tools);

        tracing::debug!(tool = %name, replaced, "Registered tool");
        name
    }

    /// Remove a tool by name.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut tools = write(&self.tools);
        let removed = tools.remove(name);
        if removed.is_some() {
            *write(&self.definitions) = None;
        }
        removed
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        read(&self.tools).get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        read(&self.tools).contains_key(name)
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.tools).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.tools).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.tools).is_empty()
    }

    /// Tool definitions for the LLM, sorted by name.
    pub fn definitions(&self) -> Arc<Vec<ToolDefinition>> {
        if let Some(defs) = read(&self.definitions).as_ref() {
            return Arc::clone(defs);
        }

        // Holding the tools lock keeps a concurrent register from slipping
        // in between the rebuild and the store.
        let tools = read(&self.tools);
        let mut cache = write(&self.definitions);
        if let Some(defs) = cache.as_ref() {
            return Arc::clone(defs);
        }

        let mut defs: Vec<ToolDefinition> = tools
            .iter()
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));

        let defs = Arc::new(defs);
        *cache = Some(Arc::clone(&defs));
        tracing::trace!(count = defs.len(), "Rebuilt tool definition cache");
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fn_tool::FnTool;
    use serde_json::json;

    fn echo(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, "Echoes back the input", json!({"type": "object"}), |_ctx, args| async move {
            Ok(args)
        }))
    }

    #[test]
    fn register_and_lookup() {
        let registry = ToolRegistry::new();
        registry.register(echo("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.has("echo"));
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_tool_name("web.search v2"), "web_search_v2");
        assert_eq!(sanitize_tool_name("file-read_2"), "file-read_2");

        let registry = ToolRegistry::new();
        let name = registry.register(echo("my.tool"));
        assert_eq!(name, "my_tool");
        assert!(registry.has("my_tool"));
        assert_eq!(registry.definitions()[0].name, "my_tool");
    }

    #[test]
    fn register_is_an_upsert() {
        let registry = ToolRegistry::new();
        registry.register(echo("echo"));
        registry.register(echo("echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn definitions_are_sorted_and_cached() {
        let registry = ToolRegistry::new();
        registry.register(echo("zeta"));
        registry.register(echo("alpha"));

        let first = registry.definitions();
        let second = registry.definitions();
        assert!(Arc::ptr_eq(&first, &second));
        let names: Vec<&str> = first.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
    }

    #[test]
    fn register_invalidates_cache() {
        let registry = ToolRegistry::new();
        registry.register(echo("alpha"));
        let before = registry.definitions();

        registry.register(echo("beta"));
        let after = registry.definitions();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn unregister_removes_tool() {
        let registry = ToolRegistry::new();
        registry.register(echo("alpha"));
        registry.definitions();
        assert!(registry.unregister("alpha").is_some());
        assert!(registry.unregister("alpha").is_none());
        assert!(registry.definitions().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registration_and_reads() {
        let registry = Arc::new(ToolRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(echo(&format!("tool_{i}")));
                    registry.definitions().len()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap() >= 1);
        }
        assert_eq!(registry.definitions().len(), 8);
        assert_eq!(registry.names().len(), 8);
    }
}
