//! Native connector modules
//!
//! Native plugins are compiled into the host and looked up by module name.
//! A plugin id maps to its module name by replacing `-` with `_`.

use super::builtin::WorkspaceFiles;
use super::connector::ConnectorFactory;
use std::collections::BTreeMap;

/// Module name for a plugin id
pub fn module_name(plugin_id: &str) -> String {
    plugin_id.trim().replace('-', "_")
}

/// Statically known connector factories keyed by module name
#[derive(Clone, Default)]
pub struct NativeRegistry {
    factories: BTreeMap<String, ConnectorFactory>,
}

impl NativeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in connectors
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("workspace_files", WorkspaceFiles::create);
        registry
    }

    /// Register a factory under a module name
    pub fn register(&mut self, module: &str, factory: ConnectorFactory) {
        self.factories.insert(module_name(module), factory);
    }

    /// Resolve the factory for a plugin id
    pub fn resolve(&self, plugin_id: &str) -> Option<ConnectorFactory> {
        self.factories.get(&module_name(plugin_id)).copied()
    }

    /// Registered module names
    pub fn modules(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("modules", &self.modules())
            .finish()
    }
}
