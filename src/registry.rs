//! Tool registry
//!
//! Flat index from tool name to the connector that serves it. Definitions are
//! stored as owned copies, so a connector changing its own metadata after
//! registration has no effect on gating.

use crate::config::{CollisionPolicy, ToolOverride};
use crate::plugins::connector::{Connector, ToolDefinition};
use crate::plugins::loader::panic_message;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A registered tool and the plugin that serves it
#[derive(Clone)]
pub struct RegisteredTool {
    pub plugin_id: String,
    pub connector: Arc<dyn Connector>,
    pub definition: ToolDefinition,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("plugin_id", &self.plugin_id)
            .field("definition", &self.definition)
            .finish()
    }
}

/// Name-indexed tool registry
pub struct ToolRegistry {
    policy: CollisionPolicy,
    tools: BTreeMap<String, RegisteredTool>,
    plugins: Vec<String>,
}

impl ToolRegistry {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            tools: BTreeMap::new(),
            plugins: Vec::new(),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Register every tool a connector declares. Returns how many were indexed.
    pub fn register(&mut self, plugin_id: &str, connector: Arc<dyn Connector>) -> usize {
        self.register_with(plugin_id, connector, None)
    }

    /// Register with per-tool overrides applied on top of the declared definitions.
    ///
    /// A connector whose `list_tools` fails stays known as a plugin but
    /// contributes no tools.
    pub fn register_with(
        &mut self,
        plugin_id: &str,
        connector: Arc<dyn Connector>,
        overrides: Option<&BTreeMap<String, ToolOverride>>,
    ) -> usize {
        let definitions = collect_definitions(plugin_id, connector.as_ref());
        self.insert(plugin_id, connector, definitions, overrides)
    }

    /// Index definitions already collected from `connector`. `None` records
    /// the plugin without tools.
    pub fn insert(
        &mut self,
        plugin_id: &str,
        connector: Arc<dyn Connector>,
        definitions: Option<Vec<ToolDefinition>>,
        overrides: Option<&BTreeMap<String, ToolOverride>>,
    ) -> usize {
        if !self.plugins.iter().any(|id| id == plugin_id) {
            self.plugins.push(plugin_id.to_string());
        }

        let Some(definitions) = definitions else {
            return 0;
        };

        let mut registered = 0;
        for mut definition in definitions {
            if let Some(tool_override) = overrides.and_then(|o| o.get(&definition.name)) {
                apply_override(&mut definition, tool_override);
            }

            if let Some(existing) = self.tools.get(&definition.name) {
                match self.policy {
                    CollisionPolicy::Overwrite => warn!(
                        "Tool name collision: '{}' from plugin '{}' overwrites the one from plugin '{}'",
                        definition.name, plugin_id, existing.plugin_id
                    ),
                    CollisionPolicy::Reject => {
                        warn!(
                            "Tool name collision: '{}' from plugin '{}' ignored, already provided by plugin '{}'",
                            definition.name, plugin_id, existing.plugin_id
                        );
                        continue;
                    }
                }
            }

            debug!(
                "Registered tool '{}' from plugin '{}' (consequential: {})",
                definition.name, plugin_id, definition.is_consequential
            );
            self.tools.insert(
                definition.name.clone(),
                RegisteredTool {
                    plugin_id: plugin_id.to_string(),
                    connector: Arc::clone(&connector),
                    definition,
                },
            );
            registered += 1;
        }

        info!("Plugin '{}' registered {} tools", plugin_id, registered);
        registered
    }

    /// Drop every plugin and tool
    pub fn clear(&mut self) {
        self.tools.clear();
        self.plugins.clear();
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Copies of the effective definitions, ordered by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    /// Known plugin ids in registration order
    pub fn plugin_ids(&self) -> Vec<String> {
        self.plugins.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(CollisionPolicy::default())
    }
}

/// Ask a connector for its tools. Errors and panics are logged and yield `None`.
pub fn collect_definitions(plugin_id: &str, connector: &dyn Connector) -> Option<Vec<ToolDefinition>> {
    match panic::catch_unwind(AssertUnwindSafe(|| connector.list_tools())) {
        Ok(Ok(definitions)) => Some(definitions),
        Ok(Err(e)) => {
            error!("Failed to list tools for plugin '{}': {}", plugin_id, e);
            None
        }
        Err(payload) => {
            error!(
                "Plugin '{}' panicked while listing tools: {}",
                plugin_id,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

fn apply_override(definition: &mut ToolDefinition, tool_override: &ToolOverride) {
    if let Some(consequential) = tool_override.is_consequential {
        definition.is_consequential = consequential;
    }
    if let Some(description) = &tool_override.description {
        definition.description = description.clone();
    }
}
