//! Tool host
//!
//! Aggregates loaded connectors behind one dispatch surface. A call goes
//! through four steps: resolve the name, check the spend gate, build the
//! caller identity, and delegate to the owning connector. Every outcome is
//! turned into a [`ToolResponse`]; nothing a connector does escapes
//! `call_tool`.

use crate::config::{CollisionPolicy, HostConfig, ToolOverride};
use crate::error::{ConnectorError, DispatchError};
use crate::identity::{self, CallerIdentity};
use crate::plugins::connector::{Connector, ToolDefinition};
use crate::plugins::loader::{panic_message, LoadedPlugins, PluginLoader};
use crate::registry::{collect_definitions, ToolRegistry};
use crate::secrets::SecretsProvider;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Outcome class of a dispatched call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    NotFound,
    Suspended,
    ToolFailed { retryable: bool },
    Error,
}

/// Protocol-neutral result of a tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    pub status: ResponseStatus,
    pub text: String,
}

impl ToolResponse {
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

impl From<Result<Value, DispatchError>> for ToolResponse {
    fn from(result: Result<Value, DispatchError>) -> Self {
        match result {
            Ok(value) => Self {
                status: ResponseStatus::Ok,
                text: render(&value),
            },
            Err(DispatchError::NotFound(name)) => Self {
                status: ResponseStatus::NotFound,
                text: format!("Error: Tool '{}' not found.", name),
            },
            Err(err @ DispatchError::Suspended(_)) => Self {
                status: ResponseStatus::Suspended,
                text: err.to_string(),
            },
            Err(DispatchError::ToolFailed { name, source }) => Self {
                status: ResponseStatus::ToolFailed {
                    retryable: source.retryable,
                },
                text: format!(
                    "Error: Tool '{}' failed - {} (retryable: {})",
                    name, source.message, source.retryable
                ),
            },
            Err(DispatchError::Internal { message, .. }) => Self {
                status: ResponseStatus::Error,
                text: format!("Error executing tool: {}", message),
            },
        }
    }
}

/// Text form of a tool result
fn render(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Collect a connector's tools on the blocking pool
async fn enumerate(plugin_id: &str, connector: &Arc<dyn Connector>) -> Option<Vec<ToolDefinition>> {
    let id = plugin_id.to_string();
    let connector = Arc::clone(connector);
    match tokio::task::spawn_blocking(move || collect_definitions(&id, connector.as_ref())).await {
        Ok(definitions) => definitions,
        Err(e) => {
            error!("Listing tools for plugin '{}' aborted: {}", plugin_id, e);
            None
        }
    }
}

/// The dispatcher owning every loaded connector
pub struct Host {
    name: String,
    version: String,
    registry: RwLock<ToolRegistry>,
    overrides: BTreeMap<String, BTreeMap<String, ToolOverride>>,
}

impl Host {
    pub fn new(name: &str, version: &str, policy: CollisionPolicy) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            registry: RwLock::new(ToolRegistry::new(policy)),
            overrides: BTreeMap::new(),
        }
    }

    /// Load every configured plugin and register its tools
    pub async fn start(config: HostConfig, secrets: Arc<dyn SecretsProvider>) -> Self {
        let mut host = Self::new(
            &config.host.name,
            &config.host.version,
            config.host.collision_policy,
        );
        host.overrides = config
            .plugins
            .iter()
            .filter_map(|spec| {
                spec.capability_overrides
                    .clone()
                    .map(|overrides| (spec.id.clone(), overrides))
            })
            .collect();

        info!("Starting {} v{}", host.name, host.version);
        let HostConfig { host: settings, plugins } = config;
        // Process plugins handshake synchronously
        let loaded = tokio::task::spawn_blocking(move || {
            PluginLoader::new(&settings, secrets).load_all(&plugins)
        })
        .await;

        match loaded {
            Ok(plugins) => {
                host.load_plugins(plugins).await;
            }
            Err(e) => error!("Plugin loading aborted: {}", e),
        }
        host
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Register the tools of every loaded plugin, in load order
    pub async fn load_plugins(&self, plugins: LoadedPlugins) -> usize {
        // Enumeration may block on plugin processes, so it runs before the lock
        let mut collected = Vec::with_capacity(plugins.len());
        for (id, connector) in plugins.iter() {
            collected.push((id, connector, enumerate(id, connector).await));
        }

        let mut registry = self.registry.write().await;
        let mut total = 0;
        for (id, connector, definitions) in collected {
            total += registry.insert(id, Arc::clone(connector), definitions, self.overrides.get(id));
        }
        info!(
            "Registered {} tools from {} plugins",
            registry.len(),
            plugins.len()
        );
        total
    }

    /// Register a single connector
    pub async fn register(&self, plugin_id: &str, connector: Arc<dyn Connector>) -> usize {
        let definitions = enumerate(plugin_id, &connector).await;
        self.registry.write().await.insert(
            plugin_id,
            connector,
            definitions,
            self.overrides.get(plugin_id),
        )
    }

    /// Drop every registered plugin and tool
    pub async fn clear(&self) {
        self.registry.write().await.clear();
    }

    /// Effective tool definitions
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.read().await.definitions()
    }

    pub async fn plugin_ids(&self) -> Vec<String> {
        self.registry.read().await.plugin_ids()
    }

    /// Dispatch a call and render the outcome as text
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResponse {
        ToolResponse::from(self.execute_tool(name, arguments).await)
    }

    /// Dispatch a call, returning the raw result or the reason it did not run
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value, DispatchError> {
        let entry = {
            let registry = self.registry.read().await;
            registry.get(name).cloned()
        };
        let entry = entry.ok_or_else(|| DispatchError::NotFound(name.to_string()))?;

        if entry.definition.is_consequential {
            info!("Tool execution suspended for approval: {}", name);
            return Err(DispatchError::Suspended(name.to_string()));
        }

        let mut arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let identity = identity::extract(&mut arguments).and_then(|raw| CallerIdentity::from_raw(&raw));
        debug!(
            "Executing '{}' on plugin '{}' as {}",
            name,
            entry.plugin_id,
            identity.as_ref().map(|i| i.user_id.as_str()).unwrap_or("service")
        );

        let call = AssertUnwindSafe(entry.connector.execute(name, arguments, identity))
            .catch_unwind()
            .await;

        match call {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ConnectorError::ToolExecution(e))) => {
                warn!(
                    "Tool '{}' execution failed (retryable={}): {}",
                    name, e.retryable, e
                );
                Err(DispatchError::ToolFailed {
                    name: name.to_string(),
                    source: e,
                })
            }
            Ok(Err(ConnectorError::Internal(e))) => {
                error!("Error executing tool '{}': {:#}", name, e);
                Err(DispatchError::Internal {
                    name: name.to_string(),
                    message: format!("{:#}", e),
                })
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Tool '{}' panicked: {}", name, message);
                Err(DispatchError::Internal {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }
}
