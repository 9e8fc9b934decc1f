//! connect-host - a tool-aggregation host
//!
//! Loads connector plugins, indexes their tools into one registry, and
//! dispatches calls through a human-approval gate with per-call caller
//! identity.

pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod plugins;
pub mod registry;
pub mod safe_zone;
pub mod secrets;

pub use config::{CollisionPolicy, HostConfig, HostSettings, PluginKind, PluginSpec, ToolOverride};
pub use error::{ConfigError, ConnectorError, DispatchError, LoadError, ToolExecutionError};
pub use host::{Host, ResponseStatus, ToolResponse};
pub use identity::CallerIdentity;
pub use plugins::{Connector, ToolDefinition};
pub use secrets::{EnvSecretsProvider, MemorySecrets, SecretsProvider};
