//! Plugin system for connect-host
//!
//! Connectors come from two places: executables on disk that speak a
//! JSON-lines protocol over stdin/stdout, and native modules compiled into
//! the host. Both end up behind the same [`Connector`] trait.

pub mod builtin;
pub mod connector;
pub mod loader;
pub mod native;
pub mod process;
pub mod protocol;
pub mod search_path;

pub use builtin::WorkspaceFiles;
pub use connector::{Connector, ConnectorFactory, ParameterDef, ToolDefinition};
pub use loader::{LoadedPlugins, PluginLoader};
pub use native::NativeRegistry;
pub use process::ProcessConnector;
pub use protocol::{PluginRequest, PluginResponse};
