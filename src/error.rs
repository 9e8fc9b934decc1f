//! Error types for connect-host
//!
//! Only [`ConfigError`] is allowed to stop the process. Everything else is
//! recovered at the plugin or call boundary it came from.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Duplicate plugin IDs found: {}", .0.join(", "))]
    DuplicateIds(Vec<String>),

    #[error("Plugin '{id}': Plugin path must be within the safe zone: {path}")]
    UnsafePath { id: String, path: PathBuf },

    #[error("Plugin '{id}': unresolvable plugin path {path}: {reason}")]
    UnresolvablePath {
        id: String,
        path: PathBuf,
        reason: String,
    },
}

/// Safe zone violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SafeZoneError {
    #[error("Plugin path must be within the safe zone: {path}")]
    OutsideZone { path: PathBuf },

    #[error("Unresolvable path {path}: {reason}")]
    Unresolvable { path: PathBuf, reason: String },
}

/// Reasons a single plugin failed to load. Never escapes the loader.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("plugin has no path configured")]
    MissingPath,

    #[error("plugin file not found: {0}")]
    NotFound(PathBuf),

    #[error("plugin is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error(transparent)]
    UnsafePath(#[from] SafeZoneError),

    #[error("failed to start plugin: {0}")]
    Spawn(String),

    #[error("plugin does not implement the connector contract: {0}")]
    ContractMissing(String),

    #[error("plugin construction failed: {0}")]
    Construction(String),

    #[error("no native connector module named '{0}'")]
    UnknownNative(String),

    #[error("plugin panicked while loading: {0}")]
    Panicked(String),
}

/// Secret lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    #[error("Credential '{0}' not found")]
    CredentialNotFound(String),
}

/// A reportable, non-fatal tool failure raised by a connector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolExecutionError {
    pub message: String,
    pub retryable: bool,
}

impl ToolExecutionError {
    /// A failure that will not succeed on retry
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A transient failure the caller may retry
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Errors a connector may return from `list_tools` or `execute`
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Terminal dispatch states other than success
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Tool '{0}' not found.")]
    NotFound(String),

    #[error("Action suspended: Human approval required for {0}.")]
    Suspended(String),

    #[error("Tool '{name}' failed - {source}")]
    ToolFailed {
        name: String,
        #[source]
        source: ToolExecutionError,
    },

    #[error("{message}")]
    Internal { name: String, message: String },
}
