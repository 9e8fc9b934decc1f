//! Configuration management for connect-host
//!
//! Configuration comes from a single file:
//! 1. The path given on the command line
//! 2. `CONNECT_CONFIG_PATH`
//! 3. `./connectors.toml`
//!
//! Files ending in `.yaml`/`.yml` are read as YAML, everything else as TOML.
//! Environment variables override individual host settings afterwards.

use crate::error::{ConfigError, SafeZoneError};
use crate::safe_zone::SafeZone;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "connectors.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: HostSettings,
    pub plugins: Vec<PluginSpec>,
}

/// Host-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Server name reported to callers
    pub name: String,
    /// Server version reported to callers
    pub version: String,
    /// Root directory file plugins must live under (default: working directory)
    pub safe_zone: Option<PathBuf>,
    /// What to do when two plugins register the same tool name
    pub collision_policy: CollisionPolicy,
    /// Per-request timeout for process plugins, in seconds
    pub plugin_timeout: u64,
    /// Extra directories exported on every plugin's search path
    pub search_paths: Vec<PathBuf>,
}

/// Tool name collision handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Later registration replaces the earlier one, with a warning
    #[default]
    Overwrite,
    /// Later registration is dropped, with a warning
    Reject,
}

/// How a plugin is provided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginKind {
    /// Executable file on disk speaking the plugin protocol
    /// (`local`, or the legacy `local_python`)
    Local,
    /// Connector compiled into the host, found by module name
    Native,
    /// Anything else; skipped at load time
    Unsupported(String),
}

impl PluginKind {
    pub fn as_str(&self) -> &str {
        match self {
            PluginKind::Local => "local",
            PluginKind::Native => "native",
            PluginKind::Unsupported(kind) => kind,
        }
    }
}

impl From<String> for PluginKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "local" | "local_python" => PluginKind::Local,
            "native" => PluginKind::Native,
            _ => PluginKind::Unsupported(kind),
        }
    }
}

impl Serialize for PluginKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PluginKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(PluginKind::from)
    }
}

/// Per-tool adjustments applied at registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOverride {
    /// Force the approval gate on or off for this tool
    #[serde(default)]
    pub is_consequential: Option<bool>,
    /// Replace the tool description
    #[serde(default)]
    pub description: Option<String>,
}

/// One configured plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Unique plugin identifier
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    /// Plugin executable, for local plugins
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
    /// Environment for the plugin; `${NAME}` is filled from secrets
    #[serde(default, alias = "env_vars", deserialize_with = "stringified_map")]
    pub env: BTreeMap<String, String>,
    /// Tool adjustments keyed by tool name
    #[serde(default)]
    pub capability_overrides: Option<BTreeMap<String, ToolOverride>>,
}

impl PluginSpec {
    pub fn new(id: &str, kind: PluginKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            path: None,
            description: None,
            env: BTreeMap::new(),
            capability_overrides: None,
        }
    }
}

/// Accept numbers and booleans as env values
fn stringified_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Scalar::Str(s) => s,
                Scalar::Int(i) => i.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Bool(b) => b.to_string(),
            };
            (key, value)
        })
        .collect())
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            name: "connect-host".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            safe_zone: None,
            collision_policy: CollisionPolicy::default(),
            plugin_timeout: 30,
            search_paths: vec![],
        }
    }
}

impl HostSettings {
    /// Resolve the configured safe zone, or the working directory
    pub fn safe_zone(&self) -> Result<SafeZone, SafeZoneError> {
        match &self.safe_zone {
            Some(root) => SafeZone::new(root),
            None => SafeZone::current(),
        }
    }
}

impl HostConfig {
    /// Load and validate configuration
    pub fn load(cli_config: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match cli_config {
            Some(path) => path.to_path_buf(),
            None => std::env::var("CONNECT_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };

        info!("Loading configuration from {:?}", path);
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;

        info!("Successfully loaded {} plugins", config.plugins.len());
        Ok(config)
    }

    /// Parse a config file without validating it
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            Self::from_yaml_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        };
        parsed.map_err(|e| match e {
            ConfigError::Parse(msg) => ConfigError::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // An empty document is an empty configuration
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        match value {
            serde_yaml::Value::Null => Ok(Self::default()),
            serde_yaml::Value::Mapping(_) => {
                serde_yaml::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            _ => Err(ConfigError::Parse(
                "configuration root must be a mapping".to_string(),
            )),
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("CONNECT_SAFE_ZONE") {
            debug!("Safe zone overridden from environment: {}", root);
            self.host.safe_zone = Some(PathBuf::from(root));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(spec) = self.plugins.iter().find(|p| p.id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "plugin of type '{}' has an empty id",
                spec.kind.as_str()
            )));
        }

        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for spec in &self.plugins {
            if !seen.insert(spec.id.as_str()) {
                duplicates.insert(spec.id.clone());
            }
        }
        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateIds(duplicates.into_iter().collect()));
        }

        let local_paths: Vec<(&str, &Path)> = self
            .plugins
            .iter()
            .filter(|p| p.kind == PluginKind::Local)
            .filter_map(|p| p.path.as_deref().map(|path| (p.id.as_str(), path)))
            .collect();
        if local_paths.is_empty() {
            return Ok(());
        }

        let zone = self
            .host
            .safe_zone()
            .map_err(|e| ConfigError::Invalid(format!("safe zone: {}", e)))?;
        for (id, path) in local_paths {
            match zone.resolve(path) {
                Ok(_) => {}
                Err(SafeZoneError::OutsideZone { path }) => {
                    return Err(ConfigError::UnsafePath {
                        id: id.to_string(),
                        path,
                    })
                }
                Err(SafeZoneError::Unresolvable { path, reason }) => {
                    return Err(ConfigError::UnresolvablePath {
                        id: id.to_string(),
                        path,
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}
