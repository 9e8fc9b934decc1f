//! Built-in native connectors
//!
//! `workspace_files` exposes read/list/write access to a directory tree.
//! Writing is consequential and therefore always suspended by the host.

use super::connector::{Connector, ParameterDef, ToolDefinition};
use crate::error::{ConnectorError, ToolExecutionError};
use crate::identity::CallerIdentity;
use crate::safe_zone::SafeZone;
use crate::secrets::SecretsProvider;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Secret naming the workspace root; defaults to the working directory
pub const WORKSPACE_ROOT_SECRET: &str = "WORKSPACE_FILES_ROOT";

const DEFAULT_MAX_READ: u64 = 100 * 1024;

/// File access confined to one directory tree
pub struct WorkspaceFiles {
    zone: SafeZone,
}

impl WorkspaceFiles {
    /// Native factory entry point
    pub fn create(secrets: Arc<dyn SecretsProvider>) -> anyhow::Result<Arc<dyn Connector>> {
        let zone = match secrets.get_secret(WORKSPACE_ROOT_SECRET) {
            Ok(root) => SafeZone::new(root)?,
            Err(_) => SafeZone::current()?,
        };
        Ok(Arc::new(Self { zone }))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            zone: SafeZone::new(root.into())?,
        })
    }

    fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("read_file", "Read contents of a workspace file").with_parameters(
                &[
                    ParameterDef::required("path", "string", "File path relative to the workspace"),
                    ParameterDef::optional("max_size", "number", "Maximum bytes to read (default 100KB)"),
                ],
            ),
            ToolDefinition::new("list_dir", "List a workspace directory").with_parameters(&[
                ParameterDef::required("path", "string", "Directory path relative to the workspace"),
                ParameterDef::optional("hidden", "boolean", "Include hidden files"),
            ]),
            ToolDefinition::new("write_file", "Write content to a workspace file")
                .with_parameters(&[
                    ParameterDef::required("path", "string", "File path relative to the workspace"),
                    ParameterDef::required("content", "string", "Content to write"),
                    ParameterDef::optional("append", "boolean", "Append instead of overwrite"),
                ])
                .consequential(),
        ]
    }

    fn path_arg(&self, arguments: &Value) -> Result<PathBuf, ToolExecutionError> {
        let raw = arguments
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolExecutionError::new("Missing required parameter: path"))?;
        self.zone
            .resolve(raw)
            .map_err(|e| ToolExecutionError::new(e.to_string()))
    }

    fn read_file(&self, arguments: &Value) -> Result<Value, ToolExecutionError> {
        let path = self.path_arg(arguments)?;
        let max_size = arguments
            .get("max_size")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_READ);

        let file = fs::File::open(&path)
            .map_err(|e| ToolExecutionError::new(format!("Failed to open file: {}", e)))?;
        let mut buffer = Vec::new();
        file.take(max_size)
            .read_to_end(&mut buffer)
            .map_err(|e| ToolExecutionError::new(format!("Failed to read file: {}", e)))?;

        Ok(json!({
            "path": path,
            "size": buffer.len(),
            "truncated": buffer.len() as u64 == max_size,
            "content": String::from_utf8_lossy(&buffer),
        }))
    }

    fn list_dir(&self, arguments: &Value) -> Result<Value, ToolExecutionError> {
        let path = self.path_arg(arguments)?;
        let show_hidden = arguments
            .get("hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let entries = fs::read_dir(&path)
            .map_err(|e| ToolExecutionError::new(format!("Failed to read directory: {}", e)))?;

        let mut files: Vec<(String, bool, u64)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if !show_hidden && name.starts_with('.') {
                    return None;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                Some((name, is_dir, size))
            })
            .collect();
        files.sort();

        let entries: Vec<Value> = files
            .iter()
            .map(|(name, is_dir, size)| json!({"name": name, "is_dir": is_dir, "size": size}))
            .collect();

        Ok(json!({
            "path": path,
            "count": entries.len(),
            "entries": entries,
        }))
    }

    fn write_file(&self, arguments: &Value) -> Result<Value, ToolExecutionError> {
        let path = self.path_arg(arguments)?;
        let content = arguments
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolExecutionError::new("Missing required parameter: content"))?;
        let append = arguments
            .get("append")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let result = if append {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| f.write_all(content.as_bytes()))
        } else {
            fs::write(&path, content)
        };

        result.map_err(|e| ToolExecutionError::new(format!("Failed to write file: {}", e)))?;
        Ok(json!({
            "path": path,
            "bytes_written": content.len(),
            "appended": append,
        }))
    }
}

#[async_trait]
impl Connector for WorkspaceFiles {
    fn list_tools(&self) -> Result<Vec<ToolDefinition>, ConnectorError> {
        Ok(Self::definitions())
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        identity: Option<CallerIdentity>,
    ) -> Result<Value, ConnectorError> {
        debug!(
            "workspace_files.{} for {}",
            tool_name,
            identity.as_ref().map(|i| i.user_id.as_str()).unwrap_or("service")
        );
        let result = match tool_name {
            "read_file" => self.read_file(&arguments),
            "list_dir" => self.list_dir(&arguments),
            "write_file" => self.write_file(&arguments),
            _ => Err(ToolExecutionError::new(format!("Unknown tool: {}", tool_name))),
        };
        Ok(result?)
    }
}
