//! Process plugin connector
//!
//! Runs a plugin executable once per request, writing a single JSON request
//! line and reading back the matching response line.

use super::connector::{Connector, ToolDefinition};
use super::protocol::{find_response, PluginRequest, PluginResponse, PLUGIN_ID_ENV, SEARCH_PATH_ENV};
use super::search_path;
use crate::error::{ConnectorError, LoadError, ToolExecutionError};
use crate::identity::CallerIdentity;
use crate::secrets::SecretsProvider;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// `${NAME}` placeholders in plugin env values
static SECRET_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// ETXTBSY
const TEXT_FILE_BUSY: i32 = 26;

/// Connector backed by a plugin executable
#[derive(Debug)]
pub struct ProcessConnector {
    plugin_id: String,
    executable: PathBuf,
    env: BTreeMap<String, String>,
    search_path: Vec<PathBuf>,
    timeout: Duration,
}

impl ProcessConnector {
    /// Construct the connector and verify the executable speaks the
    /// plugin protocol. The current search path is captured for the
    /// lifetime of the connector.
    pub fn new(
        plugin_id: &str,
        executable: &Path,
        env: &BTreeMap<String, String>,
        timeout: Duration,
        secrets: &dyn SecretsProvider,
    ) -> Result<Self, LoadError> {
        let env = resolve_env(env, secrets)?;
        let connector = Self {
            plugin_id: plugin_id.to_string(),
            executable: executable.to_path_buf(),
            env,
            search_path: search_path::snapshot(),
            timeout,
        };
        connector.handshake()?;
        Ok(connector)
    }

    /// Plugin id this connector was loaded under
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Search path exported to the plugin process
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    fn handshake(&self) -> Result<(), LoadError> {
        let request = PluginRequest::handshake();
        let response = self
            .call_blocking(&request)
            .map_err(|e| match e.downcast_ref::<io::Error>() {
                Some(_) => LoadError::Spawn(format!("{:#}", e)),
                None => LoadError::ContractMissing(format!("{:#}", e)),
            })?;

        if !response.is_handshake_ok() {
            return Err(LoadError::ContractMissing(format!(
                "unexpected handshake reply from {}",
                self.executable.display()
            )));
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .envs(&self.env)
            .env(PLUGIN_ID_ENV, &self.plugin_id);
        if let Ok(joined) = std::env::join_paths(&self.search_path) {
            cmd.env(SEARCH_PATH_ENV, joined);
        }
        cmd
    }

    /// Synchronous round trip, used during loading and tool enumeration
    fn call_blocking(&self, request: &PluginRequest) -> anyhow::Result<PluginResponse> {
        debug!(
            "Plugin '{}' <- {:?} (blocking)",
            self.plugin_id, request.method
        );
        let mut cmd = self.command();
        let mut child = retry_busy(|| cmd.spawn())
            .with_context(|| format!("Failed to spawn plugin {}", self.executable.display()))?;

        let line = serde_json::to_string(request)?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = writeln!(stdin, "{}", line) {
                // A plugin that exits without reading is judged by its output
                if e.kind() != io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write to plugin");
                }
            }
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to capture plugin stdout"))?;
        let reader = std::thread::spawn(move || {
            let mut output = String::new();
            let _ = stdout.read_to_string(&mut output);
            output
        });

        let start = Instant::now();
        loop {
            match child.try_wait()? {
                Some(_) => break,
                None if start.elapsed() > self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("Plugin timed out after {}s", self.timeout.as_secs());
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        }

        let output = reader
            .join()
            .map_err(|_| anyhow!("Plugin output reader panicked"))?;
        find_response(&output, &request.id)
            .ok_or_else(|| anyhow!("Plugin closed without responding"))
    }

    /// Asynchronous round trip, used for tool execution
    async fn call(&self, request: &PluginRequest) -> anyhow::Result<PluginResponse> {
        debug!("Plugin '{}' <- {:?}", self.plugin_id, request.method);
        let mut cmd = tokio::process::Command::from(self.command());
        cmd.kill_on_drop(true);
        let mut child = retry_busy(|| cmd.spawn())
            .with_context(|| format!("Failed to spawn plugin {}", self.executable.display()))?;

        let line = serde_json::to_string(request)? + "\n";
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    return Err(e).context("Failed to write to plugin");
                }
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Plugin timed out after {}s", self.timeout.as_secs()))?
            .context("Failed to read plugin output")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        find_response(&stdout, &request.id)
            .ok_or_else(|| anyhow!("Plugin closed without responding"))
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    fn list_tools(&self) -> Result<Vec<ToolDefinition>, ConnectorError> {
        let response = self.call_blocking(&PluginRequest::list_tools())?;
        if !response.success {
            return Err(anyhow!(
                "Plugin failed to list tools: {}",
                response.error.unwrap_or_default()
            )
            .into());
        }

        // Either a bare array or {"tools": [...]}
        let tools = match response.result {
            Some(Value::Object(mut map)) => map.remove("tools").unwrap_or(Value::Null),
            Some(other) => other,
            None => Value::Null,
        };
        let tools: Vec<ToolDefinition> =
            serde_json::from_value(tools).context("Plugin returned malformed tool list")?;
        Ok(tools)
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        identity: Option<CallerIdentity>,
    ) -> Result<Value, ConnectorError> {
        let request = PluginRequest::execute(tool_name, arguments, identity);
        let response = self.call(&request).await?;

        if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(ToolExecutionError {
                message: response
                    .error
                    .unwrap_or_else(|| "plugin reported a failure".to_string()),
                retryable: response.retryable,
            }
            .into())
        }
    }
}

/// Substitute `${NAME}` placeholders from the secrets provider
fn resolve_env(
    env: &BTreeMap<String, String>,
    secrets: &dyn SecretsProvider,
) -> Result<BTreeMap<String, String>, LoadError> {
    let mut resolved = BTreeMap::new();
    for (name, raw) in env {
        let mut value = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in SECRET_PLACEHOLDER.captures_iter(raw) {
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let secret = secrets
                .get_secret(key.as_str())
                .map_err(|e| LoadError::Construction(format!("env {}: {}", name, e)))?;
            value.push_str(&raw[last..whole.start()]);
            value.push_str(&secret);
            last = whole.end();
        }
        value.push_str(&raw[last..]);
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

/// Retry a spawn that raced with a concurrent fork still holding the
/// executable open for writing.
fn retry_busy<T>(mut spawn: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut attempts = 0;
    loop {
        match spawn() {
            Err(e) if e.raw_os_error() == Some(TEXT_FILE_BUSY) && attempts < 5 => {
                attempts += 1;
                std::thread::sleep(Duration::from_millis(20 * attempts));
            }
            result => return result,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::secrets::MemorySecrets;
    use serde_json::json;
    use tempfile::TempDir;

    /// Shell plugin answering every method from canned JSON `result`s.
    /// `execute_body` is shell code that must set `reply` to the full
    /// response tail after the id (e.g. `"success":true,"result":1`).
    #[cfg(unix)]
    pub(crate) fn write_plugin(dir: &Path, name: &str, tools: &str, execute_body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
read line
id=$(printf '%s' "$line" | sed 's/^{{"id":"\([^"]*\)".*/\1/')
case "$line" in
  *'"method":"handshake"'*) reply='"success":true,"result":{{"protocol":"connect/1"}}' ;;
  *'"method":"list_tools"'*) reply='"success":true,"result":{tools}' ;;
  *) {execute_body} ;;
esac
printf '{{"id":"%s",%s}}\n' "$id" "$reply"
"#
        );
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    pub(crate) const ECHO_TOOLS: &str =
        r#"[{"name":"echo","description":"Echo","is_consequential":false}]"#;

    #[test]
    fn test_resolve_env_placeholders() {
        let secrets = MemorySecrets::new().with_secret("GITHUB_TOKEN", "ghp_123");
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "${GITHUB_TOKEN}".to_string());
        env.insert("AUTH".to_string(), "Bearer ${GITHUB_TOKEN}!".to_string());
        env.insert("PLAIN".to_string(), "value".to_string());

        let resolved = resolve_env(&env, &secrets).unwrap();
        assert_eq!(resolved["TOKEN"], "ghp_123");
        assert_eq!(resolved["AUTH"], "Bearer ghp_123!");
        assert_eq!(resolved["PLAIN"], "value");
    }

    #[test]
    fn test_resolve_env_missing_secret() {
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "${MISSING}".to_string());

        let err = resolve_env(&env, &MemorySecrets::new()).unwrap_err();
        assert!(matches!(err, LoadError::Construction(_)));
        assert!(err.to_string().contains("Secret 'MISSING' not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_and_list_tools() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            dir.path(),
            "echo.sh",
            ECHO_TOOLS,
            r#"reply='"success":true,"result":"pong"'"#,
        );

        let connector = ProcessConnector::new(
            "echo",
            &path,
            &BTreeMap::new(),
            Duration::from_secs(10),
            &MemorySecrets::new(),
        )
        .unwrap();

        let tools = connector.list_tools().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_rejects_non_plugin() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not_a_plugin.sh");
        std::fs::write(&path, "#!/bin/sh\necho hello\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let err = ProcessConnector::new(
            "nope",
            &path,
            &BTreeMap::new(),
            Duration::from_secs(10),
            &MemorySecrets::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::ContractMissing(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_failure_maps_to_tool_error() {
        let dir = TempDir::new().unwrap();
        let path = write_plugin(
            dir.path(),
            "limited.sh",
            ECHO_TOOLS,
            r#"reply='"success":false,"error":"rate limited","retryable":true'"#,
        );
        let connector = ProcessConnector::new(
            "limited",
            &path,
            &BTreeMap::new(),
            Duration::from_secs(10),
            &MemorySecrets::new(),
        )
        .unwrap();

        let err = connector.execute("echo", json!({}), None).await.unwrap_err();
        match err {
            ConnectorError::ToolExecution(e) => {
                assert_eq!(e.message, "rate limited");
                assert!(e.retryable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_passes_env_and_identity() {
        let dir = TempDir::new().unwrap();
        // Echo back the env var and whether the request carried the token
        let path = write_plugin(
            dir.path(),
            "env.sh",
            ECHO_TOOLS,
            r#"case "$line" in *tok_alice*) who=alice ;; *) who=anon ;; esac; reply="\"success\":true,\"result\":\"$GREETING-$who-$CONNECT_PLUGIN_ID\"""#,
        );
        let secrets = MemorySecrets::new().with_secret("HELLO", "hi");
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "${HELLO}".to_string());

        let connector =
            ProcessConnector::new("env-plugin", &path, &env, Duration::from_secs(10), &secrets)
                .unwrap();

        let identity = CallerIdentity::new("alice", "alice@test.com").with_token("tok_alice");
        let result = connector
            .execute("echo", json!({}), Some(identity))
            .await
            .unwrap();
        assert_eq!(result, json!("hi-alice-env-plugin"));

        let result = connector.execute("echo", json!({}), None).await.unwrap();
        assert_eq!(result, json!("hi-anon-env-plugin"));
    }
}
