//! Process plugin protocol
//!
//! A file plugin is an executable that reads one JSON request line from
//! stdin and writes a JSON response line with the same `id` to stdout.

use crate::identity::CallerIdentity;
use serde::{Deserialize, Serialize};

/// Protocol version a plugin must report during the handshake
pub const PROTOCOL_VERSION: &str = "connect/1";

/// Environment variable holding the plugin's search path
pub const SEARCH_PATH_ENV: &str = "CONNECT_PLUGIN_PATH";

/// Environment variable holding the plugin id
pub const PLUGIN_ID_ENV: &str = "CONNECT_PLUGIN_ID";

/// Request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Handshake,
    ListTools,
    Execute,
}

/// Request sent to a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Request ID for correlation
    pub id: String,
    pub method: Method,
    /// Tool name to invoke
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool arguments
    #[serde(default)]
    pub params: serde_json::Value,
    /// Caller on whose behalf the tool runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<CallerIdentity>,
}

/// Response from a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Request ID this responds to
    pub id: String,
    /// Whether the operation succeeded
    pub success: bool,
    /// Result data (if success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message (if failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a failure is transient
    #[serde(default)]
    pub retryable: bool,
}

impl PluginRequest {
    fn new(method: Method) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            tool: None,
            params: serde_json::Value::Null,
            identity: None,
        }
    }

    pub fn handshake() -> Self {
        Self::new(Method::Handshake)
    }

    pub fn list_tools() -> Self {
        Self::new(Method::ListTools)
    }

    pub fn execute(
        tool: &str,
        params: serde_json::Value,
        identity: Option<CallerIdentity>,
    ) -> Self {
        Self {
            tool: Some(tool.to_string()),
            params,
            identity,
            ..Self::new(Method::Execute)
        }
    }
}

impl PluginResponse {
    /// Create a success response
    pub fn success(id: &str, result: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            success: true,
            result: Some(result),
            error: None,
            retryable: false,
        }
    }

    /// Create an error response
    pub fn error(id: &str, message: &str, retryable: bool) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            result: None,
            error: Some(message.to_string()),
            retryable,
        }
    }

    /// Whether this is a valid handshake reply
    pub fn is_handshake_ok(&self) -> bool {
        self.success
            && self
                .result
                .as_ref()
                .and_then(|r| r.get("protocol"))
                .and_then(|p| p.as_str())
                == Some(PROTOCOL_VERSION)
    }
}

/// Find the response line for `request_id` in plugin output.
/// Lines that are not responses (plugin chatter) are skipped.
pub fn find_response(output: &str, request_id: &str) -> Option<PluginResponse> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<PluginResponse>(line.trim()).ok())
        .find(|response| response.id == request_id)
}
