//! Per-call caller identity
//!
//! A [`CallerIdentity`] is built fresh for every call from caller-supplied
//! data and handed to exactly one connector invocation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Argument key transports use to carry caller identity
pub const IDENTITY_ARG: &str = "user_context";

/// The user a tool call is made on behalf of
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: String,
    pub email: String,
    /// On-behalf-of token for downstream services
    #[serde(default)]
    pub downstream_token: Option<String>,
}

impl std::fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field(
                "downstream_token",
                &self.downstream_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl CallerIdentity {
    pub fn new(user_id: &str, email: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.to_string(),
            downstream_token: None,
        }
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.downstream_token = Some(token.to_string());
        self
    }

    /// Build an identity from raw caller data: either an object or a string
    /// holding a JSON object. Any parse or schema failure yields `None`.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let parsed = match raw {
            Value::Null => return None,
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Ignoring malformed caller identity: {}", e);
                    return None;
                }
            },
            other => other.clone(),
        };

        match serde_json::from_value::<CallerIdentity>(parsed) {
            Ok(identity) if identity.is_valid() => Some(identity),
            Ok(_) => {
                warn!("Ignoring caller identity with empty user_id or email");
                None
            }
            Err(e) => {
                warn!("Ignoring invalid caller identity: {}", e);
                None
            }
        }
    }

    fn is_valid(&self) -> bool {
        !self.user_id.trim().is_empty() && self.email.contains('@')
    }
}

/// Remove the identity entry from call arguments, returning its raw value.
pub fn extract(arguments: &mut Value) -> Option<Value> {
    arguments
        .as_object_mut()
        .and_then(|args| args.remove(IDENTITY_ARG))
}
