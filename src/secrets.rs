//! Secret and credential access for connectors
//!
//! Connectors receive a shared [`SecretsProvider`] at construction and may
//! only read from it.

use crate::error::SecretError;
use std::collections::HashMap;

/// Read-only access to secrets and user credentials.
pub trait SecretsProvider: Send + Sync {
    /// Retrieve a simple secret (API key, token) by key
    fn get_secret(&self, key: &str) -> Result<String, SecretError>;

    /// Retrieve an opaque user credential by key
    fn get_user_credential(&self, key: &str) -> Result<serde_json::Value, SecretError>;
}

/// Secrets backed by process environment variables
#[derive(Debug, Default, Clone)]
pub struct EnvSecretsProvider;

impl EnvSecretsProvider {
    pub fn new() -> Self {
        Self
    }
}

impl SecretsProvider for EnvSecretsProvider {
    fn get_secret(&self, key: &str) -> Result<String, SecretError> {
        std::env::var(key).map_err(|_| SecretError::SecretNotFound(key.to_string()))
    }

    fn get_user_credential(&self, key: &str) -> Result<serde_json::Value, SecretError> {
        let raw =
            std::env::var(key).map_err(|_| SecretError::CredentialNotFound(key.to_string()))?;
        // Structured credentials are stored as JSON; anything else is a plain string
        Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
    }
}

/// In-memory secrets, for embedding and tests
#[derive(Debug, Default, Clone)]
pub struct MemorySecrets {
    secrets: HashMap<String, String>,
    credentials: HashMap<String, serde_json::Value>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    pub fn with_secret(mut self, key: &str, value: &str) -> Self {
        self.secrets.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a user credential
    pub fn with_credential(mut self, key: &str, value: serde_json::Value) -> Self {
        self.credentials.insert(key.to_string(), value);
        self
    }
}

impl SecretsProvider for MemorySecrets {
    fn get_secret(&self, key: &str) -> Result<String, SecretError> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| SecretError::SecretNotFound(key.to_string()))
    }

    fn get_user_credential(&self, key: &str) -> Result<serde_json::Value, SecretError> {
        self.credentials
            .get(key)
            .cloned()
            .ok_or_else(|| SecretError::CredentialNotFound(key.to_string()))
    }
}
