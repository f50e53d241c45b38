use crate::types::RuntimeId;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-server configuration handed in by the configuration collaborator.
///
/// A value object: replacing it on a live server triggers a config rewrite
/// by the dispatcher, nothing here mutates in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Descriptor text, written verbatim to the server's `server.xml`.
    pub descriptor: String,
    /// Environment file text (`server.env`).
    #[serde(default)]
    pub env: String,
    /// Launch options text (`server.opts`).
    #[serde(default)]
    pub options: String,
    /// Bootstrap properties text (`bootstrap.properties`).
    #[serde(default)]
    pub bootstrap: String,
    /// Extra asset archives to unpack into the server directory on create.
    /// Each archive is deleted after successful extraction.
    #[serde(default)]
    pub asset_archives: Vec<PathBuf>,
    /// The managed runtime kit this server runs on.
    pub runtime: RuntimeId,
}

impl ServerConfig {
    pub fn new(descriptor: impl Into<String>, runtime: RuntimeId) -> Self {
        Self {
            descriptor: descriptor.into(),
            env: String::new(),
            options: String::new(),
            bootstrap: String::new(),
            asset_archives: Vec::new(),
            runtime,
        }
    }

    /// Reject configurations that could never produce a usable server.
    /// Runs before any filesystem mutation.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.descriptor.trim().is_empty() {
            return Err(SchemaError::MissingDescriptor);
        }
        Ok(())
    }
}

pub fn validate_server_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > 64 {
        return Err(SchemaError::InvalidName(
            "server name must be 1-64 characters".to_owned(),
        ));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(SchemaError::InvalidName(
            "server name must match [a-zA-Z0-9_-]".to_owned(),
        ));
    }
    Ok(())
}
