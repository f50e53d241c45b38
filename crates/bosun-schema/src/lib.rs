//! Value objects and text formats for Bosun server orchestration.
//!
//! This crate defines the schema layer: the `RuntimeId` (version, variant)
//! pair identifying a managed runtime kit, the `ServerConfig` value object a
//! configuration collaborator hands to the orchestrator per server name,
//! TOML settings parsing (`OrchestratorSettings`), server-name validation,
//! and endpoint extraction from written server descriptors.

pub mod config;
pub mod descriptor;
pub mod settings;
pub mod types;

pub use config::{validate_server_name, ServerConfig};
pub use descriptor::{parse_endpoints, Endpoint};
pub use settings::{
    parse_settings_file, parse_settings_str, ArchiveKind, CallbackSection, DistributionSection,
    InstallSection, OrchestratorSettings,
};
pub use types::RuntimeId;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid server name: {0}")]
    InvalidName(String),
    #[error("server configuration is missing a descriptor")]
    MissingDescriptor,
    #[error("distribution coordinate field must not be empty: {0}")]
    EmptyCoordinate(&'static str),
    #[error("unsupported archive kind: '{0}', expected 'zip' or 'tar.gz'")]
    UnsupportedArchiveKind(String),
}
