use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Orchestrator-wide settings, parsed from TOML.
///
/// Provided by the embedding host's configuration collaborator; everything
/// per-server arrives separately as a [`crate::ServerConfig`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSettings {
    pub install: InstallSection,
    pub distribution: DistributionSection,
    #[serde(default)]
    pub callback: CallbackSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallSection {
    /// Base directory under which the distribution, download cache, and
    /// runtime kits are materialized.
    pub base_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DistributionSection {
    /// Dotted group id, mapped to a path in the repository.
    pub group: String,
    pub artifact: String,
    pub version: String,
    /// Repository root URL the archive is fetched from.
    pub repository: String,
    #[serde(default)]
    pub archive: ArchiveKind,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    #[default]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CallbackSection {
    /// Host the spawned control process can reach the managing host on.
    #[serde(default = "default_callback_host")]
    pub host: String,
    #[serde(default = "default_callback_port")]
    pub port: u16,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            host: default_callback_host(),
            port: default_callback_port(),
        }
    }
}

fn default_callback_host() -> String {
    "localhost".to_owned()
}

fn default_callback_port() -> u16 {
    9443
}

impl OrchestratorSettings {
    /// Reject settings that could never provision anything.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let d = &self.distribution;
        for (field, value) in [
            ("install.base_dir", self.install.base_dir.as_str()),
            ("distribution.group", d.group.as_str()),
            ("distribution.artifact", d.artifact.as_str()),
            ("distribution.version", d.version.as_str()),
            ("distribution.repository", d.repository.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(SchemaError::EmptyCoordinate(field));
            }
        }
        Ok(())
    }

    /// Base URL spawned control processes use to call back into the host.
    pub fn callback_url(&self) -> String {
        format!("http://{}:{}", self.callback.host, self.callback.port)
    }

    /// Directory name of the distribution root under the base dir.
    pub fn dist_dir_name(&self) -> String {
        format!("{}-{}", self.distribution.artifact, self.distribution.version)
    }

    /// Download URL for the distribution archive, built from the coordinate.
    pub fn archive_url(&self) -> String {
        let d = &self.distribution;
        format!(
            "{}/{}/{}/{}/{}-{}.{}",
            d.repository.trim_end_matches('/'),
            d.group.replace('.', "/"),
            d.artifact,
            d.version,
            d.artifact,
            d.version,
            d.archive.extension()
        )
    }
}

pub fn parse_settings_str(input: &str) -> Result<OrchestratorSettings, SchemaError> {
    let settings: OrchestratorSettings = toml::from_str(input)?;
    settings.validate()?;
    Ok(settings)
}

pub fn parse_settings_file(path: impl AsRef<Path>) -> Result<OrchestratorSettings, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_settings_str(&content)
}
