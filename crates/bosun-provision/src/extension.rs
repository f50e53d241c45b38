use crate::layout::InstallLayout;
use crate::ProvisionError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A pluggable feature package to merge into the distribution's shared
/// extension area. Implementations are discovered by the embedding host and
/// injected at orchestrator construction.
pub trait FeatureProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Path to the feature's packaged bundle (a zip archive).
    fn bundle(&self) -> PathBuf;
}

/// Distinguished bundle entry describing the capability a feature adds.
pub const CAPABILITY_ENTRY: &str = "capability.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub symbolic_name: String,
    pub version: String,
    #[serde(default)]
    pub provides: Vec<String>,
}

/// Merges feature bundles into `usr/extension/lib/`, once per file.
///
/// Library files already present are skipped, which makes assembly
/// idempotent across repeated calls and across providers shipping
/// overlapping libraries.
pub struct ExtensionAssembler {
    layout: InstallLayout,
}

impl ExtensionAssembler {
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }

    pub fn assemble(&self, providers: &[Box<dyn FeatureProvider>]) -> Result<(), ProvisionError> {
        let lib_dir = self.layout.extension_lib_dir();
        let features_dir = self.layout.extension_features_dir();
        fs::create_dir_all(&lib_dir)?;
        fs::create_dir_all(&features_dir)?;

        for provider in providers {
            self.merge_bundle(provider.as_ref(), &lib_dir, &features_dir)?;
        }
        Ok(())
    }

    fn merge_bundle(
        &self,
        provider: &dyn FeatureProvider,
        lib_dir: &Path,
        features_dir: &Path,
    ) -> Result<(), ProvisionError> {
        let bundle = provider.bundle();
        let feature_err = |detail: String| ProvisionError::Feature {
            feature: provider.name().to_owned(),
            detail,
        };

        let file = fs::File::open(&bundle)
            .map_err(|e| feature_err(format!("cannot open bundle {}: {e}", bundle.display())))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| feature_err(e.to_string()))?;

        let mut merged = 0usize;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| feature_err(e.to_string()))?;
            let Some(path) = entry.enclosed_name().map(PathBuf::from) else {
                continue;
            };

            if path == Path::new(CAPABILITY_ENTRY) {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| feature_err(e.to_string()))?;
                self.write_capability(&text, features_dir, provider.name())?;
                continue;
            }

            let Ok(rel) = path.strip_prefix("lib") else {
                continue;
            };
            if entry.is_dir() || rel.as_os_str().is_empty() {
                continue;
            }

            let dest = lib_dir.join(rel);
            if dest.exists() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| feature_err(e.to_string()))?;
            fs::write(&dest, data)?;
            merged += 1;
        }

        if merged > 0 {
            info!("feature '{}' merged {merged} library file(s)", provider.name());
        } else {
            debug!("feature '{}' already merged", provider.name());
        }
        Ok(())
    }

    fn write_capability(
        &self,
        text: &str,
        features_dir: &Path,
        feature: &str,
    ) -> Result<(), ProvisionError> {
        let descriptor: CapabilityDescriptor =
            serde_json::from_str(text).map_err(|e| ProvisionError::Feature {
                feature: feature.to_owned(),
                detail: format!("malformed {CAPABILITY_ENTRY}: {e}"),
            })?;

        let dest = features_dir.join(format!("{}.json", descriptor.symbolic_name));
        if dest.exists() {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&descriptor).map_err(|e| ProvisionError::Feature {
            feature: feature.to_owned(),
            detail: e.to_string(),
        })?;
        fs::write(&dest, json)?;
        debug!("wrote capability descriptor {}", dest.display());
        Ok(())
    }
}
