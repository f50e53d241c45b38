//! Provisioning layer for Bosun: everything that materializes files under
//! the install tree.
//!
//! This crate implements the expensive, cached side of orchestration:
//! deploying the shared server distribution from a repository coordinate
//! (download + extract, once per version), resolving managed runtime kits
//! through pluggable priority-ordered providers, and merging feature
//! bundles into the distribution's shared extension area. All operations
//! are idempotent by construction (existence on disk is the cache), and
//! none of them lock internally: callers are serialized by the dispatcher.

pub mod archive;
pub mod distribution;
pub mod download;
pub mod extension;
pub mod layout;
pub mod runtime;

pub use archive::{extract_archive, mark_bin_executables, ArchiveFormat};
pub use distribution::DistributionProvisioner;
pub use download::fetch_cached;
pub use extension::{ExtensionAssembler, FeatureProvider};
pub use layout::InstallLayout;
pub use runtime::{HostRuntimeProvider, ReleaseIndexProvider, RuntimeProvider, RuntimeResolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provision I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download failed for {url}: {detail}")]
    Http { url: String, detail: String },
    #[error("archive error in {path}: {detail}")]
    Archive { path: String, detail: String },
    #[error("cached archive digest mismatch for {path}: expected {expected}, got {actual}")]
    Digest {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("no release asset matches os/arch/variant filters for runtime {0}")]
    NoMatchingAsset(String),
    #[error("no provider can supply runtime {0}")]
    NoProvider(String),
    #[error("malformed release index from {url}: {detail}")]
    MalformedIndex { url: String, detail: String },
    #[error("feature bundle error for '{feature}': {detail}")]
    Feature { feature: String, detail: String },
}
