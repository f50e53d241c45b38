use crate::ProvisionError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout for the Bosun install tree.
///
/// A cheap cloneable path factory rooted at the configured base directory.
/// The distribution root itself is created by the provisioner; `initialize`
/// only creates the caches that exist independently of any deployment.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    base: PathBuf,
    dist_dir_name: String,
}

impl InstallLayout {
    pub fn new(base: impl Into<PathBuf>, dist_dir_name: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            dist_dir_name: dist_dir_name.into(),
        }
    }

    #[inline]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Root of the deployed distribution, `<base>/<artifact>-<version>/`.
    #[inline]
    pub fn dist_root(&self) -> PathBuf {
        self.base.join(&self.dist_dir_name)
    }

    /// Archive cache shared by every download this orchestrator performs.
    #[inline]
    pub fn download_dir(&self) -> PathBuf {
        self.base.join("download")
    }

    /// Cache of resolved runtime kits, one directory per (version, variant).
    #[inline]
    pub fn runtime_dir(&self) -> PathBuf {
        self.base.join("runtime")
    }

    #[inline]
    pub fn runtime_kit(&self, dir_name: &str) -> PathBuf {
        self.runtime_dir().join(dir_name)
    }

    #[inline]
    pub fn servers_dir(&self) -> PathBuf {
        self.dist_root().join("usr").join("servers")
    }

    #[inline]
    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.servers_dir().join(name)
    }

    #[inline]
    pub fn server_logs_dir(&self, name: &str) -> PathBuf {
        self.server_dir(name).join("logs")
    }

    /// Primary log file the tailer follows.
    #[inline]
    pub fn server_console_log(&self, name: &str) -> PathBuf {
        self.server_logs_dir(name).join("console.log")
    }

    #[inline]
    pub fn server_dropins_dir(&self, name: &str) -> PathBuf {
        self.server_dir(name).join("dropins")
    }

    /// Shared feature library area of the distribution.
    #[inline]
    pub fn extension_lib_dir(&self) -> PathBuf {
        self.dist_root().join("usr").join("extension").join("lib")
    }

    #[inline]
    pub fn extension_features_dir(&self) -> PathBuf {
        self.extension_lib_dir().join("features")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.base.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), ProvisionError> {
        fs::create_dir_all(self.download_dir())?;
        fs::create_dir_all(self.runtime_dir())?;
        Ok(())
    }
}
