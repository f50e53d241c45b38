use crate::lifecycle::ServerState;
use crate::CoreError;
use bosun_provision::InstallLayout;
use bosun_process::{LogTailer, ProcessHandle};
use bosun_schema::ServerConfig;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const DESCRIPTOR_FILE: &str = "server.xml";
pub const ENV_FILE: &str = "server.env";
pub const OPTIONS_FILE: &str = "server.opts";
pub const BOOTSTRAP_FILE: &str = "bootstrap.properties";

/// Per-name aggregate of configuration, on-disk location, process handle,
/// and log tailer.
///
/// Lives only in memory; the on-disk skeleton is the durable part and is
/// re-discovered by a fresh orchestrator scanning the install tree.
pub struct ServerInstance {
    name: String,
    pub config: ServerConfig,
    pub state: ServerState,
    pub handle: Option<ProcessHandle>,
    pub tailer: Option<LogTailer>,
    pub created_at: String,
    dir: Option<PathBuf>,
}

impl ServerInstance {
    pub fn new(name: impl Into<String>, config: ServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: ServerState::Unconfigured,
            handle: None,
            tailer: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            dir: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server directory under the distribution, resolved once and cached.
    pub fn dir(&mut self, layout: &InstallLayout) -> PathBuf {
        self.dir
            .get_or_insert_with(|| layout.server_dir(&self.name))
            .clone()
    }

    /// Create the on-disk skeleton if absent. Existing directories are left
    /// untouched, so repeated creates do not disturb deployed content.
    pub fn ensure_skeleton(&mut self, layout: &InstallLayout) -> Result<(), CoreError> {
        let dir = self.dir(layout);
        if dir.exists() {
            debug!("server skeleton already present at {}", dir.display());
        } else {
            info!("creating server skeleton at {}", dir.display());
        }
        fs::create_dir_all(dir.join("logs"))?;
        fs::create_dir_all(dir.join("dropins"))?;
        Ok(())
    }

    /// Rewrite every configuration file from the current config. Always
    /// overwrites: the latest submitted configuration wins.
    pub fn write_config_files(&mut self, layout: &InstallLayout) -> Result<(), CoreError> {
        let dir = self.dir(layout);
        write_atomic(&dir.join(DESCRIPTOR_FILE), self.config.descriptor.as_bytes())?;
        write_atomic(&dir.join(ENV_FILE), self.config.env.as_bytes())?;
        write_atomic(&dir.join(OPTIONS_FILE), self.config.options.as_bytes())?;
        write_atomic(&dir.join(BOOTSTRAP_FILE), self.config.bootstrap.as_bytes())?;
        Ok(())
    }

    /// Partial update: only the descriptor is rewritten. Everything else
    /// requires a fresh create.
    pub fn write_descriptor(&mut self, layout: &InstallLayout) -> Result<(), CoreError> {
        let dir = self.dir(layout);
        write_atomic(&dir.join(DESCRIPTOR_FILE), self.config.descriptor.as_bytes())
    }

    /// Copy `source` into the hot-deploy directory, optionally renamed, and
    /// delete the source only after a successful copy when asked to.
    pub fn deploy_dropin(
        &mut self,
        layout: &InstallLayout,
        artifact: Option<&str>,
        source: &Path,
        delete_after: bool,
    ) -> Result<(), CoreError> {
        if !source.exists() {
            debug!("dropin source {} does not exist; nothing to do", source.display());
            return Ok(());
        }

        let file_name = artifact
            .map(std::ffi::OsString::from)
            .or_else(|| source.file_name().map(std::ffi::OsString::from))
            .unwrap_or_else(|| std::ffi::OsString::from("dropin"));
        let dropins = layout.server_dropins_dir(&self.name);
        fs::create_dir_all(&dropins)?;
        let dest = dropins.join(file_name);

        fs::copy(source, &dest)?;
        info!("deployed dropin {} -> {}", source.display(), dest.display());

        if delete_after {
            fs::remove_file(source)?;
        }
        Ok(())
    }
}

/// Write via a sibling temp file + rename, so a crashed write never leaves
/// a half-written config behind.
fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), CoreError> {
    let dir = dest.parent().ok_or_else(|| {
        CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", dest.display()),
        ))
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}
