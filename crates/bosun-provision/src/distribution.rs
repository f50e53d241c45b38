use crate::archive::{extract_archive, mark_bin_executables};
use crate::download::fetch_cached;
use crate::layout::InstallLayout;
use crate::ProvisionError;
use bosun_schema::OrchestratorSettings;
use std::path::PathBuf;
use tracing::{debug, info};

/// Deploys the shared server-technology distribution, once per version.
///
/// Holds no lock: deployment runs inside dispatcher-serialized tasks, and
/// the on-disk distribution root doubles as the cache marker, so a repeat
/// call returns immediately without touching the network.
pub struct DistributionProvisioner {
    settings: OrchestratorSettings,
    layout: InstallLayout,
    agent: ureq::Agent,
}

impl DistributionProvisioner {
    pub fn new(settings: OrchestratorSettings, layout: InstallLayout) -> Self {
        Self {
            settings,
            layout,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    #[inline]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Ensure the distribution exists on disk and return its root.
    pub fn deploy(&self) -> Result<PathBuf, ProvisionError> {
        let root = self.layout.dist_root();
        if root.exists() {
            debug!("distribution already deployed at {}", root.display());
            return Ok(root);
        }

        self.layout.initialize()?;

        let url = self.settings.archive_url();
        let file_name = format!(
            "{}.{}",
            self.settings.dist_dir_name(),
            self.settings.distribution.archive.extension()
        );
        info!("deploying distribution {} from {url}", self.settings.dist_dir_name());

        let archive = fetch_cached(&self.agent, &url, &self.layout.download_dir(), &file_name)?;

        if let Err(e) = extract_archive(&archive, &root) {
            // A half-extracted root would satisfy the exists() fast path on
            // the next call; remove it so the failure stays retryable.
            let _ = std::fs::remove_dir_all(&root);
            return Err(e);
        }
        mark_bin_executables(&root)?;

        info!("distribution ready at {}", root.display());
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_schema::parse_settings_str;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dist_zip_bytes() -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            writer.start_file("serverd/bin/server", opts).unwrap();
            writer.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
            writer.start_file("serverd/lib/core.jar", opts).unwrap();
            writer.write_all(b"jar-bytes").unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn start_repo(body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let _ = request.respond(tiny_http::Response::from_data(body.clone()));
            }
        });
        (url, hits)
    }

    fn test_provisioner(base: &std::path::Path, repo_url: &str) -> DistributionProvisioner {
        let settings = parse_settings_str(&format!(
            r#"
[install]
base_dir = "{}"
[distribution]
group = "io.bosun"
artifact = "serverd"
version = "1.0"
repository = "{repo_url}"
archive = "zip"
"#,
            base.display()
        ))
        .unwrap();
        let layout = InstallLayout::new(base, settings.dist_dir_name());
        DistributionProvisioner::new(settings, layout)
    }

    #[test]
    fn deploy_downloads_extracts_and_strips_container() {
        let (url, hits) = start_repo(dist_zip_bytes());
        let base = tempfile::tempdir().unwrap();
        let prov = test_provisioner(base.path(), &url);

        let root = prov.deploy().unwrap();
        assert!(root.join("bin/server").is_file());
        assert!(root.join("lib/core.jar").is_file());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_deploy_makes_zero_network_calls() {
        let (url, hits) = start_repo(dist_zip_bytes());
        let base = tempfile::tempdir().unwrap();
        let prov = test_provisioner(base.path(), &url);

        let r1 = prov.deploy().unwrap();
        let r2 = prov.deploy().unwrap();
        assert_eq!(r1, r2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn launcher_is_executable_after_deploy() {
        use std::os::unix::fs::PermissionsExt;
        let (url, _hits) = start_repo(dist_zip_bytes());
        let base = tempfile::tempdir().unwrap();
        let prov = test_provisioner(base.path(), &url);

        let root = prov.deploy().unwrap();
        let mode = std::fs::metadata(root.join("bin/server")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn failed_extraction_leaves_no_dist_root() {
        let (url, _hits) = start_repo(b"not a zip at all".to_vec());
        let base = tempfile::tempdir().unwrap();
        let prov = test_provisioner(base.path(), &url);

        assert!(prov.deploy().is_err());
        assert!(!prov.layout().dist_root().exists());
    }
}
