use crate::ProvisionError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Fetch `url` into `cache_dir/file_name`, skipping the network entirely
/// when the archive is already cached.
///
/// A blake3 digest is recorded next to the archive on first download and
/// verified on every cache hit, so a corrupted or truncated archive fails
/// loudly instead of producing a broken install.
pub fn fetch_cached(
    agent: &ureq::Agent,
    url: &str,
    cache_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, ProvisionError> {
    std::fs::create_dir_all(cache_dir)?;
    let dest = cache_dir.join(file_name);
    let digest_path = cache_dir.join(format!("{file_name}.blake3"));

    if dest.exists() {
        verify_or_record_digest(&dest, &digest_path)?;
        debug!("using cached archive: {}", dest.display());
        return Ok(dest);
    }

    info!("downloading {url}");
    let body = fetch_bytes(agent, url)?;

    let mut tmp = NamedTempFile::new_in(cache_dir)?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(&dest).map_err(|e| ProvisionError::Io(e.error))?;

    let digest = blake3::hash(&body).to_hex().to_string();
    std::fs::write(&digest_path, &digest)?;
    debug!("cached {} ({} bytes, {})", dest.display(), body.len(), &digest[..12]);

    Ok(dest)
}

/// Plain GET returning the whole body, with status-code errors surfaced.
pub fn fetch_bytes(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, ProvisionError> {
    let resp = match agent.get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(code)) => {
            return Err(ProvisionError::Http {
                url: url.to_owned(),
                detail: format!("HTTP {code}"),
            });
        }
        Err(e) => {
            return Err(ProvisionError::Http {
                url: url.to_owned(),
                detail: e.to_string(),
            });
        }
    };

    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).map_err(|e| ProvisionError::Http {
        url: url.to_owned(),
        detail: e.to_string(),
    })?;
    Ok(body)
}

fn verify_or_record_digest(dest: &Path, digest_path: &Path) -> Result<(), ProvisionError> {
    let data = std::fs::read(dest)?;
    let actual = blake3::hash(&data).to_hex().to_string();

    if digest_path.exists() {
        let expected = std::fs::read_to_string(digest_path)?;
        if expected.trim() != actual {
            return Err(ProvisionError::Digest {
                path: dest.display().to_string(),
                expected: expected.trim().to_owned(),
                actual,
            });
        }
    } else {
        // Pre-digest cache entry; record one now.
        std::fs::write(digest_path, &actual)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockRepo {
        url: String,
        hits: Arc<AtomicUsize>,
        _handle: std::thread::JoinHandle<()>,
    }

    fn start_repo(body: &'static [u8]) -> MockRepo {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let handle = std::thread::spawn(move || {
            for request in server.incoming_requests() {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let response = if request.url().contains("missing") {
                    tiny_http::Response::from_data(Vec::new()).with_status_code(404)
                } else {
                    tiny_http::Response::from_data(body.to_vec())
                };
                let _ = request.respond(response);
            }
        });
        MockRepo {
            url,
            hits,
            _handle: handle,
        }
    }

    #[test]
    fn downloads_and_caches() {
        let repo = start_repo(b"archive-bytes");
        let dir = tempfile::tempdir().unwrap();
        let agent = ureq::Agent::new_with_defaults();

        let url = format!("{}/serverd-1.0.zip", repo.url);
        let p1 = fetch_cached(&agent, &url, dir.path(), "serverd-1.0.zip").unwrap();
        assert_eq!(std::fs::read(&p1).unwrap(), b"archive-bytes");
        assert!(dir.path().join("serverd-1.0.zip.blake3").exists());
        assert_eq!(repo.hits.load(Ordering::SeqCst), 1);

        // Second fetch is served from cache: zero network calls.
        let p2 = fetch_cached(&agent, &url, dir.path(), "serverd-1.0.zip").unwrap();
        assert_eq!(p1, p2);
        assert_eq!(repo.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupted_cache_entry_rejected() {
        let repo = start_repo(b"archive-bytes");
        let dir = tempfile::tempdir().unwrap();
        let agent = ureq::Agent::new_with_defaults();

        let url = format!("{}/serverd-1.0.zip", repo.url);
        fetch_cached(&agent, &url, dir.path(), "serverd-1.0.zip").unwrap();

        std::fs::write(dir.path().join("serverd-1.0.zip"), b"tampered").unwrap();
        let result = fetch_cached(&agent, &url, dir.path(), "serverd-1.0.zip");
        assert!(matches!(result, Err(ProvisionError::Digest { .. })));
    }

    #[test]
    fn http_404_is_an_error() {
        let repo = start_repo(b"unused");
        let dir = tempfile::tempdir().unwrap();
        let agent = ureq::Agent::new_with_defaults();

        let url = format!("{}/missing.zip", repo.url);
        let result = fetch_cached(&agent, &url, dir.path(), "missing.zip");
        assert!(matches!(result, Err(ProvisionError::Http { .. })));
        assert!(!dir.path().join("missing.zip").exists());
    }

    #[test]
    fn connection_refused_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let agent = ureq::Agent::new_with_defaults();
        let result = fetch_cached(&agent, "http://127.0.0.1:1/x.zip", dir.path(), "x.zip");
        assert!(matches!(result, Err(ProvisionError::Http { .. })));
    }

    #[test]
    fn pre_digest_cache_entry_gets_digest_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let agent = ureq::Agent::new_with_defaults();
        std::fs::write(dir.path().join("old.zip"), b"legacy").unwrap();

        let p = fetch_cached(&agent, "http://127.0.0.1:1/old.zip", dir.path(), "old.zip").unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), b"legacy");
        assert!(dir.path().join("old.zip.blake3").exists());
    }
}
