use crate::ProvisionError;
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from the archive file name.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".zip") || name.ends_with(".jar") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest`, stripping a single leading container
/// directory when every entry lives under one.
///
/// Entries escaping the destination (absolute paths, `..`) are skipped with
/// a warning rather than failing the whole extraction.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::from_name(&name).ok_or_else(|| ProvisionError::Archive {
        path: archive.display().to_string(),
        detail: "unsupported archive format (expected .zip or .tar.gz)".to_owned(),
    })?;

    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
    }
}

fn archive_err(archive: &Path, e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Archive {
        path: archive.display().to_string(),
        detail: e.to_string(),
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(archive, e))?;

    let names: Vec<PathBuf> = (0..zip.len())
        .filter_map(|i| {
            zip.by_index(i)
                .ok()
                .and_then(|f| f.enclosed_name().map(PathBuf::from))
        })
        .collect();
    let strip = common_root(&names);

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| archive_err(archive, e))?;
        let Some(raw) = entry.enclosed_name().map(PathBuf::from) else {
            warn!("skipping unsafe zip entry: {}", entry.name());
            continue;
        };
        let Some(rel) = stripped(&raw, strip.as_deref()) else {
            continue;
        };
        let out = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| archive_err(archive, e))?;
            fs::write(&out, data)?;
        }
    }
    debug!("extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    // First pass over the entry list to decide whether a container
    // directory needs stripping; tar is a stream, so reopen to unpack.
    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let mut names = Vec::new();
    for entry in tar.entries().map_err(|e| archive_err(archive, e))? {
        let entry = entry.map_err(|e| archive_err(archive, e))?;
        let path = entry.path().map_err(|e| archive_err(archive, e))?;
        names.push(path.into_owned());
    }
    let strip = common_root(&names);

    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    for entry in tar.entries().map_err(|e| archive_err(archive, e))? {
        let mut entry = entry.map_err(|e| archive_err(archive, e))?;
        let raw = entry.path().map_err(|e| archive_err(archive, e))?.into_owned();
        if !is_safe(&raw) {
            warn!("skipping unsafe tar entry: {}", raw.display());
            continue;
        }
        let Some(rel) = stripped(&raw, strip.as_deref()) else {
            continue;
        };
        let out = dest.join(rel);

        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&out)?;
        } else {
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&out).map_err(|e| archive_err(archive, e))?;
        }
    }
    debug!("extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

/// The single top-level directory shared by every entry, if there is one.
fn common_root(names: &[PathBuf]) -> Option<PathBuf> {
    let mut root: Option<&std::ffi::OsStr> = None;
    let mut saw_nested = false;
    for name in names {
        let mut comps = name.components().filter_map(|c| match c {
            Component::Normal(os) => Some(os),
            _ => None,
        });
        let first = comps.next()?;
        if comps.next().is_some() {
            saw_nested = true;
        }
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    if saw_nested {
        root.map(PathBuf::from)
    } else {
        None
    }
}

/// Entry path relative to the destination, with the container dir removed.
/// `None` for the container directory entry itself.
fn stripped(raw: &Path, strip: Option<&Path>) -> Option<PathBuf> {
    match strip {
        Some(root) => {
            let rel = raw.strip_prefix(root).ok()?;
            if rel.as_os_str().is_empty() {
                None
            } else {
                Some(rel.to_path_buf())
            }
        }
        None => Some(raw.to_path_buf()),
    }
}

fn is_safe(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Mark every file under a `bin/` directory executable.
///
/// Zip archives do not reliably carry unix permission bits and the launcher
/// scripts must be runnable after extraction.
#[cfg(unix)]
pub fn mark_bin_executables(root: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;

    fn walk(dir: &Path, in_bin: bool) -> Result<(), ProvisionError> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Ok(());
        };
        for entry in entries {
            let entry = entry?;
            let ft = entry.file_type()?;
            if ft.is_dir() {
                let is_bin = entry.file_name() == "bin";
                walk(&entry.path(), in_bin || is_bin)?;
            } else if ft.is_file() && in_bin {
                let mut perms = entry.metadata()?.permissions();
                perms.set_mode(0o755);
                fs::set_permissions(entry.path(), perms)?;
            }
        }
        Ok(())
    }

    walk(root, false)
}

#[cfg(not(unix))]
pub fn mark_bin_executables(_root: &Path) -> Result<(), ProvisionError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        {
            let mut writer = zip::ZipWriter::new(&mut tmp);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, data) in entries {
                if name.ends_with('/') {
                    writer.add_directory(name.trim_end_matches('/'), opts).unwrap();
                } else {
                    writer.start_file(*name, opts).unwrap();
                    writer.write_all(data).unwrap();
                }
            }
            writer.finish().unwrap();
        }
        tmp
    }

    fn build_tar_gz(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let tmp = tempfile::Builder::new().suffix(".tar.gz").tempfile().unwrap();
        let gz = flate2::write::GzEncoder::new(
            tmp.as_file().try_clone().unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(gz);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        tmp
    }

    #[test]
    fn zip_with_container_dir_is_stripped() {
        let zip = build_zip(&[
            ("serverd/bin/server", b"#!/bin/sh\n" as &[u8]),
            ("serverd/lib/core.jar", b"jar"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        extract_archive(zip.path(), dest.path()).unwrap();
        assert!(dest.path().join("bin/server").is_file());
        assert!(dest.path().join("lib/core.jar").is_file());
        assert!(!dest.path().join("serverd").exists());
    }

    #[test]
    fn zip_without_container_dir_extracts_flat() {
        let zip = build_zip(&[("bin/server", b"x" as &[u8]), ("README", b"r")]);
        let dest = tempfile::tempdir().unwrap();
        extract_archive(zip.path(), dest.path()).unwrap();
        assert!(dest.path().join("bin/server").is_file());
        assert!(dest.path().join("README").is_file());
    }

    #[test]
    fn tar_gz_with_container_dir_is_stripped() {
        let tar = build_tar_gz(&[
            ("serverd/bin/server", b"#!/bin/sh\n" as &[u8]),
            ("serverd/etc/defaults", b"k=v"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        extract_archive(tar.path(), dest.path()).unwrap();
        assert!(dest.path().join("bin/server").is_file());
        assert!(dest.path().join("etc/defaults").is_file());
    }

    #[test]
    fn unsupported_format_rejected() {
        let tmp = tempfile::Builder::new().suffix(".rar").tempfile().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let result = extract_archive(tmp.path(), dest.path());
        assert!(matches!(result, Err(ProvisionError::Archive { .. })));
    }

    #[test]
    fn malformed_zip_rejected() {
        let mut tmp = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        tmp.write_all(b"this is not a zip").unwrap();
        let dest = tempfile::tempdir().unwrap();
        let result = extract_archive(tmp.path(), dest.path());
        assert!(matches!(result, Err(ProvisionError::Archive { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn bin_files_marked_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("bin/server"), "#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("lib/core.jar"), "jar").unwrap();

        mark_bin_executables(dir.path()).unwrap();

        let bin_mode = fs::metadata(dir.path().join("bin/server")).unwrap().permissions().mode();
        assert_eq!(bin_mode & 0o111, 0o111);
        let lib_mode = fs::metadata(dir.path().join("lib/core.jar")).unwrap().permissions().mode();
        assert_eq!(lib_mode & 0o111, 0);
    }

    #[test]
    fn common_root_detection() {
        let shared = vec![PathBuf::from("wlp/bin/server"), PathBuf::from("wlp/README")];
        assert_eq!(common_root(&shared), Some(PathBuf::from("wlp")));

        let mixed = vec![PathBuf::from("wlp/bin/server"), PathBuf::from("other/file")];
        assert_eq!(common_root(&mixed), None);

        let flat = vec![PathBuf::from("README"), PathBuf::from("LICENSE")];
        assert_eq!(common_root(&flat), None);
    }
}
