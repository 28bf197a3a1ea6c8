//! Archive extraction.

use super::error::PkgError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Unpack every entry of `archive` under `dest`.
///
/// Entries are processed in archive order. Missing ancestor directories are
/// created eagerly, so files listed before their directories are fine. The
/// first failing entry aborts extraction; entries already written stay.
pub fn unpack<R: Read>(dest: &Path, archive: &mut Archive<R>) -> Result<(), PkgError> {
    let entries = archive
        .entries()
        .map_err(|e| PkgError::extract_failed(dest, format!("Failed to read entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PkgError::extract_failed(dest, format!("Failed to read entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(dest, format!("Failed to read entry path: {e}")))?
            .into_owned();
        let dest_path = sanitize(dest, &path)?;

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| PkgError::io(&dest_path, e))?;
        } else if kind.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(|e| PkgError::io(parent, e))?;
            }

            let mut file = File::create(&dest_path).map_err(|e| PkgError::io(&dest_path, e))?;
            io::copy(&mut entry, &mut file).map_err(|e| PkgError::io(&dest_path, e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))
                        .map_err(|e| PkgError::io(&dest_path, e))?;
                }
            }
        }
        // Links and special entries are skipped
    }

    Ok(())
}

/// Unpack a gzip-compressed tar stream under `dest`.
pub fn unpack_tgz<R: Read>(dest: &Path, reader: R) -> Result<(), PkgError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    unpack(dest, &mut archive)
}

fn sanitize(dest: &Path, path: &Path) -> Result<PathBuf, PkgError> {
    if path.is_absolute() {
        return Err(PkgError::extract_failed(
            dest,
            format!("Archive contains absolute path: {}", path.display()),
        ));
    }

    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(PkgError::extract_failed(
            dest,
            format!("Archive contains path traversal: {}", path.display()),
        ));
    }

    Ok(dest.join(path))
}

/// Extract a package tarball to `dest_package_dir` atomically.
///
/// The archive is unpacked into a staging directory next to the destination
/// and its single top-level directory is renamed into place on success only.
/// A destination that already exists is left untouched.
pub fn extract_tgz_atomic(bytes: &[u8], dest_package_dir: &Path) -> Result<(), PkgError> {
    let content_dir = dest_package_dir
        .parent()
        .ok_or_else(|| PkgError::extract_failed(dest_package_dir, "Destination has no parent"))?;

    fs::create_dir_all(content_dir).map_err(|e| PkgError::io(content_dir, e))?;

    if dest_package_dir.exists() {
        return Ok(());
    }

    // Removed on drop, whichever way this returns
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(content_dir)
        .map_err(|e| PkgError::io(content_dir, e))?;

    unpack_tgz(staging.path(), bytes)?;

    let extracted = find_extracted_root(staging.path())?;

    match fs::rename(&extracted, dest_package_dir) {
        Ok(()) => Ok(()),
        // Lost a race against another extraction of the same content
        Err(_) if dest_package_dir.exists() => Ok(()),
        Err(e) => Err(PkgError::io(dest_package_dir, e)),
    }
}

/// Find the single top-level directory of an unpacked package tarball.
///
/// Most tarballs use `package/`, some use the bare package name.
fn find_extracted_root(staging: &Path) -> Result<PathBuf, PkgError> {
    let package_dir = staging.join("package");
    if package_dir.is_dir() {
        return Ok(package_dir);
    }

    let entries: Vec<_> = fs::read_dir(staging)
        .map_err(|e| PkgError::io(staging, e))?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect();

    match entries.len() {
        1 => Ok(entries[0].path()),
        0 => Err(PkgError::extract_failed(
            staging,
            "Tarball does not contain any top-level directory",
        )),
        n => Err(PkgError::extract_failed(
            staging,
            format!("Tarball contains {n} top-level directories, expected 1"),
        )),
    }
}
