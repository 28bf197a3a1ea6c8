//! Logical links from `node_modules` paths to content directories.

use super::error::PkgError;
use std::fs;
use std::io;
use std::path::Path;

/// What [`link_package`] found at the link path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// A link to the same target was already there.
    Existing,
}

/// Create a directory link at `link` pointing to `target`.
///
/// `target` does not need to exist yet. Parent directories of `link` are
/// created as needed. An existing link to `target` is accepted; anything else
/// already at `link` is a conflict.
pub fn link_package(target: &Path, link: &Path) -> Result<LinkOutcome, PkgError> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent).map_err(|e| PkgError::io(parent, e))?;
    }

    match create_dir_link(target, link) {
        Ok(()) => Ok(LinkOutcome::Created),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if points_to(link, target) {
                Ok(LinkOutcome::Existing)
            } else {
                Err(PkgError::LinkConflict {
                    link: link.to_path_buf(),
                    expected: target.to_path_buf(),
                })
            }
        }
        Err(e) => Err(PkgError::io(link, e)),
    }
}

fn points_to(link: &Path, target: &Path) -> bool {
    let Ok(existing) = fs::read_link(link) else {
        return false;
    };
    if existing.is_absolute() {
        return existing == target;
    }
    link.parent()
        .is_some_and(|parent| parent.join(existing) == target)
}

/// Create a directory link (symlink on Unix, directory symlink on Windows).
fn create_dir_link(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(src, dst)
    }

    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_dir(src, dst)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (src, dst);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "directory links are not supported on this platform",
        ))
    }
}
