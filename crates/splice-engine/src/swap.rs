//! Backup and atomic replacement of the container
//!
//! The new archive is written to a temp file in the container's directory,
//! synced, and renamed over the container. The backup is created once,
//! before the first swap, and never overwritten afterwards.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{EngineError, EngineResult};

/// Backup location for `container`: the container path plus `suffix`
#[must_use]
pub fn backup_path(container: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(container.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// Directory holding `path` (the working directory for bare file names)
#[must_use]
pub fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Existing or newly created backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub path: PathBuf,
    /// Whether this call created it
    pub created: bool,
}

/// Copy `container` to its backup path unless a backup already exists
///
/// A partially written backup is removed before the error is returned.
///
/// # Errors
/// Returns error if the container cannot be read or the backup written
pub fn ensure_backup(container: &Path, suffix: &str) -> EngineResult<Backup> {
    let path = backup_path(container, suffix);
    let mut target = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!("Keeping existing backup {}", path.display());
            return Ok(Backup {
                path,
                created: false,
            });
        }
        Err(e) => return Err(EngineError::io(&path, e)),
    };

    let copied = File::open(container)
        .map_err(|e| EngineError::io(container, e))
        .and_then(|source| {
            let mut writer = BufWriter::new(&mut target);
            io::copy(&mut BufReader::new(source), &mut writer)
                .and_then(|_| writer.flush())
                .map_err(|e| EngineError::io(&path, e))
        })
        .and_then(|()| target.sync_all().map_err(|e| EngineError::io(&path, e)));

    if let Err(e) = copied {
        drop(target);
        if let Err(cleanup) = fs::remove_file(&path) {
            tracing::warn!("Failed to remove partial backup {}: {}", path.display(), cleanup);
        }
        return Err(e);
    }

    tracing::info!("Backed up {} to {}", container.display(), path.display());
    Ok(Backup {
        path,
        created: true,
    })
}

/// Rename a completed archive over `container`
///
/// The temp file takes over the container's permissions first. On failure
/// the container is untouched and the backup stays where it is.
///
/// # Errors
/// Returns [`EngineError::Swap`] if syncing or renaming fails
pub fn swap_in(archive: NamedTempFile, container: &Path, backup: &Path) -> EngineResult<()> {
    let swap_error = |source: io::Error| EngineError::Swap {
        path: container.to_path_buf(),
        backup: backup.to_path_buf(),
        source,
    };

    if let Ok(metadata) = fs::metadata(container) {
        archive
            .as_file()
            .set_permissions(metadata.permissions())
            .map_err(swap_error)?;
    }
    archive.as_file().sync_all().map_err(swap_error)?;
    archive.persist(container).map_err(|e| swap_error(e.error))?;
    sync_dir(parent_dir(container));

    tracing::info!("Swapped patched archive into {}", container.display());
    Ok(())
}

/// Replace `container` with its backup
///
/// The backup itself is kept.
///
/// # Errors
/// Returns [`EngineError::NoBackup`] if no backup exists, or an I/O error
/// if copying or renaming fails
pub fn restore_backup(container: &Path, suffix: &str) -> EngineResult<PathBuf> {
    let backup = backup_path(container, suffix);
    let source = match File::open(&backup) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::NoBackup(backup));
        }
        Err(e) => return Err(EngineError::io(&backup, e)),
    };

    let dir = parent_dir(container);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EngineError::io(dir, e))?;
    let tmp_path = tmp.path().to_path_buf();
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        io::copy(&mut BufReader::new(source), &mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| EngineError::io(&tmp_path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| EngineError::io(&tmp_path, e))?;
    tmp.persist(container)
        .map_err(|e| EngineError::io(container, e.error))?;
    sync_dir(dir);

    tracing::info!("Restored {} from {}", container.display(), backup.display());
    Ok(backup)
}

/// Flush a directory entry update to disk
fn sync_dir(dir: &Path) {
    if !cfg!(unix) {
        return;
    }
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/srv/host.jar"), ".bak"),
            PathBuf::from("/srv/host.jar.bak")
        );
        assert_eq!(parent_dir(Path::new("host.jar")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/srv/host.jar")), Path::new("/srv"));
    }

    #[test]
    fn backup_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("host.jar");
        fs::write(&container, b"original").unwrap();

        let first = ensure_backup(&container, ".bak").unwrap();
        assert!(first.created);
        assert_eq!(fs::read(&first.path).unwrap(), b"original");

        fs::write(&container, b"patched").unwrap();
        let second = ensure_backup(&container, ".bak").unwrap();
        assert!(!second.created);
        assert_eq!(fs::read(&second.path).unwrap(), b"original");
    }

    #[test]
    fn backup_failure_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("missing.jar");
        assert!(ensure_backup(&container, ".bak").is_err());
        assert!(!backup_path(&container, ".bak").exists());
    }

    #[test]
    fn swap_replaces_container() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("host.jar");
        fs::write(&container, b"old").unwrap();

        let mut tmp = NamedTempFile::new_in(dir.path()).unwrap();
        tmp.write_all(b"new").unwrap();
        let tmp_path = tmp.path().to_path_buf();

        swap_in(tmp, &container, &backup_path(&container, ".bak")).unwrap();
        assert_eq!(fs::read(&container).unwrap(), b"new");
        assert!(!tmp_path.exists());
    }

    #[test]
    fn failed_swap_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("host.jar");
        fs::write(&container, b"original").unwrap();
        let backup = ensure_backup(&container, ".bak").unwrap();

        // a non-empty directory cannot be renamed over
        fs::remove_file(&container).unwrap();
        fs::create_dir(&container).unwrap();
        fs::write(container.join("pinned"), b"").unwrap();

        let mut tmp = NamedTempFile::new_in(dir.path()).unwrap();
        tmp.write_all(b"new").unwrap();
        let tmp_path = tmp.path().to_path_buf();

        let err = swap_in(tmp, &container, &backup.path).unwrap_err();
        assert!(matches!(err, EngineError::Swap { backup: ref kept, .. } if *kept == backup.path));
        assert_eq!(fs::read(&backup.path).unwrap(), b"original");
        assert!(container.join("pinned").exists());
        assert!(!tmp_path.exists());
    }

    #[test]
    fn restore_copies_backup_back() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("host.jar");
        fs::write(&container, b"original").unwrap();
        ensure_backup(&container, ".bak").unwrap();
        fs::write(&container, b"broken").unwrap();

        let backup = restore_backup(&container, ".bak").unwrap();
        assert_eq!(fs::read(&container).unwrap(), b"original");
        assert!(backup.exists());
    }

    #[test]
    fn restore_without_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let container = dir.path().join("host.jar");
        fs::write(&container, b"original").unwrap();
        assert!(matches!(
            restore_backup(&container, ".bak"),
            Err(EngineError::NoBackup(_))
        ));
        assert_eq!(fs::read(&container).unwrap(), b"original");
    }
}
