//! Error types for the patch engine
//!
//! Provides error handling for:
//! - Container I/O (open, read, write, copy)
//! - Final swap of the patched container
//! - Configuration loading

use std::path::PathBuf;

use splice_unit::UnitError;
use zip::result::ZipError;

/// Errors that abort a patch run
///
/// Per-unit failures are not represented here; they are logged and counted
/// in the patch report instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Filesystem error
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive could not be read or written
    #[error("archive error on {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },

    /// Replacing the container failed after the new archive was complete
    #[error("swap into {path} failed (backup kept at {backup}): {source}")]
    Swap {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No backup to restore from
    #[error("no backup found at {0}")]
    NoBackup(PathBuf),

    /// Configuration file could not be parsed
    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// A unit the engine itself emits could not be built
    #[error("unit error: {0}")]
    Unit(#[from] UnitError),
}

impl EngineError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create archive error for path
    pub fn archive(path: impl Into<PathBuf>, source: ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// Create config error for path
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
