//! Output and cache directory handling.
//!
//! Both directories must exist before the listener is bound. When creation is
//! disabled a missing directory aborts startup instead of surfacing later as
//! failed requests.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::backend::JobKind;
use crate::config::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{role} directory {} does not exist", .path.display())]
    Missing { role: &'static str, path: PathBuf },

    #[error("{role} path {} is not a directory", .path.display())]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("failed to create {role} directory {}: {source}", .path.display())]
    Create {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to inspect {role} directory {}: {source}", .path.display())]
    Inspect {
        role: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Create (if allowed) and verify the output and cache directories.
pub fn prepare_directories(storage: &StorageConfig) -> Result<(), StorageError> {
    for (role, path) in [
        ("output", &storage.output_dir),
        ("cache", &storage.cache_dir),
    ] {
        if storage.create_dirs {
            std::fs::create_dir_all(path).map_err(|source| StorageError::Create {
                role,
                path: path.clone(),
                source,
            })?;
        }
        ensure_directory(role, path)?;
        tracing::debug!(role, path = %path.display(), "Directory ready");
    }
    Ok(())
}

fn ensure_directory(role: &'static str, path: &Path) -> Result<(), StorageError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(StorageError::NotADirectory {
            role,
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::Missing {
            role,
            path: path.to_path_buf(),
        }),
        Err(source) => Err(StorageError::Inspect {
            role,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// File name for a new generation: `<kind>_<YYYYmmdd_HHMMSS>_<8 hex>.wav`.
///
/// The random suffix keeps two requests in the same second apart.
pub fn output_filename(kind: JobKind, now: DateTime<Local>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.wav",
        kind.file_prefix(),
        now.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}
