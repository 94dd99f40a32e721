//! Persistence of the status document connecting the two phases. Saves are
//! atomic: the document is written to a temp file in the target directory and
//! renamed into place, so a crash mid-write never leaves a half-written file.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::SnapshotError;
use crate::model::Snapshot;

pub struct SnapshotStore;

impl SnapshotStore {
    pub fn load(path: &Path) -> Result<Snapshot, SnapshotError> {
        let bytes = std::fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(snapshot: &Snapshot, path: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|source| SnapshotError::Encode { source })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let io_err = |source: std::io::Error| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        info!(path = %path.display(), "snapshot written");
        Ok(())
    }
}
