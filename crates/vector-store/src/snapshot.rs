use crate::error::{Result, VectorStoreError};
use crate::types::ChunkRecord;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE_NAME: &str = "documents.json";

/// JSON array of [`ChunkRecord`]s on disk, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILE_NAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no snapshot exists yet.
    pub fn read(&self) -> Result<Option<Vec<ChunkRecord>>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.corrupt(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| self.corrupt(err))
    }

    /// Reads the snapshot, treating an unreadable file as empty.
    ///
    /// The failure is logged at error level: the next write replaces the file,
    /// so whatever it held is lost.
    #[must_use]
    pub fn load_or_empty(&self) -> Vec<ChunkRecord> {
        match self.read() {
            Ok(Some(records)) => records,
            Ok(None) => {
                log::info!("No snapshot at {:?}, starting empty", self.path);
                Vec::new()
            }
            Err(err) => {
                log::error!("{err}; starting with an empty store");
                Vec::new()
            }
        }
    }

    /// Writes all `records` to a temporary sibling, then renames it over the snapshot.
    pub fn write(&self, records: &[ChunkRecord]) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let result = self.write_via(&tmp, records);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result.map_err(|source| VectorStoreError::PersistenceWrite {
            path: self.path.clone(),
            source,
        })?;
        log::debug!("Wrote {} records to {:?}", records.len(), self.path);
        Ok(())
    }

    fn write_via(&self, tmp: &Path, records: &[ChunkRecord]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(tmp)?);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.write_all(b"\n")?;
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        drop(file);

        fs::rename(tmp, &self.path)?;
        sync_parent_dir(&self.path);
        Ok(())
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> VectorStoreError {
        VectorStoreError::CorruptPersistence {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}
