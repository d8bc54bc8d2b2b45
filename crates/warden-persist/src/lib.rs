//! JSON file-backed persistence for Warden daemon state.
//!
//! [`JsonStore`] keeps one named snapshot file inside a state directory.
//! Writes go to a sibling temporary file that is flushed to disk and then
//! renamed over the previous snapshot, so a crash mid-write leaves either the
//! old snapshot or the new one, never a torn file.
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::path::Path;
//! use warden_persist::JsonStore;
//!
//! let store = JsonStore::new(Path::new("/var/lib/warden"), "engine");
//! let mut counters: HashMap<String, u64> = store.load();
//! counters.insert("cycles".to_string(), 1);
//! store.save(&counters)?;
//! # Ok::<(), warden_persist::PersistError>(())
//! ```

#![forbid(unsafe_code)]

pub mod error;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use error::{PersistError, Result};

/// A single JSON snapshot file with atomic replace semantics.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
    name: String,
}

impl JsonStore {
    /// Creates a store for `<dir>/<name>.json`.
    ///
    /// Nothing touches the filesystem until the first load or save.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
        }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", self.name))
    }

    fn corrupt_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.corrupt", self.name))
    }

    /// Returns true if a snapshot file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Loads the snapshot, falling back to `T::default()` on any failure.
    ///
    /// A missing file is the normal cold-start case. An unreadable or
    /// undecodable file is logged as a warning.
    pub fn load<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                warn!(store = %self.name, error = %e, "failed to load snapshot, starting empty");
                T::default()
            }
        }
    }

    /// Loads the snapshot, distinguishing "missing" from "unusable".
    ///
    /// Returns `Ok(None)` when no snapshot has been written yet.
    pub fn try_load<T>(&self) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let path = self.path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(store = %self.name, "no snapshot on disk");
                return Ok(None);
            }
            Err(e) => return Err(PersistError::io(path, e)),
        };

        let value =
            serde_json::from_slice(&bytes).map_err(|e| PersistError::serialization(&path, e))?;
        debug!(store = %self.name, bytes = bytes.len(), "loaded snapshot");
        Ok(Some(value))
    }

    /// Atomically replaces the snapshot with `value`.
    pub fn save<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, e))?;

        let path = self.path();
        let temp = self.temp_path();
        let json =
            serde_json::to_vec_pretty(value).map_err(|e| PersistError::serialization(&path, e))?;

        {
            let mut file = File::create(&temp).map_err(|e| PersistError::io(&temp, e))?;
            file.write_all(&json)
                .map_err(|e| PersistError::io(&temp, e))?;
            file.sync_all().map_err(|e| PersistError::io(&temp, e))?;
        }

        fs::rename(&temp, &path).map_err(|e| PersistError::io(&path, e))?;
        self.sync_dir();

        debug!(store = %self.name, bytes = json.len(), "saved snapshot");
        Ok(())
    }

    /// Moves an unusable snapshot aside as `<name>.json.corrupt`.
    ///
    /// Returns the new path, or `None` if there was nothing to move.
    pub fn quarantine(&self) -> Result<Option<PathBuf>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let target = self.corrupt_path();
        fs::rename(&path, &target).map_err(|e| PersistError::io(&path, e))?;
        warn!(store = %self.name, moved_to = %target.display(), "quarantined corrupt snapshot");
        Ok(Some(target))
    }

    /// Deletes the snapshot if present.
    pub fn remove(&self) -> Result<()> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::io(path, e)),
        }
    }

    // Persist the rename itself. Not every platform allows opening a
    // directory, so failures here are only logged.
    #[cfg(unix)]
    fn sync_dir(&self) {
        if let Err(e) = File::open(&self.dir).and_then(|d| d.sync_all()) {
            debug!(store = %self.name, error = %e, "directory sync failed");
        }
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) {}
}
