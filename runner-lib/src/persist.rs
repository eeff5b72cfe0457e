//! Save file persistence: snapshot state and battery RAM.
//!
//! Save files live next to each other in the user data directory, named
//! after the content file. Missing or empty files at startup are a normal
//! first run; unreadable or unwritable files are fatal. Whole files are
//! read and written in single calls, so a save is either fully applied or
//! not at all.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use palmboy_core::{Engine, Platform};
use tracing::{info, warn};

use crate::error::FrontendError;

/// Application directory name under the user data directory.
const APP_DIR: &str = "palmboy";

/// Snapshot state file extension.
const STATE_EXT: &str = "sav";

/// Battery RAM file extension.
const BATTERY_EXT: &str = "srm";

/// Resolved save file locations for one content file.
pub struct PersistenceManager {
    state_path: PathBuf,
    battery_path: PathBuf,
}

impl PersistenceManager {
    /// Resolve save paths for `content` under the user data directory,
    /// creating the application directory if needed.
    ///
    /// # Errors
    ///
    /// [`FrontendError::NoUserDir`] when no data or home directory exists;
    /// [`FrontendError::PersistenceWrite`] when the directory cannot be
    /// created.
    pub fn for_content(content: &Path) -> Result<Self, FrontendError> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(FrontendError::NoUserDir)?;
        let dir = base.join(APP_DIR);
        fs::create_dir_all(&dir).map_err(|source| FrontendError::PersistenceWrite {
            path: dir.clone(),
            source,
        })?;
        Ok(Self::in_dir(&dir, content))
    }

    /// Resolve save paths inside an explicit directory.
    #[must_use]
    pub fn in_dir(dir: &Path, content: &Path) -> Self {
        let stem = content
            .file_stem()
            .map_or_else(|| "content".into(), ToOwned::to_owned);
        let mut state_path = dir.join(&stem);
        state_path.set_extension(STATE_EXT);
        let mut battery_path = dir.join(&stem);
        battery_path.set_extension(BATTERY_EXT);
        Self {
            state_path,
            battery_path,
        }
    }

    /// The snapshot file location.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// The battery RAM file location.
    #[must_use]
    pub fn battery_path(&self) -> &Path {
        &self.battery_path
    }

    /// Restore engine state from the snapshot file. Returns `false` when no
    /// snapshot exists yet.
    ///
    /// # Errors
    ///
    /// [`FrontendError::SnapshotRejected`] when the engine refuses the blob,
    /// [`FrontendError::PersistenceRead`] on any other read failure.
    pub fn load_state(&self, engine: &mut dyn Engine) -> Result<bool, FrontendError> {
        let Some(data) = read_optional(&self.state_path)? else {
            warn!(path = %self.state_path.display(), "no saved state, starting fresh");
            return Ok(false);
        };
        if !engine.load_snapshot(&data) {
            return Err(FrontendError::SnapshotRejected {
                path: self.state_path.clone(),
            });
        }
        info!(path = %self.state_path.display(), bytes = data.len(), "state restored");
        Ok(true)
    }

    /// Restore battery RAM from the save file. Returns `false` when no save
    /// exists yet. On the Game Boy platform the restore is flagged for
    /// writeback so the region is persisted again at exit regardless of
    /// whether the content writes to it this session.
    ///
    /// # Errors
    ///
    /// [`FrontendError::PersistenceRead`] on a read failure.
    pub fn load_battery(&self, engine: &mut dyn Engine) -> Result<bool, FrontendError> {
        let Some(data) = read_optional(&self.battery_path)? else {
            warn!(path = %self.battery_path.display(), "no battery save, starting fresh");
            return Ok(false);
        };
        let writeback = engine.platform() == Platform::GameBoy;
        engine.restore_battery_ram(&data, writeback);
        info!(
            path = %self.battery_path.display(),
            bytes = data.len(),
            writeback,
            "battery RAM restored"
        );
        Ok(true)
    }

    /// Write the engine's current snapshot to the state file.
    ///
    /// # Errors
    ///
    /// [`FrontendError::PersistenceWrite`] on a write failure.
    pub fn save_state(&self, engine: &dyn Engine) -> Result<(), FrontendError> {
        let blob = engine.save_snapshot();
        fs::write(&self.state_path, &blob).map_err(|source| FrontendError::PersistenceWrite {
            path: self.state_path.clone(),
            source,
        })?;
        info!(path = %self.state_path.display(), bytes = blob.len(), "state saved");
        Ok(())
    }

    /// Write the engine's battery RAM to the save file. A content file with
    /// no battery region is skipped silently.
    ///
    /// # Errors
    ///
    /// [`FrontendError::PersistenceWrite`] on a write failure.
    pub fn save_battery(&self, engine: &dyn Engine) -> Result<(), FrontendError> {
        let region = engine.battery_ram();
        if region.is_empty() {
            return Ok(());
        }
        fs::write(&self.battery_path, region).map_err(|source| {
            FrontendError::PersistenceWrite {
                path: self.battery_path.clone(),
                source,
            }
        })?;
        info!(
            path = %self.battery_path.display(),
            bytes = region.len(),
            "battery RAM saved"
        );
        Ok(())
    }
}

/// Read a whole file, treating a missing or empty file as absent.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, FrontendError> {
    match fs::read(path) {
        Ok(data) if data.is_empty() => Ok(None),
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(FrontendError::PersistenceRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
