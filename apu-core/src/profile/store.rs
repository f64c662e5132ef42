//! Profile persistence
//!
//! The manager only talks to [`ProfileStore`]. [`JsonDirStore`] keeps one
//! pretty-printed JSON file per profile; [`MemoryStore`] keeps nothing on disk.

use crate::constants::profile::FILE_EXTENSION;
use crate::profile::validation::is_valid_name;
use apu_error::{ApuError, Result};
use apu_protocol::Profile;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait ProfileStore: Send + Sync {
    /// Every readable profile. Unreadable entries are skipped, not fatal.
    fn load_all(&self) -> Result<Vec<Profile>>;

    fn save(&self, profile: &Profile) -> Result<()>;

    /// Deleting an absent profile succeeds
    fn delete(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: Mutex<BTreeMap<String, Profile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        let store = Self::new();
        store
            .profiles
            .lock()
            .extend(profiles.into_iter().map(|p| (p.name.clone(), p)));
        store
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.lock().keys().cloned().collect()
    }
}

impl ProfileStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<Profile>> {
        Ok(self.profiles.lock().values().cloned().collect())
    }

    fn save(&self, profile: &Profile) -> Result<()> {
        self.profiles.lock().insert(profile.name.clone(), profile.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.profiles.lock().remove(name);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        // Names double as file names
        if !is_valid_name(name) {
            return Err(ApuError::Validation(vec![format!("invalid profile name {:?}", name)]));
        }
        Ok(self.dir.join(format!("{}.{}", name, FILE_EXTENSION)))
    }
}

impl ProfileStore for JsonDirStore {
    fn load_all(&self) -> Result<Vec<Profile>> {
        if !self.dir.exists() {
            debug!("Profiles directory {} does not exist yet", self.dir.display());
            return Ok(Vec::new());
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str::<Profile>(&content).map_err(|e| e.to_string()));
            match parsed {
                Ok(profile) => profiles.push(profile),
                Err(e) => warn!("Skipping unreadable profile {}: {}", path.display(), e),
            }
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    /// Atomic write: temp file, fsync, rename
    fn save(&self, profile: &Profile) -> Result<()> {
        let path = self.path_for(&profile.name)?;
        fs::create_dir_all(&self.dir).map_err(|source| ApuError::FileWrite {
            path: self.dir.clone(),
            source,
        })?;

        let json = serde_json::to_string_pretty(profile)?;
        let temp_path = path.with_extension("json.tmp");
        let write = |temp: &Path| -> std::io::Result<()> {
            let mut file = fs::File::create(temp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(temp, &path)
        };
        if let Err(source) = write(&temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(ApuError::FileWrite { path, source });
        }

        debug!("Saved profile {} to {}", profile.name, path.display());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ApuError::FileWrite { path, source }),
        }
    }
}
