use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

mod layout;
mod lock;
mod profile;
mod snapshot;

pub use layout::RegistryLayout;
pub use profile::Profile;

use crate::lock::{claim_profile_lock, release_profile_lock};
use crate::snapshot::{list_snapshot_timestamps, next_timestamp, read_snapshot, write_snapshot};

/// Owner of profile state: locking, validation and snapshot persistence.
pub trait ProfileRegistry {
    fn add_profile(&self, id: &str) -> Result<Profile>;

    /// Latest snapshot of the profile, if it exists.
    fn get_profile(&self, id: &str) -> Result<Option<Profile>>;

    fn list_snapshots(&self, id: &str) -> Result<Vec<u64>>;

    fn lock_profile(&self, id: &str) -> Result<()>;

    fn unlock_profile(&self, id: &str) -> Result<()>;

    /// Rejects profiles this registry does not own or that are no longer the
    /// latest snapshot.
    fn validate(&self, profile: &Profile) -> Result<()>;

    /// Persists `profile` as a new snapshot with a fresh, strictly increasing
    /// timestamp written back into `profile`. Fails when `profile` is not
    /// based on the latest snapshot.
    fn update_profile(&self, profile: &mut Profile) -> Result<()>;

    fn profile_data_dir(&self, id: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct FileProfileRegistry {
    layout: RegistryLayout,
}

impl FileProfileRegistry {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = RegistryLayout::new(root);
        layout.ensure_base_dirs()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &RegistryLayout {
        &self.layout
    }

    pub fn load_snapshot(&self, id: &str, timestamp: u64) -> Result<Profile> {
        read_snapshot(&self.layout.snapshot_path(id, timestamp))
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.layout.lock_path(id).exists()
    }
}

impl ProfileRegistry for FileProfileRegistry {
    fn add_profile(&self, id: &str) -> Result<Profile> {
        validate_profile_id(id)?;
        if !list_snapshot_timestamps(&self.layout, id)?.is_empty() {
            return Err(anyhow!("profile '{id}' already exists"));
        }
        self.layout.ensure_profile_dirs(id)?;

        let mut profile = Profile::new(id);
        profile.set_timestamp(next_timestamp(0)?);
        let path = write_snapshot(&self.layout, &profile)?;
        info!(profile = id, path = %path.display(), "created profile");
        Ok(profile)
    }

    fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let Some(latest) = list_snapshot_timestamps(&self.layout, id)?.last().copied() else {
            return Ok(None);
        };
        self.load_snapshot(id, latest).map(Some)
    }

    fn list_snapshots(&self, id: &str) -> Result<Vec<u64>> {
        list_snapshot_timestamps(&self.layout, id)
    }

    fn lock_profile(&self, id: &str) -> Result<()> {
        claim_profile_lock(&self.layout, id)?;
        debug!(profile = id, "locked profile");
        Ok(())
    }

    fn unlock_profile(&self, id: &str) -> Result<()> {
        release_profile_lock(&self.layout, id)?;
        debug!(profile = id, "unlocked profile");
        Ok(())
    }

    fn validate(&self, profile: &Profile) -> Result<()> {
        let latest = list_snapshot_timestamps(&self.layout, profile.id())?
            .last()
            .copied()
            .ok_or_else(|| anyhow!("profile '{}' is not known to this registry", profile.id()))?;
        if latest != profile.timestamp() {
            return Err(anyhow!(
                "profile '{}' is stale (timestamp={} latest={})",
                profile.id(),
                profile.timestamp(),
                latest
            ));
        }
        Ok(())
    }

    fn update_profile(&self, profile: &mut Profile) -> Result<()> {
        let latest = list_snapshot_timestamps(&self.layout, profile.id())?
            .last()
            .copied()
            .ok_or_else(|| anyhow!("profile '{}' is not known to this registry", profile.id()))?;

        let previous = profile.timestamp();
        if latest != previous {
            return Err(anyhow!(
                "profile '{}' is stale (timestamp={} latest={}); refusing to overwrite newer history",
                profile.id(),
                previous,
                latest
            ));
        }
        profile.set_timestamp(next_timestamp(latest)?);
        match write_snapshot(&self.layout, profile) {
            Ok(path) => {
                info!(
                    profile = profile.id(),
                    timestamp = profile.timestamp(),
                    path = %path.display(),
                    "persisted profile snapshot"
                );
                Ok(())
            }
            Err(err) => {
                profile.set_timestamp(previous);
                Err(err)
            }
        }
    }

    fn profile_data_dir(&self, id: &str) -> Result<PathBuf> {
        let dir = self.layout.data_dir(id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create profile data dir: {}", dir.display()))?;
        Ok(dir)
    }
}

fn validate_profile_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(anyhow!("profile id must not be empty"));
    }
    if id.starts_with('.')
        || id
            .chars()
            .any(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
    {
        return Err(anyhow!("profile id contains invalid character(s): {id}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
