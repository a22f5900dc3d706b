use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLayout {
    root: PathBuf,
}

impl RegistryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn profile_dir(&self, id: &str) -> PathBuf {
        self.profiles_dir().join(id)
    }

    pub fn snapshots_dir(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("snapshots")
    }

    pub fn snapshot_path(&self, id: &str, timestamp: u64) -> PathBuf {
        self.snapshots_dir(id).join(format!("{timestamp}.json"))
    }

    pub fn lock_path(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("profile.lock")
    }

    pub fn data_dir(&self, id: &str) -> PathBuf {
        self.profile_dir(id).join("data")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.profiles_dir(), self.tmp_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn ensure_profile_dirs(&self, id: &str) -> Result<()> {
        for dir in [self.snapshots_dir(id), self.data_dir(id)] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}
