use std::fs;
use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};

use crate::RegistryLayout;

pub(crate) fn claim_profile_lock(layout: &RegistryLayout, id: &str) -> Result<()> {
    let path = layout.lock_path(id);
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = read_lock_holder(layout, id)
                .map(|pid| format!(" (pid={pid})"))
                .unwrap_or_default();
            return Err(anyhow!("profile '{id}' is already locked{holder}"));
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to claim profile lock: {}", path.display()));
        }
    };

    file.write_all(format!("{}\n", std::process::id()).as_bytes())
        .with_context(|| format!("failed to write profile lock: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush profile lock: {}", path.display()))?;
    Ok(())
}

pub(crate) fn release_profile_lock(layout: &RegistryLayout, id: &str) -> Result<()> {
    let path = layout.lock_path(id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(anyhow!("profile '{id}' is not locked"))
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to release profile lock: {}", path.display()))
        }
    }
}

pub(crate) fn read_lock_holder(layout: &RegistryLayout, id: &str) -> Option<String> {
    let raw = fs::read_to_string(layout.lock_path(id)).ok()?;
    let holder = raw.trim();
    (!holder.is_empty()).then(|| holder.to_string())
}
