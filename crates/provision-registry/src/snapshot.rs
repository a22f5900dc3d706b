use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Profile, RegistryLayout};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    sha256: String,
    profile: Profile,
}

pub(crate) fn profile_digest(profile: &Profile) -> Result<String> {
    let canonical = serde_json::to_vec(profile)
        .with_context(|| format!("failed serializing profile '{}'", profile.id()))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

pub(crate) fn write_snapshot(layout: &RegistryLayout, profile: &Profile) -> Result<PathBuf> {
    let path = layout.snapshot_path(profile.id(), profile.timestamp());
    if path.exists() {
        return Err(anyhow!(
            "snapshot {} for profile '{}' already exists",
            profile.timestamp(),
            profile.id()
        ));
    }

    let snapshot = SnapshotFile {
        version: SNAPSHOT_FORMAT_VERSION,
        sha256: profile_digest(profile)?,
        profile: profile.clone(),
    };
    let content = serde_json::to_string_pretty(&snapshot).with_context(|| {
        format!(
            "failed serializing snapshot for profile '{}'",
            profile.id()
        )
    })?;

    let tmp_path = layout.tmp_dir().join(format!(
        "{}-{}.json.tmp",
        profile.id(),
        profile.timestamp()
    ));
    fs::write(&tmp_path, content)
        .with_context(|| format!("failed writing snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| {
        format!(
            "failed moving snapshot {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(path)
}

pub(crate) fn read_snapshot(path: &Path) -> Result<Profile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed reading snapshot {}", path.display()))?;
    let snapshot: SnapshotFile = serde_json::from_str(&content)
        .with_context(|| format!("failed parsing snapshot {}", path.display()))?;
    if snapshot.version != SNAPSHOT_FORMAT_VERSION {
        return Err(anyhow!(
            "unsupported snapshot format version {} in {}",
            snapshot.version,
            path.display()
        ));
    }

    let digest = profile_digest(&snapshot.profile)?;
    if digest != snapshot.sha256 {
        return Err(anyhow!(
            "snapshot digest mismatch in {} (expected={} actual={})",
            path.display(),
            snapshot.sha256,
            digest
        ));
    }
    Ok(snapshot.profile)
}

pub(crate) fn list_snapshot_timestamps(layout: &RegistryLayout, id: &str) -> Result<Vec<u64>> {
    let dir = layout.snapshots_dir(id);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read snapshot dir: {}", dir.display()));
        }
    };

    let mut timestamps = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|v| v.to_str()) != Some("json") {
            continue;
        }
        let Some(timestamp) = path
            .file_stem()
            .and_then(|v| v.to_str())
            .and_then(|v| v.parse::<u64>().ok())
        else {
            continue;
        };
        timestamps.push(timestamp);
    }
    timestamps.sort_unstable();
    Ok(timestamps)
}

/// Strictly greater than `previous`, so history is never overwritten even when
/// the clock is coarse or goes backwards.
pub(crate) fn next_timestamp(previous: u64) -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_millis();
    let now = u64::try_from(now).context("system time does not fit in u64 millis")?;
    Ok(now.max(previous.saturating_add(1)))
}
