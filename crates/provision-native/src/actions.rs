use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use provision_core::{Memento, Status};
use provision_engine::{ActionParameters, Parameters, ProvisioningAction};
use provision_registry::Profile;
use tracing::debug;

use crate::fs_utils::{
    backup_dir, copy_dir_recursive, move_path, move_to_backup, path_exists,
    remove_path_if_exists, validated_relative_path,
};
use crate::INSTALL_ROOT;

const MEMENTO_CREATED: &str = "created";
const MEMENTO_BACKUP: &str = "backup";
const MEMENTO_REMOVED: &str = "removed";
const MEMENTO_PREVIOUS_MODE: &str = "previous_mode";

/// Absolute paths are taken as-is; relative ones are joined onto the
/// install root published for the phase.
pub(crate) fn resolve_path(params: &ActionParameters<'_>, key: &str) -> Result<PathBuf> {
    let raw = params.require(key)?;
    if Path::new(raw).is_absolute() {
        return Ok(PathBuf::from(raw));
    }
    let relative = validated_relative_path(raw)?;
    let root = params
        .get(INSTALL_ROOT)
        .ok_or_else(|| anyhow!("relative path '{raw}' requires the '{INSTALL_ROOT}' property"))?;
    Ok(Path::new(root).join(relative))
}

fn check_path_arg(args: &Parameters, key: &str) -> Result<()> {
    let raw = args
        .get(key)
        .ok_or_else(|| anyhow!("missing required parameter '{key}'"))?;
    if !Path::new(raw).is_absolute() {
        validated_relative_path(raw)?;
    }
    Ok(())
}

/// Puts a path the action displaced back where it was.
fn restore_backup(memento: &Memento, original: &Path) -> Result<()> {
    if let Some(backup) = memento.get_text(MEMENTO_BACKUP) {
        let backup = Path::new(backup);
        if path_exists(backup) {
            move_path(backup, original).with_context(|| {
                format!("failed to restore {} from backup", original.display())
            })?;
        }
    }
    Ok(())
}

fn undo_created_path(memento: &Memento, path: &Path) -> Result<()> {
    if memento.get_bool(MEMENTO_CREATED) == Some(true) {
        remove_path_if_exists(path)?;
    }
    restore_backup(memento, path)
}

/// `mkdir(path)`: creates the directory and any missing parents.
#[derive(Debug, Default)]
pub struct MkdirAction {
    memento: Memento,
}

impl ProvisioningAction for MkdirAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        if path.is_dir() {
            return Ok(Status::ok());
        }
        if path_exists(&path) {
            return Err(anyhow!(
                "{} exists and is not a directory",
                path.display()
            ));
        }

        let mut missing = Vec::new();
        let mut cursor = Some(path.as_path());
        while let Some(dir) = cursor {
            if path_exists(dir) {
                break;
            }
            missing.push(dir.to_path_buf());
            cursor = dir.parent();
        }

        let mut created: Vec<String> = Vec::new();
        for dir in missing.iter().rev() {
            fs::create_dir(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
            created.push(dir.display().to_string());
            self.memento.put(MEMENTO_CREATED, created.clone());
        }
        debug!(path = %path.display(), created = created.len(), "created directory");
        Ok(Status::ok())
    }

    fn undo(&mut self, _params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let created = self
            .memento
            .get_text_list(MEMENTO_CREATED)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        for dir in created.iter().rev() {
            match fs::remove_dir(dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to remove directory {dir}"));
                }
            }
        }
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "path")
    }
}

/// `rmdir(path)`: removes an empty directory.
#[derive(Debug, Default)]
pub struct RmdirAction {
    memento: Memento,
}

impl ProvisioningAction for RmdirAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        if !path_exists(&path) {
            return Ok(Status::info(
                "native.rmdir",
                format!("{} is already absent", path.display()),
            ));
        }
        fs::remove_dir(&path)
            .with_context(|| format!("failed to remove directory {}", path.display()))?;
        self.memento.put(MEMENTO_REMOVED, true);
        debug!(path = %path.display(), "removed directory");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        if self.memento.get_bool(MEMENTO_REMOVED) == Some(true) {
            let path = resolve_path(params, "path")?;
            match fs::create_dir(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to recreate directory {}", path.display())
                    });
                }
            }
        }
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "path")
    }
}

/// `copy(source, target)`: copies a file or directory tree. An existing
/// target is moved aside first.
#[derive(Debug, Default)]
pub struct CopyAction {
    memento: Memento,
}

impl ProvisioningAction for CopyAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let source = resolve_path(params, "source")?;
        let target = resolve_path(params, "target")?;
        if !path_exists(&source) {
            return Err(anyhow!("copy source does not exist: {}", source.display()));
        }
        if path_exists(&target) {
            let backup = move_to_backup(&target, &backup_dir(params.data_dir()))?;
            self.memento
                .put(MEMENTO_BACKUP, backup.display().to_string());
        }

        self.memento.put(MEMENTO_CREATED, true);
        if source.is_dir() {
            copy_dir_recursive(&source, &target)?;
        } else {
            fs::copy(&source, &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    source.display(),
                    target.display()
                )
            })?;
        }
        debug!(source = %source.display(), target = %target.display(), "copied");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let target = resolve_path(params, "target")?;
        undo_created_path(&self.memento, &target)?;
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "source")?;
        check_path_arg(args, "target")
    }
}

/// `remove(path)`: moves the path into the profile's backup area so undo can
/// bring it back; the backup is dropped when the transaction commits.
#[derive(Debug, Default)]
pub struct RemoveAction {
    memento: Memento,
}

impl ProvisioningAction for RemoveAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        if !path_exists(&path) {
            return Ok(Status::info(
                "native.remove",
                format!("{} is already absent", path.display()),
            ));
        }
        let backup = move_to_backup(&path, &backup_dir(params.data_dir()))?;
        self.memento
            .put(MEMENTO_BACKUP, backup.display().to_string());
        debug!(path = %path.display(), backup = %backup.display(), "removed");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        restore_backup(&self.memento, &path)?;
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "path")
    }
}

/// `link(target, link)`: creates a symbolic link at `link` pointing to
/// `target`.
#[derive(Debug, Default)]
pub struct LinkAction {
    memento: Memento,
}

impl ProvisioningAction for LinkAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let target = resolve_path(params, "target")?;
        let link = resolve_path(params, "link")?;
        if path_exists(&link) {
            let backup = move_to_backup(&link, &backup_dir(params.data_dir()))?;
            self.memento
                .put(MEMENTO_BACKUP, backup.display().to_string());
        }
        create_symlink(&target, &link)?;
        self.memento.put(MEMENTO_CREATED, true);
        debug!(link = %link.display(), target = %target.display(), "linked");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let link = resolve_path(params, "link")?;
        undo_created_path(&self.memento, &link)?;
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "target")?;
        check_path_arg(args, "link")
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).with_context(|| {
        format!(
            "failed to create symlink {} -> {}",
            link.display(),
            target.display()
        )
    })
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, link: &Path) -> Result<()> {
    Err(anyhow!(
        "symbolic links are not supported on this platform: {}",
        link.display()
    ))
}

/// `chmod(path, mode)`: sets octal permission bits, remembering the old ones.
#[derive(Debug, Default)]
pub struct ChmodAction {
    memento: Memento,
}

pub(crate) fn parse_mode(raw: &str) -> Result<u32> {
    let digits = raw.trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("invalid octal mode '{raw}'"))?;
    if mode > 0o7777 {
        return Err(anyhow!("mode '{raw}' is out of range"));
    }
    Ok(mode)
}

impl ProvisioningAction for ChmodAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        let mode = parse_mode(params.require("mode")?)?;
        let previous = read_mode(&path)?;
        self.memento.put(MEMENTO_PREVIOUS_MODE, i64::from(previous));
        write_mode(&path, mode)?;
        debug!(path = %path.display(), mode = %format!("{mode:o}"), "changed mode");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        if let Some(previous) = self.memento.get_int(MEMENTO_PREVIOUS_MODE) {
            let path = resolve_path(params, "path")?;
            let previous = u32::try_from(previous)
                .with_context(|| format!("invalid remembered mode {previous}"))?;
            write_mode(&path, previous)?;
        }
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "path")?;
        let mode = args
            .get("mode")
            .ok_or_else(|| anyhow!("missing required parameter 'mode'"))?;
        parse_mode(mode).map(|_| ())
    }
}

#[cfg(unix)]
fn read_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    let metadata =
        fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    Ok(metadata.permissions().mode() & 0o7777)
}

#[cfg(unix)]
fn write_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set mode on {}", path.display()))
}

#[cfg(not(unix))]
fn read_mode(path: &Path) -> Result<u32> {
    Err(anyhow!(
        "permission modes are not supported on this platform: {}",
        path.display()
    ))
}

#[cfg(not(unix))]
fn write_mode(path: &Path, _mode: u32) -> Result<()> {
    Err(anyhow!(
        "permission modes are not supported on this platform: {}",
        path.display()
    ))
}

/// `write(path, content)`: replaces the file's content. A previous file is
/// kept as a backup until commit.
#[derive(Debug, Default)]
pub struct WriteAction {
    memento: Memento,
}

impl ProvisioningAction for WriteAction {
    fn execute(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        let content = params.require("content")?;
        if path_exists(&path) {
            let backup = move_to_backup(&path, &backup_dir(params.data_dir()))?;
            self.memento
                .put(MEMENTO_BACKUP, backup.display().to_string());
        }
        self.memento.put(MEMENTO_CREATED, true);
        fs::write(&path, content.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = content.len(), "wrote file");
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        let path = resolve_path(params, "path")?;
        undo_created_path(&self.memento, &path)?;
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }

    fn validate(&self, args: &Parameters) -> Result<()> {
        check_path_arg(args, "path")?;
        if !args.contains_key("content") {
            return Err(anyhow!("missing required parameter 'content'"));
        }
        Ok(())
    }
}
