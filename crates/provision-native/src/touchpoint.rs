use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use provision_core::Status;
use provision_engine::{Parameters, Touchpoint, PARM_DATA_DIR};
use provision_registry::Profile;
use tracing::{debug, warn};

use crate::fs_utils::{backup_dir, path_exists, remove_path_if_exists};
use crate::{INSTALL_ROOT, NATIVE_TOUCHPOINT};

/// Touchpoint for plain filesystem work under an install root.
///
/// Tracks the backup areas its actions may write into so `commit` can drop
/// them once the transaction is final. The install root is never created
/// here; `mkdir` creates it with the rest of a missing chain, so undo
/// removes it again.
#[derive(Debug, Default)]
pub struct NativeTouchpoint {
    backup_roots: RefCell<BTreeSet<PathBuf>>,
}

impl NativeTouchpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Touchpoint for NativeTouchpoint {
    fn touchpoint_type(&self) -> &str {
        NATIVE_TOUCHPOINT
    }

    fn initialize_phase(
        &self,
        profile: &Profile,
        phase_id: &str,
        params: &mut Parameters,
    ) -> Result<Status> {
        if let Some(data_dir) = params.get(PARM_DATA_DIR) {
            self.backup_roots
                .borrow_mut()
                .insert(backup_dir(Path::new(data_dir)));
        }

        let root = match params.get(INSTALL_ROOT) {
            Some(root) => Some(root.to_string()),
            None => profile.property(INSTALL_ROOT).map(str::to_string),
        };
        let Some(root) = root else {
            return Ok(Status::ok());
        };
        let root = PathBuf::from(root);
        if !root.is_absolute() {
            return Err(anyhow!(
                "{INSTALL_ROOT} must be an absolute path: {}",
                root.display()
            ));
        }
        if path_exists(&root) && !root.is_dir() {
            return Err(anyhow!(
                "{INSTALL_ROOT} is not a directory: {}",
                root.display()
            ));
        }
        debug!(phase = phase_id, install_root = %root.display(), "published install root");
        params.insert(INSTALL_ROOT.to_string(), root.display().to_string());
        Ok(Status::ok())
    }

    fn commit(&self, _profile: &Profile) -> Result<Status> {
        let mut status = Status::ok();
        for root in self.backup_roots.take() {
            if let Err(err) = remove_path_if_exists(&root) {
                status.merge(Status::warning(
                    NATIVE_TOUCHPOINT,
                    format!("failed to clean up backups in {}: {err:#}", root.display()),
                ));
            }
        }
        Ok(status)
    }

    fn rollback(&self, _profile: &Profile) -> Result<Status> {
        let mut status = Status::ok();
        for root in self.backup_roots.take() {
            if path_exists(&root) {
                warn!(backups = %root.display(), "keeping native backups after abandoned transaction");
                status.merge(Status::warning(
                    NATIVE_TOUCHPOINT,
                    format!("backups kept in {}", root.display()),
                ));
            }
        }
        Ok(status)
    }
}
