use anyhow::{Context, Result};
use provision_core::{Memento, Status};
use provision_registry::Profile;
use semver::Version;

use crate::action::ProvisioningAction;
use crate::context::ActionParameters;

pub const ADD_UNIT_ACTION: &str = "profile.add_unit";
pub const REMOVE_UNIT_ACTION: &str = "profile.remove_unit";

const MEMENTO_APPLIED: &str = "applied";
const MEMENTO_PREVIOUS_VERSION: &str = "previous_version";

/// Registers the phase's unit in the profile.
#[derive(Debug, Default)]
pub struct AddUnitAction {
    memento: Memento,
}

impl ProvisioningAction for AddUnitAction {
    fn execute(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status> {
        let unit = params.require_unit()?;
        if let Some(previous) = profile.add_unit(unit.id.clone(), unit.version.clone()) {
            self.memento
                .put(MEMENTO_PREVIOUS_VERSION, previous.to_string());
        }
        self.memento.put(MEMENTO_APPLIED, true);
        Ok(Status::ok())
    }

    fn undo(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status> {
        if self.memento.get_bool(MEMENTO_APPLIED) != Some(true) {
            return Ok(Status::ok());
        }
        let unit = params.require_unit()?;
        match self.memento.get_text(MEMENTO_PREVIOUS_VERSION) {
            Some(previous) => {
                let version = Version::parse(previous)
                    .with_context(|| format!("invalid remembered version '{previous}'"))?;
                profile.add_unit(unit.id.clone(), version);
            }
            None => {
                profile.remove_unit(&unit.id);
            }
        }
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }
}

/// Drops the phase's unit from the profile.
#[derive(Debug, Default)]
pub struct RemoveUnitAction {
    memento: Memento,
}

impl ProvisioningAction for RemoveUnitAction {
    fn execute(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status> {
        let unit = params.require_unit()?;
        match profile.remove_unit(&unit.id) {
            Some(removed) => {
                self.memento
                    .put(MEMENTO_PREVIOUS_VERSION, removed.to_string());
                Ok(Status::ok())
            }
            None => Ok(Status::info(
                REMOVE_UNIT_ACTION,
                format!("{unit} was not recorded in profile '{}'", profile.id()),
            )),
        }
    }

    fn undo(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status> {
        let Some(previous) = self.memento.get_text(MEMENTO_PREVIOUS_VERSION) else {
            return Ok(Status::ok());
        };
        let unit = params.require_unit()?;
        let version = Version::parse(previous)
            .with_context(|| format!("invalid remembered version '{previous}'"))?;
        profile.add_unit(unit.id.clone(), version);
        self.memento.clear();
        Ok(Status::ok())
    }

    fn memento(&self) -> Option<&Memento> {
        Some(&self.memento)
    }
}
