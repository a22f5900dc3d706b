use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use provision_core::{InstallableUnit, Operand};

/// String parameters handed to touchpoints and actions.
pub type Parameters = BTreeMap<String, String>;

pub const PARM_PHASE_ID: &str = "phase_id";
pub const PARM_PROFILE_ID: &str = "profile_id";
pub const PARM_DATA_DIR: &str = "data_dir";
pub const PARM_OPERAND: &str = "operand";
pub const PARM_UNIT_ID: &str = "unit_id";
pub const PARM_UNIT_VERSION: &str = "unit_version";

/// Transaction-scoped properties supplied by the caller (install root,
/// environment flags, and so on). Copied into every phase's parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningContext {
    properties: BTreeMap<String, String>,
}

impl ProvisioningContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

/// Read-only view given to one action invocation. `undo` receives exactly the
/// same view that `execute` saw.
#[derive(Debug)]
pub struct ActionParameters<'a> {
    phase_id: &'a str,
    operand: &'a Operand,
    unit: Option<&'a InstallableUnit>,
    context: &'a ProvisioningContext,
    data_dir: &'a Path,
    values: Parameters,
}

impl<'a> ActionParameters<'a> {
    pub fn new(
        phase_id: &'a str,
        operand: &'a Operand,
        unit: Option<&'a InstallableUnit>,
        context: &'a ProvisioningContext,
        data_dir: &'a Path,
        values: Parameters,
    ) -> Self {
        Self {
            phase_id,
            operand,
            unit,
            context,
            data_dir,
            values,
        }
    }

    pub fn phase_id(&self) -> &str {
        self.phase_id
    }

    pub fn operand(&self) -> &Operand {
        self.operand
    }

    /// The side of the operand the current phase acts on.
    pub fn unit(&self) -> Option<&InstallableUnit> {
        self.unit
    }

    pub fn require_unit(&self) -> Result<&InstallableUnit> {
        self.unit.ok_or_else(|| {
            anyhow!(
                "phase '{}' has no unit to act on for {}",
                self.phase_id,
                self.operand
            )
        })
    }

    pub fn context(&self) -> &ProvisioningContext {
        self.context
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow!("missing required parameter '{key}'"))
    }

    pub fn values(&self) -> &Parameters {
        &self.values
    }
}
