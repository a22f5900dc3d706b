use anyhow::{Context, Result};
use serde::Deserialize;

use crate::operand::Operand;
use crate::unit::InstallableUnit;

/// An ordered list of operands as produced by a resolver, loadable from TOML:
///
/// ```toml
/// [[operands]]
/// kind = "install"
/// [operands.unit]
/// id = "tool"
/// version = "1.0.0"
/// touchpoint = "native"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPlan {
    #[serde(default)]
    operands: Vec<RawOperand>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
enum RawOperand {
    Install { unit: InstallableUnit },
    Uninstall { unit: InstallableUnit },
    Update { from: InstallableUnit, to: InstallableUnit },
    Configure { unit: InstallableUnit },
}

impl From<RawOperand> for Operand {
    fn from(value: RawOperand) -> Self {
        match value {
            RawOperand::Install { unit } => Operand::install(unit),
            RawOperand::Uninstall { unit } => Operand::uninstall(unit),
            RawOperand::Update { from, to } => Operand::update(from, to),
            RawOperand::Configure { unit } => Operand::configure(unit),
        }
    }
}

impl ChangePlan {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let raw: RawPlan = toml::from_str(input).context("failed to parse change plan")?;
        let operands = raw
            .operands
            .into_iter()
            .map(Operand::from)
            .collect::<Vec<_>>();
        for (index, operand) in operands.iter().enumerate() {
            operand
                .validate()
                .with_context(|| format!("change plan operand #{} is invalid", index + 1))?;
        }
        Ok(Self { operands })
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}
