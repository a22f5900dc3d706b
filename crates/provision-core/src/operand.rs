use std::fmt;

use anyhow::{Context, Result};

use crate::unit::InstallableUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Install,
    Uninstall,
    Update,
    Configure,
}

impl OperandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::Update => "update",
            Self::Configure => "configure",
        }
    }
}

/// One requested change. `first` is the unit as currently installed and
/// `second` the unit as it should end up; phases pick the side they act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Install(InstallableUnit),
    Uninstall(InstallableUnit),
    Update {
        from: InstallableUnit,
        to: InstallableUnit,
    },
    Configure(InstallableUnit),
}

impl Operand {
    pub fn install(unit: InstallableUnit) -> Self {
        Self::Install(unit)
    }

    pub fn uninstall(unit: InstallableUnit) -> Self {
        Self::Uninstall(unit)
    }

    pub fn update(from: InstallableUnit, to: InstallableUnit) -> Self {
        Self::Update { from, to }
    }

    pub fn configure(unit: InstallableUnit) -> Self {
        Self::Configure(unit)
    }

    pub fn kind(&self) -> OperandKind {
        match self {
            Self::Install(_) => OperandKind::Install,
            Self::Uninstall(_) => OperandKind::Uninstall,
            Self::Update { .. } => OperandKind::Update,
            Self::Configure(_) => OperandKind::Configure,
        }
    }

    pub fn first(&self) -> Option<&InstallableUnit> {
        match self {
            Self::Install(_) => None,
            Self::Uninstall(unit) | Self::Configure(unit) => Some(unit),
            Self::Update { from, .. } => Some(from),
        }
    }

    pub fn second(&self) -> Option<&InstallableUnit> {
        match self {
            Self::Uninstall(_) => None,
            Self::Install(unit) | Self::Configure(unit) => Some(unit),
            Self::Update { to, .. } => Some(to),
        }
    }

    /// The unit that best names this change in messages.
    pub fn unit(&self) -> &InstallableUnit {
        match self {
            Self::Install(unit) | Self::Uninstall(unit) | Self::Configure(unit) => unit,
            Self::Update { to, .. } => to,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for unit in self.first().into_iter().chain(self.second()) {
            unit.validate()
                .with_context(|| format!("invalid {} operand", self.kind().as_str()))?;
        }
        if let Self::Update { from, to } = self {
            if from.id != to.id {
                return Err(anyhow::anyhow!(
                    "update operand must keep the unit id (from '{}' to '{}')",
                    from.id,
                    to.id
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update { from, to } => write!(f, "update {from} -> {to}"),
            other => write!(f, "{} {}", other.kind().as_str(), other.unit()),
        }
    }
}
