use anyhow::Result;
use provision_core::{InstallableUnit, Operand, OperandKind};

use crate::action::{ActionRegistry, BoundAction};
use crate::builtin::{ADD_UNIT_ACTION, REMOVE_UNIT_ACTION};
use crate::context::Parameters;
use crate::phase::Phase;

pub const UNCONFIGURE_PHASE: &str = "unconfigure";
pub const UNINSTALL_PHASE: &str = "uninstall";
pub const INSTALL_PHASE: &str = "install";
pub const CONFIGURE_PHASE: &str = "configure";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitSide {
    /// The unit as currently installed.
    Current,
    /// The unit as it should end up.
    Target,
}

/// A phase driven by the per-phase instructions of each unit, optionally
/// followed by a built-in profile action.
#[derive(Debug, Clone)]
pub struct InstructionPhase {
    id: &'static str,
    weight: u32,
    side: UnitSide,
    skip_configure: bool,
    profile_action: Option<&'static str>,
}

impl InstructionPhase {
    pub fn unconfigure() -> Self {
        Self {
            id: UNCONFIGURE_PHASE,
            weight: 10,
            side: UnitSide::Current,
            skip_configure: false,
            profile_action: None,
        }
    }

    pub fn uninstall() -> Self {
        Self {
            id: UNINSTALL_PHASE,
            weight: 50,
            side: UnitSide::Current,
            skip_configure: true,
            profile_action: Some(REMOVE_UNIT_ACTION),
        }
    }

    pub fn install() -> Self {
        Self {
            id: INSTALL_PHASE,
            weight: 50,
            side: UnitSide::Target,
            skip_configure: true,
            profile_action: Some(ADD_UNIT_ACTION),
        }
    }

    pub fn configure() -> Self {
        Self {
            id: CONFIGURE_PHASE,
            weight: 10,
            side: UnitSide::Target,
            skip_configure: false,
            profile_action: None,
        }
    }
}

impl Phase for InstructionPhase {
    fn id(&self) -> &str {
        self.id
    }

    fn weight(&self) -> u32 {
        self.weight
    }

    fn is_applicable(&self, operand: &Operand) -> bool {
        if self.skip_configure && operand.kind() == OperandKind::Configure {
            return false;
        }
        self.unit(operand).is_some()
    }

    fn unit<'a>(&self, operand: &'a Operand) -> Option<&'a InstallableUnit> {
        match self.side {
            UnitSide::Current => operand.first(),
            UnitSide::Target => operand.second(),
        }
    }

    fn actions(&self, operand: &Operand, registry: &ActionRegistry) -> Result<Vec<BoundAction>> {
        let Some(unit) = self.unit(operand) else {
            return Ok(Vec::new());
        };
        let mut actions: Vec<BoundAction> = unit
            .instructions_for(self.id)
            .iter()
            .map(|instruction| registry.resolve_instruction(unit, instruction))
            .collect();
        if let Some(id) = self.profile_action {
            actions.push(registry.resolve(id, Parameters::new()));
        }
        Ok(actions)
    }
}
