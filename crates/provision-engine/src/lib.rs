mod action;
mod builtin;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod guard;
mod monitor;
mod phase;
mod phase_set;
mod phases;
mod session;
mod touchpoint;

pub use action::{ActionFactory, ActionRegistry, BoundAction, MissingAction, ProvisioningAction};
pub use builtin::{AddUnitAction, RemoveUnitAction, ADD_UNIT_ACTION, REMOVE_UNIT_ACTION};
pub use config::{EngineConfig, TraceConfig};
pub use context::{
    ActionParameters, Parameters, ProvisioningContext, PARM_DATA_DIR, PARM_OPERAND,
    PARM_PHASE_ID, PARM_PROFILE_ID, PARM_UNIT_ID, PARM_UNIT_VERSION,
};
pub use engine::Engine;
pub use error::EngineError;
pub use events::{EventBus, ProvisioningEvent};
pub use monitor::{CancellationToken, NullProgressMonitor, ProgressMonitor};
pub use phase::{Phase, PhaseEnv, PhaseOutcome, PhaseState, CANCELLED_MESSAGE};
pub use phase_set::PhaseSet;
pub use phases::{
    InstructionPhase, CONFIGURE_PHASE, INSTALL_PHASE, UNCONFIGURE_PHASE, UNINSTALL_PHASE,
};
pub use session::EngineSession;
pub use touchpoint::Touchpoint;
