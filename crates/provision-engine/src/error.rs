use thiserror::Error;

/// Contract violations. These are reported to the caller directly instead of
/// being folded into a [`provision_core::Status`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("profile '{id}' rejected by registry: {reason}")]
    InvalidProfile { id: String, reason: String },

    #[error("failed to lock profile '{id}': {reason}")]
    ProfileLock { id: String, reason: String },

    #[error("phase '{requested}' cannot start while phase '{open}' is open")]
    PhaseAlreadyOpen { open: String, requested: String },

    #[error("phase '{requested}' is not the open phase (open={})", .open.as_deref().unwrap_or("none"))]
    PhaseNotOpen {
        requested: String,
        open: Option<String>,
    },

    #[error("phase '{phase}' is still open")]
    PhaseStillOpen { phase: String },

    #[error("cannot record action '{action}' outside of a phase")]
    NoOpenPhase { action: String },

    #[error("session has already been committed or rolled back")]
    SessionFinalized,
}
