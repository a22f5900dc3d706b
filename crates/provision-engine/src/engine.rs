use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crossbeam::channel::Receiver;
use provision_core::{Operand, Severity, Status};
use provision_registry::{Profile, ProfileRegistry};
use tracing::{debug, info, warn};

use crate::action::ActionRegistry;
use crate::config::EngineConfig;
use crate::context::ProvisioningContext;
use crate::error::EngineError;
use crate::events::{EventBus, ProvisioningEvent};
use crate::guard::panic_message;
use crate::monitor::{NullProgressMonitor, ProgressMonitor};
use crate::phase::PhaseEnv;
use crate::phase_set::PhaseSet;
use crate::session::EngineSession;

/// Releases the profile lock on every exit path, unwinding included.
struct ProfileLockGuard<'a, R: ProfileRegistry> {
    registry: &'a R,
    id: String,
}

impl<R: ProfileRegistry> Drop for ProfileLockGuard<'_, R> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.unlock_profile(&self.id) {
            warn!(profile = %self.id, error = %format!("{err:#}"), "failed to release profile lock");
        }
    }
}

/// Coordinates one transaction: validation, locking, phase execution, then
/// commit and persistence or rollback.
pub struct Engine<R: ProfileRegistry> {
    registry: R,
    actions: ActionRegistry,
    config: EngineConfig,
    events: EventBus,
}

impl<R: ProfileRegistry> Engine<R> {
    pub fn new(registry: R, actions: ActionRegistry) -> Self {
        Self {
            registry,
            actions,
            config: EngineConfig::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> Receiver<ProvisioningEvent> {
        self.events.subscribe()
    }

    /// Applies `operands` to `profile` through `phase_set`.
    ///
    /// `profile` is only replaced once the forward run succeeded and the new
    /// snapshot was persisted. The returned status is the most specific one:
    /// a lone child is returned in place of its parent.
    pub fn perform(
        &self,
        profile: &mut Profile,
        phase_set: &PhaseSet,
        operands: &[Operand],
        context: Option<&ProvisioningContext>,
        monitor: Option<&dyn ProgressMonitor>,
    ) -> Result<Status, EngineError> {
        validate_inputs(profile, phase_set, operands)?;
        let id = profile.id().to_string();
        self.registry
            .validate(profile)
            .map_err(|err| EngineError::InvalidProfile {
                id: id.clone(),
                reason: format!("{err:#}"),
            })?;
        let data_dir = self
            .registry
            .profile_data_dir(&id)
            .map_err(|err| EngineError::InvalidProfile {
                id: id.clone(),
                reason: format!("{err:#}"),
            })?;
        self.registry
            .lock_profile(&id)
            .map_err(|err| EngineError::ProfileLock {
                id: id.clone(),
                reason: format!("{err:#}"),
            })?;
        let _lock = ProfileLockGuard {
            registry: &self.registry,
            id: id.clone(),
        };
        // Another transaction may have committed between validation and lock.
        self.registry
            .validate(profile)
            .map_err(|err| EngineError::InvalidProfile {
                id,
                reason: format!("{err:#}"),
            })?;

        let default_context = ProvisioningContext::new();
        let null_monitor = NullProgressMonitor::new();
        let outcome = self.run_transaction(
            profile,
            phase_set,
            operands,
            context.unwrap_or(&default_context),
            monitor.unwrap_or(&null_monitor),
            &data_dir,
        );
        profile.clear_changed();
        outcome.map(Status::into_most_specific)
    }

    /// Dry run: input checks plus action resolution and static validation.
    pub fn validate(
        &self,
        profile: &Profile,
        phase_set: &PhaseSet,
        operands: &[Operand],
    ) -> Result<Status, EngineError> {
        validate_inputs(profile, phase_set, operands)?;
        self.registry
            .validate(profile)
            .map_err(|err| EngineError::InvalidProfile {
                id: profile.id().to_string(),
                reason: format!("{err:#}"),
            })?;
        Ok(phase_set.validate(operands, &self.actions).into_most_specific())
    }

    fn run_transaction(
        &self,
        profile: &mut Profile,
        phase_set: &PhaseSet,
        operands: &[Operand],
        context: &ProvisioningContext,
        monitor: &dyn ProgressMonitor,
        data_dir: &Path,
    ) -> Result<Status, EngineError> {
        let trace = self.config.trace;
        info!(
            profile = %profile.id(),
            phase_set = %phase_set.name(),
            operands = operands.len(),
            "beginning provisioning operation"
        );
        self.events.publish(ProvisioningEvent::Begin {
            profile_id: profile.id().to_string(),
            phase_set: phase_set.name().to_string(),
            operands: operands.to_vec(),
        });

        let mut session = EngineSession::new(profile.id(), data_dir, context.clone(), trace);
        let mut working = profile.clone();
        let env = PhaseEnv {
            context,
            actions: &self.actions,
            data_dir,
            trace,
            monitor,
        };
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            phase_set.perform(&mut session, &mut working, operands, &env)
        }));
        let mut status = match run {
            Ok(Ok(status)) => status,
            Ok(Err(err)) => {
                warn!(profile = %profile.id(), error = %err, "provisioning aborted");
                let cleanup = self.roll_back(&mut session, &mut working, profile.id());
                self.publish_rollback(profile, phase_set, operands, cleanup);
                return Err(err);
            }
            Err(payload) => {
                let status = Status::error(
                    "engine",
                    format!(
                        "unexpected fault during {} operation: {}",
                        phase_set.name(),
                        panic_message(payload.as_ref())
                    ),
                );
                warn!(profile = %profile.id(), message = %status.message(), "provisioning faulted");
                status
            }
        };
        if trace.engine {
            debug!(
                profile = %profile.id(),
                severity = %status.severity(),
                recorded_actions = session.recorded_action_count(),
                "phase set finished"
            );
        }

        if status.is_failure() {
            let cause = status.clone();
            status.merge_problems(self.roll_back(&mut session, &mut working, profile.id()));
            info!(profile = %profile.id(), severity = %cause.severity(), "provisioning rolled back");
            self.publish_rollback(profile, phase_set, operands, cause);
            return Ok(status);
        }

        let committed = session.commit(&working)?;
        if !committed.is_ok() {
            warn!(
                profile = %profile.id(),
                severity = %committed.severity(),
                "touchpoint commit reported problems: {committed}"
            );
        }
        if working.is_changed() {
            if let Err(err) = self.registry.update_profile(&mut working) {
                warn!(profile = %profile.id(), error = %format!("{err:#}"), "failed to persist profile");
                status.merge(Status::error(
                    "registry",
                    format!("failed to persist profile '{}': {err:#}", profile.id()),
                ));
                return Ok(status);
            }
            *profile = working;
        }
        info!(profile = %profile.id(), timestamp = profile.timestamp(), "provisioning committed");
        self.events.publish(ProvisioningEvent::Commit {
            profile_id: profile.id().to_string(),
            phase_set: phase_set.name().to_string(),
            operands: operands.to_vec(),
        });
        Ok(status)
    }

    /// Runs the undo sweep. Only when the sweep itself cannot run is the
    /// session abandoned, which hands cleanup to `Touchpoint::rollback`.
    fn roll_back(&self, session: &mut EngineSession, working: &mut Profile, id: &str) -> Status {
        let sweep = panic::catch_unwind(AssertUnwindSafe(|| session.rollback(working)));
        let problem = match sweep {
            Ok(Ok(rollback)) if rollback.is_failure() => {
                warn!(profile = %id, "rollback completed with errors");
                let mut summary =
                    Status::new(rollback.severity(), "rollback", "rollback completed with errors");
                for child in rollback.into_children() {
                    summary.merge(child);
                }
                return summary;
            }
            Ok(Ok(rollback)) => {
                if self.config.trace.rollback {
                    debug!(profile = %id, phases = rollback.children().len(), "rollback finished");
                }
                return Status::ok();
            }
            Ok(Err(err)) => Status::error("rollback", format!("rollback could not run: {err}")),
            Err(payload) => Status::error(
                "rollback",
                format!(
                    "rollback could not run: unexpected fault: {}",
                    panic_message(payload.as_ref())
                ),
            ),
        };
        warn!(profile = %id, message = %problem.message(), "abandoning provisioning session");
        let mut status = Status::new(Severity::Error, "rollback", "session abandoned");
        status.merge(problem);
        status.merge_problems(session.abandon(working));
        status
    }

    fn publish_rollback(
        &self,
        profile: &Profile,
        phase_set: &PhaseSet,
        operands: &[Operand],
        cause: Status,
    ) {
        self.events.publish(ProvisioningEvent::Rollback {
            profile_id: profile.id().to_string(),
            phase_set: phase_set.name().to_string(),
            operands: operands.to_vec(),
            cause,
        });
    }
}

fn validate_inputs(
    profile: &Profile,
    phase_set: &PhaseSet,
    operands: &[Operand],
) -> Result<(), EngineError> {
    if profile.id().trim().is_empty() {
        return Err(EngineError::InvalidArgument(
            "profile id must not be empty".to_string(),
        ));
    }
    if phase_set.is_empty() {
        return Err(EngineError::InvalidArgument(format!(
            "phase set '{}' has no phases",
            phase_set.name()
        )));
    }
    for (index, operand) in operands.iter().enumerate() {
        operand.validate().map_err(|err| {
            EngineError::InvalidArgument(format!("operand #{} ({operand}): {err:#}", index + 1))
        })?;
    }
    Ok(())
}
