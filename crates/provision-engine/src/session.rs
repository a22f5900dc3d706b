use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use provision_core::{Operand, Status};
use provision_registry::Profile;
use tracing::{debug, warn};

use crate::action::BoundAction;
use crate::config::TraceConfig;
use crate::context::{ActionParameters, Parameters, ProvisioningContext};
use crate::error::EngineError;
use crate::guard::guard_status;
use crate::phase::{undo_phase, Phase, PhaseScope};
use crate::touchpoint::Touchpoint;

/// An executed (or attempted) action with the exact parameters it ran with.
pub(crate) struct RecordedAction {
    action: BoundAction,
    values: Parameters,
}

impl RecordedAction {
    pub(crate) fn id(&self) -> &str {
        self.action.id()
    }

    pub(crate) fn touchpoint(&self) -> Option<Rc<dyn Touchpoint>> {
        self.action.touchpoint().cloned()
    }

    pub(crate) fn values(&self) -> &Parameters {
        &self.values
    }

    pub(crate) fn execute(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Status {
        self.action.execute(params, profile)
    }

    pub(crate) fn undo(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Status {
        self.action.undo(params, profile)
    }
}

pub(crate) struct OperandRecord {
    pub(crate) index: usize,
    pub(crate) operand: Operand,
    pub(crate) actions: Vec<RecordedAction>,
}

pub(crate) struct PhaseRecord {
    pub(crate) phase: Rc<dyn Phase>,
    pub(crate) operands: Vec<OperandRecord>,
}

impl PhaseRecord {
    fn action_count(&self) -> usize {
        self.operands.iter().map(|record| record.actions.len()).sum()
    }
}

struct OpenPhase {
    record: PhaseRecord,
    /// Live phase scope, present once the phase failed mid-run.
    scope: Option<PhaseScope>,
}

/// The transaction log of one `Engine::perform` call.
///
/// Phases are bracketed with [`EngineSession::record_phase_start`] and
/// [`EngineSession::record_phase_end`]; every action is recorded right before
/// it runs. The session ends with exactly one of `commit`, `rollback` or
/// `abandon`, which finalize every touched touchpoint once.
pub struct EngineSession {
    profile_id: String,
    data_dir: PathBuf,
    context: ProvisioningContext,
    trace: TraceConfig,
    completed: Vec<PhaseRecord>,
    current: Option<OpenPhase>,
    touchpoints: BTreeMap<String, Rc<dyn Touchpoint>>,
    finalized: bool,
}

impl EngineSession {
    pub fn new(
        profile_id: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        context: ProvisioningContext,
        trace: TraceConfig,
    ) -> Self {
        Self {
            profile_id: profile_id.into(),
            data_dir: data_dir.into(),
            context,
            trace,
            completed: Vec::new(),
            current: None,
            touchpoints: BTreeMap::new(),
            finalized: false,
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_phase_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn touchpoint_types(&self) -> Vec<&str> {
        self.touchpoints.keys().map(String::as_str).collect()
    }

    pub fn recorded_action_count(&self) -> usize {
        let open = self
            .current
            .as_ref()
            .map(|open| open.record.action_count())
            .unwrap_or(0);
        self.completed
            .iter()
            .map(PhaseRecord::action_count)
            .sum::<usize>()
            + open
    }

    pub fn record_phase_start(&mut self, phase: &Rc<dyn Phase>) -> Result<(), EngineError> {
        self.ensure_active()?;
        if let Some(open) = &self.current {
            return Err(EngineError::PhaseAlreadyOpen {
                open: open.record.phase.id().to_string(),
                requested: phase.id().to_string(),
            });
        }
        self.current = Some(OpenPhase {
            record: PhaseRecord {
                phase: Rc::clone(phase),
                operands: Vec::new(),
            },
            scope: None,
        });
        Ok(())
    }

    pub fn record_phase_end(&mut self, phase: &Rc<dyn Phase>) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.ensure_open(phase)?;
        if let Some(open) = self.current.take() {
            self.completed.push(open.record);
        }
        Ok(())
    }

    /// Keeps the failed phase open together with its live scope.
    pub(crate) fn record_phase_abort(
        &mut self,
        phase: &Rc<dyn Phase>,
        scope: PhaseScope,
    ) -> Result<(), EngineError> {
        self.ensure_active()?;
        self.ensure_open(phase)?;
        if let Some(open) = self.current.as_mut() {
            open.scope = Some(scope);
        }
        Ok(())
    }

    /// Appends `action` to the open phase, grouped with the previous action
    /// when both belong to the same operand.
    pub(crate) fn record_action(
        &mut self,
        index: usize,
        operand: &Operand,
        action: BoundAction,
        values: Parameters,
    ) -> Result<&mut RecordedAction, EngineError> {
        self.ensure_active()?;
        let Some(open) = self.current.as_mut() else {
            return Err(EngineError::NoOpenPhase {
                action: action.id().to_string(),
            });
        };
        if let Some(touchpoint) = action.touchpoint() {
            self.touchpoints
                .entry(touchpoint.touchpoint_type().to_string())
                .or_insert_with(|| Rc::clone(touchpoint));
        }

        let operands = &mut open.record.operands;
        let same_operand = operands.last().is_some_and(|last| last.index == index);
        if !same_operand {
            operands.push(OperandRecord {
                index,
                operand: operand.clone(),
                actions: Vec::new(),
            });
        }
        let last = operands.len() - 1;
        let actions = &mut operands[last].actions;
        actions.push(RecordedAction { action, values });
        let position = actions.len() - 1;
        Ok(&mut actions[position])
    }

    /// Finalizes every touched touchpoint with `commit` and discards the log.
    pub fn commit(&mut self, profile: &Profile) -> Result<Status, EngineError> {
        self.ensure_active()?;
        if let Some(open) = &self.current {
            return Err(EngineError::PhaseStillOpen {
                phase: open.record.phase.id().to_string(),
            });
        }
        let status = self.finalize_touchpoints(profile);
        self.completed.clear();
        self.finalized = true;
        Ok(status)
    }

    /// Undoes every recorded action, newest first, then commits every touched
    /// touchpoint. Individual failures are collected, never short-circuited.
    pub fn rollback(&mut self, profile: &mut Profile) -> Result<Status, EngineError> {
        self.ensure_active()?;
        let mut status = Status::ok_from("rollback", format!("rolled back profile {}", self.profile_id));

        if let Some(OpenPhase { mut record, scope }) = self.current.take() {
            if self.trace.rollback {
                debug!(phase = record.phase.id(), "rolling back open phase");
            }
            status.merge(undo_phase(
                &mut record,
                scope,
                profile,
                &self.context,
                &self.data_dir,
                self.trace,
            ));
        }
        while let Some(mut record) = self.completed.pop() {
            if self.trace.rollback {
                debug!(phase = record.phase.id(), "rolling back completed phase");
            }
            status.merge(undo_phase(
                &mut record,
                None,
                profile,
                &self.context,
                &self.data_dir,
                self.trace,
            ));
        }

        status.merge_problems(self.finalize_touchpoints(profile));
        self.finalized = true;
        Ok(status)
    }

    /// Calls `rollback` on every touched touchpoint without undoing anything.
    /// Used only when the undo sweep itself could not run.
    pub fn abandon(&mut self, profile: &Profile) -> Status {
        let mut status = Status::ok();
        if self.finalized {
            return status;
        }
        for (touchpoint_type, touchpoint) in &self.touchpoints {
            status.merge_problems(guard_status(touchpoint_type, "touchpoint rollback failed", || {
                touchpoint.rollback(profile)
            }));
        }
        self.current = None;
        self.completed.clear();
        self.finalized = true;
        status
    }

    fn finalize_touchpoints(&self, profile: &Profile) -> Status {
        let mut status = Status::ok();
        for (touchpoint_type, touchpoint) in &self.touchpoints {
            status.merge_problems(guard_status(touchpoint_type, "touchpoint commit failed", || {
                touchpoint.commit(profile)
            }));
        }
        status
    }

    fn ensure_active(&self) -> Result<(), EngineError> {
        if self.finalized {
            return Err(EngineError::SessionFinalized);
        }
        Ok(())
    }

    fn ensure_open(&self, phase: &Rc<dyn Phase>) -> Result<(), EngineError> {
        match &self.current {
            Some(open) if Rc::ptr_eq(&open.record.phase, phase) => Ok(()),
            other => Err(EngineError::PhaseNotOpen {
                requested: phase.id().to_string(),
                open: other
                    .as_ref()
                    .map(|open| open.record.phase.id().to_string()),
            }),
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if !self.finalized && !self.touchpoints.is_empty() {
            warn!(
                profile = %self.profile_id,
                touchpoints = self.touchpoints.len(),
                "engine session dropped without commit or rollback"
            );
        }
    }
}
