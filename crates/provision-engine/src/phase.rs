use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use provision_core::{InstallableUnit, Operand, Status};
use provision_registry::Profile;
use tracing::debug;

use crate::action::{ActionRegistry, BoundAction};
use crate::config::TraceConfig;
use crate::context::{
    ActionParameters, Parameters, ProvisioningContext, PARM_DATA_DIR, PARM_OPERAND,
    PARM_PHASE_ID, PARM_PROFILE_ID, PARM_UNIT_ID, PARM_UNIT_VERSION,
};
use crate::error::EngineError;
use crate::guard::{guard, guard_status};
use crate::monitor::{work_share, ProgressMonitor};
use crate::session::{EngineSession, OperandRecord, PhaseRecord};
use crate::touchpoint::Touchpoint;

pub const CANCELLED_MESSAGE: &str = "cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    NotStarted,
    PrePerform,
    MainPerform,
    PostPerform,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub state: PhaseState,
    pub status: Status,
}

/// One stage of a transaction. Implementations are stateless between
/// invocations; everything a run needs lives in its parameter maps.
pub trait Phase {
    fn id(&self) -> &str;

    /// Relative progress weight.
    fn weight(&self) -> u32;

    fn is_applicable(&self, _operand: &Operand) -> bool {
        true
    }

    /// The side of `operand` this phase acts on.
    fn unit<'a>(&self, operand: &'a Operand) -> Option<&'a InstallableUnit> {
        operand.second().or(operand.first())
    }

    /// Ordered actions for `operand`. An empty list is valid.
    fn actions(&self, operand: &Operand, registry: &ActionRegistry) -> Result<Vec<BoundAction>> {
        let Some(unit) = self.unit(operand) else {
            return Ok(Vec::new());
        };
        Ok(unit
            .instructions_for(self.id())
            .iter()
            .map(|instruction| registry.resolve_instruction(unit, instruction))
            .collect())
    }

    fn initialize_phase(&self, _profile: &Profile, _params: &mut Parameters) -> Result<Status> {
        Ok(Status::ok())
    }

    fn complete_phase(&self, _profile: &Profile, _params: &Parameters) -> Result<Status> {
        Ok(Status::ok())
    }

    fn initialize_operand(
        &self,
        _profile: &Profile,
        _operand: &Operand,
        _params: &mut Parameters,
    ) -> Result<Status> {
        Ok(Status::ok())
    }

    fn complete_operand(
        &self,
        _profile: &Profile,
        _operand: &Operand,
        _params: &Parameters,
    ) -> Result<Status> {
        Ok(Status::ok())
    }

    fn problem_message(&self) -> String {
        format!("an error occurred during the {} phase", self.id())
    }
}

/// Shared, read-only inputs of one phase-set run.
pub struct PhaseEnv<'a> {
    pub context: &'a ProvisioningContext,
    pub actions: &'a ActionRegistry,
    pub data_dir: &'a Path,
    pub trace: TraceConfig,
    pub monitor: &'a dyn ProgressMonitor,
}

/// Phase-scoped parameters plus the touchpoints initialized so far in this
/// phase, each with its own copy of the parameters.
pub(crate) struct PhaseScope {
    phase_id: String,
    params: Parameters,
    touchpoints: Vec<(Rc<dyn Touchpoint>, Parameters)>,
}

impl PhaseScope {
    fn touchpoint_params(&self, touchpoint_type: &str) -> Option<&Parameters> {
        self.touchpoints
            .iter()
            .find(|(touchpoint, _)| touchpoint.touchpoint_type() == touchpoint_type)
            .map(|(_, params)| params)
    }

    /// Calls `initialize_phase` the first time a touchpoint shows up.
    fn enter_touchpoint(&mut self, touchpoint: &Rc<dyn Touchpoint>, profile: &Profile) -> Status {
        let touchpoint_type = touchpoint.touchpoint_type();
        if self.touchpoint_params(touchpoint_type).is_some() {
            return Status::ok();
        }
        let mut params = self.params.clone();
        let phase_id = self.phase_id.as_str();
        let context = format!("{touchpoint_type} failed to initialize phase {phase_id}");
        let status = guard_status(touchpoint_type, &context, || {
            touchpoint.initialize_phase(profile, phase_id, &mut params)
        });
        if !status.is_failure() {
            self.touchpoints.push((Rc::clone(touchpoint), params));
        }
        status
    }

    /// `operand_params` laid over a touchpoint's phase parameters, keeping
    /// only the entries that differ from the shared phase map.
    fn overlay(&self, base: &Parameters, operand_params: &Parameters) -> Parameters {
        let mut merged = base.clone();
        for (key, value) in operand_params {
            if self.params.get(key) != Some(value) {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

fn trace_state(trace: TraceConfig, phase: &dyn Phase, state: PhaseState) {
    if trace.phases {
        debug!(phase = phase.id(), state = ?state, "phase state");
    }
}

/// `Phase::is_applicable` behind the fault guard.
pub(crate) fn applies(phase: &dyn Phase, operand: &Operand) -> Result<bool, Status> {
    guard(
        phase.id(),
        &format!("failed to check whether {operand} applies"),
        || Ok(phase.is_applicable(operand)),
    )
}

/// `Phase::unit` behind the fault guard.
pub(crate) fn acted_unit<'a>(
    phase: &dyn Phase,
    operand: &'a Operand,
) -> Result<Option<&'a InstallableUnit>, Status> {
    guard(
        phase.id(),
        &format!("failed to select the unit of {operand}"),
        || Ok(phase.unit(operand)),
    )
}

pub(crate) fn pre_perform(
    phase: &dyn Phase,
    profile: &Profile,
    context: &ProvisioningContext,
    data_dir: &Path,
) -> (PhaseScope, Status) {
    let mut params: Parameters = context.properties().clone();
    params.insert(PARM_PHASE_ID.to_string(), phase.id().to_string());
    params.insert(PARM_PROFILE_ID.to_string(), profile.id().to_string());
    params.insert(PARM_DATA_DIR.to_string(), data_dir.display().to_string());
    let status = guard_status(phase.id(), "phase initialization failed", || {
        phase.initialize_phase(profile, &mut params)
    });
    let scope = PhaseScope {
        phase_id: phase.id().to_string(),
        params,
        touchpoints: Vec::new(),
    };
    (scope, status)
}

pub(crate) fn post_perform(phase: &dyn Phase, scope: PhaseScope, profile: &Profile) -> Status {
    let mut status = Status::ok();
    for (touchpoint, params) in scope.touchpoints.iter().rev() {
        let touchpoint_type = touchpoint.touchpoint_type();
        let context = format!("{touchpoint_type} failed to complete phase {}", scope.phase_id);
        status.merge_problems(guard_status(touchpoint_type, &context, || {
            touchpoint.complete_phase(profile, &scope.phase_id, params)
        }));
    }
    status.merge_problems(guard_status(phase.id(), "phase completion failed", || {
        phase.complete_phase(profile, &scope.params)
    }));
    status
}

#[allow(clippy::too_many_arguments)]
fn perform_operand(
    phase: &dyn Phase,
    session: &mut EngineSession,
    scope: &mut PhaseScope,
    profile: &mut Profile,
    index: usize,
    operand: &Operand,
    env: &PhaseEnv<'_>,
    status: &mut Status,
) -> Result<(), EngineError> {
    let resolved = guard(
        phase.id(),
        &format!("failed to resolve actions for {operand}"),
        || phase.actions(operand, env.actions),
    );
    let actions = match resolved {
        Ok(actions) => actions,
        Err(problem) => {
            status.merge(problem);
            return Ok(());
        }
    };
    let unit = match acted_unit(phase, operand) {
        Ok(unit) => unit,
        Err(problem) => {
            status.merge(problem);
            return Ok(());
        }
    };

    let mut operand_params = scope.params.clone();
    operand_params.insert(PARM_OPERAND.to_string(), operand.to_string());
    if let Some(unit) = unit {
        operand_params.insert(PARM_UNIT_ID.to_string(), unit.id.clone());
        operand_params.insert(PARM_UNIT_VERSION.to_string(), unit.version.to_string());
    }
    status.merge_problems(guard_status(
        phase.id(),
        &format!("failed to initialize {operand}"),
        || phase.initialize_operand(profile, operand, &mut operand_params),
    ));
    if status.is_failure() {
        return Ok(());
    }

    let mut operand_touchpoints: Vec<(Rc<dyn Touchpoint>, Parameters)> = Vec::new();
    for action in &actions {
        let Some(touchpoint) = action.touchpoint() else {
            continue;
        };
        let touchpoint_type = touchpoint.touchpoint_type();
        if operand_touchpoints
            .iter()
            .any(|(known, _)| known.touchpoint_type() == touchpoint_type)
        {
            continue;
        }
        status.merge_problems(scope.enter_touchpoint(touchpoint, profile));
        if status.is_failure() {
            return Ok(());
        }
        let base = scope
            .touchpoint_params(touchpoint_type)
            .cloned()
            .unwrap_or_default();
        let mut params = scope.overlay(&base, &operand_params);
        status.merge_problems(guard_status(
            touchpoint_type,
            &format!("{touchpoint_type} failed to initialize {operand}"),
            || touchpoint.initialize_operand(profile, operand, &mut params),
        ));
        if status.is_failure() {
            return Ok(());
        }
        operand_touchpoints.push((Rc::clone(touchpoint), params));
    }

    for action in actions {
        let mut values = action
            .touchpoint()
            .and_then(|touchpoint| {
                operand_touchpoints
                    .iter()
                    .find(|(known, _)| known.touchpoint_type() == touchpoint.touchpoint_type())
                    .map(|(_, params)| params.clone())
            })
            .unwrap_or_else(|| operand_params.clone());
        values.extend(action.args().clone());
        let params = ActionParameters::new(
            phase.id(),
            operand,
            unit,
            env.context,
            env.data_dir,
            values.clone(),
        );
        let recorded = session.record_action(index, operand, action, values)?;
        let action_status = recorded.execute(&params, profile);
        if env.trace.actions {
            debug!(
                phase = phase.id(),
                action = recorded.id(),
                operand = %operand,
                severity = %action_status.severity(),
                "action executed"
            );
        }
        status.merge_problems(action_status);
        if status.is_failure() {
            return Ok(());
        }
    }

    for (touchpoint, params) in operand_touchpoints.iter().rev() {
        let touchpoint_type = touchpoint.touchpoint_type();
        status.merge_problems(guard_status(
            touchpoint_type,
            &format!("{touchpoint_type} failed to complete {operand}"),
            || touchpoint.complete_operand(profile, operand, params),
        ));
    }
    status.merge_problems(guard_status(
        phase.id(),
        &format!("failed to complete {operand}"),
        || phase.complete_operand(profile, operand, &operand_params),
    ));
    Ok(())
}

fn main_perform(
    phase: &dyn Phase,
    session: &mut EngineSession,
    scope: &mut PhaseScope,
    profile: &mut Profile,
    operands: &[Operand],
    env: &PhaseEnv<'_>,
    budget: u64,
) -> Result<Status, EngineError> {
    let mut status = Status::ok();
    let mut applicable: Vec<(usize, &Operand)> = Vec::new();
    for (index, operand) in operands.iter().enumerate() {
        match applies(phase, operand) {
            Ok(true) => applicable.push((index, operand)),
            Ok(false) => {}
            Err(problem) => {
                status.merge(problem);
                return Ok(status);
            }
        }
    }
    if applicable.is_empty() {
        env.monitor.worked(budget);
        return Ok(status);
    }

    for (position, (index, operand)) in applicable.iter().enumerate() {
        if env.monitor.is_cancelled() {
            status.merge(Status::cancel(phase.id(), CANCELLED_MESSAGE));
            break;
        }
        env.monitor
            .set_message(&format!("{}: {operand}", phase.id()));
        perform_operand(
            phase,
            session,
            scope,
            profile,
            *index,
            operand,
            env,
            &mut status,
        )?;
        env.monitor
            .worked(work_share(budget, position, applicable.len()));
        if status.is_failure() {
            break;
        }
    }
    Ok(status)
}

/// Wraps failure detail under one phase-level summary.
fn summarize(phase: &dyn Phase, detail: Status) -> Status {
    let message = if detail.is_cancel() {
        CANCELLED_MESSAGE.to_string()
    } else {
        phase.problem_message()
    };
    let mut summary = Status::new(detail.severity(), phase.id(), message);
    for child in detail.into_children() {
        summary.merge(child);
    }
    summary
}

/// Runs one phase through its state machine. A failure in the main stage
/// leaves the phase open in `session` so rollback can reverse it.
pub(crate) fn perform_phase(
    phase: &Rc<dyn Phase>,
    session: &mut EngineSession,
    profile: &mut Profile,
    operands: &[Operand],
    env: &PhaseEnv<'_>,
    budget: u64,
) -> Result<PhaseOutcome, EngineError> {
    let current = phase.as_ref();
    trace_state(env.trace, current, PhaseState::PrePerform);
    let (mut scope, pre_status) = pre_perform(current, profile, env.context, env.data_dir);
    let mut status = Status::ok();
    status.merge_problems(pre_status);
    if status.is_failure() {
        trace_state(env.trace, current, PhaseState::Failed);
        return Ok(PhaseOutcome {
            state: PhaseState::Failed,
            status: summarize(current, status),
        });
    }

    session.record_phase_start(phase)?;
    trace_state(env.trace, current, PhaseState::MainPerform);
    let main_status = main_perform(current, session, &mut scope, profile, operands, env, budget)?;
    for child in main_status.into_children() {
        status.merge(child);
    }
    if status.is_failure() {
        session.record_phase_abort(phase, scope)?;
        trace_state(env.trace, current, PhaseState::Failed);
        return Ok(PhaseOutcome {
            state: PhaseState::Failed,
            status: summarize(current, status),
        });
    }
    session.record_phase_end(phase)?;

    trace_state(env.trace, current, PhaseState::PostPerform);
    status.merge_problems(post_perform(current, scope, profile));
    if status.is_failure() {
        trace_state(env.trace, current, PhaseState::Failed);
        return Ok(PhaseOutcome {
            state: PhaseState::Failed,
            status: summarize(current, status),
        });
    }
    trace_state(env.trace, current, PhaseState::Done);
    Ok(PhaseOutcome {
        state: PhaseState::Done,
        status,
    })
}

/// Reverses one recorded phase: setup (unless `scope` is still live from a
/// phase that failed mid-run), undo of every action in reverse, teardown.
pub(crate) fn undo_phase(
    record: &mut PhaseRecord,
    scope: Option<PhaseScope>,
    profile: &mut Profile,
    context: &ProvisioningContext,
    data_dir: &Path,
    trace: TraceConfig,
) -> Status {
    let phase = Rc::clone(&record.phase);
    let current = phase.as_ref();
    let mut result = Status::ok_from(current.id(), format!("rolled back phase {}", current.id()));
    let mut scope = match scope {
        Some(scope) => scope,
        None => {
            let (scope, status) = pre_perform(current, profile, context, data_dir);
            result.merge_problems(status);
            scope
        }
    };

    for OperandRecord {
        operand, actions, ..
    } in record.operands.iter_mut().rev()
    {
        let mut operand_status = Status::ok_from(current.id(), format!("undo {operand}"));
        let unit = match acted_unit(current, operand) {
            Ok(unit) => unit,
            Err(problem) => {
                operand_status.merge(problem);
                None
            }
        };
        for recorded in actions.iter_mut().rev() {
            if let Some(touchpoint) = recorded.touchpoint() {
                result.merge_problems(scope.enter_touchpoint(&touchpoint, profile));
            }
            let params = ActionParameters::new(
                current.id(),
                operand,
                unit,
                context,
                data_dir,
                recorded.values().clone(),
            );
            let undo_status = recorded.undo(&params, profile);
            if trace.rollback {
                debug!(
                    phase = current.id(),
                    action = recorded.id(),
                    operand = %operand,
                    severity = %undo_status.severity(),
                    "action undone"
                );
            }
            operand_status.merge(undo_status);
        }
        result.merge(operand_status);
    }

    result.merge_problems(post_perform(current, scope, profile));
    result
}
