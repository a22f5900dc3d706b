use std::rc::Rc;

use provision_core::{Operand, Status};
use provision_registry::Profile;
use tracing::debug;

use crate::action::ActionRegistry;
use crate::error::EngineError;
use crate::guard::guard;
use crate::phase::{applies, perform_phase, Phase, PhaseEnv, PhaseState, CANCELLED_MESSAGE};
use crate::phases::InstructionPhase;
use crate::session::EngineSession;

/// Monitor ticks per unit of phase weight.
const TICKS_PER_WEIGHT: f64 = 1000.0;

/// An ordered list of phases forming one transaction type.
#[derive(Clone)]
pub struct PhaseSet {
    name: String,
    phases: Vec<Rc<dyn Phase>>,
}

impl std::fmt::Debug for PhaseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.phases.iter().map(|phase| phase.id()).collect();
        f.debug_struct("PhaseSet")
            .field("name", &self.name)
            .field("phases", &ids)
            .finish()
    }
}

impl PhaseSet {
    pub fn new(name: impl Into<String>, phases: Vec<Rc<dyn Phase>>) -> Self {
        Self {
            name: name.into(),
            phases,
        }
    }

    pub fn default_set() -> Self {
        Self::new(
            "default",
            vec![
                Rc::new(InstructionPhase::unconfigure()),
                Rc::new(InstructionPhase::uninstall()),
                Rc::new(InstructionPhase::install()),
                Rc::new(InstructionPhase::configure()),
            ],
        )
    }

    pub fn install_set() -> Self {
        Self::new(
            "install",
            vec![
                Rc::new(InstructionPhase::install()),
                Rc::new(InstructionPhase::configure()),
            ],
        )
    }

    pub fn uninstall_set() -> Self {
        Self::new(
            "uninstall",
            vec![
                Rc::new(InstructionPhase::unconfigure()),
                Rc::new(InstructionPhase::uninstall()),
            ],
        )
    }

    pub fn configure_set() -> Self {
        Self::new(
            "configure",
            vec![
                Rc::new(InstructionPhase::unconfigure()),
                Rc::new(InstructionPhase::configure()),
            ],
        )
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default_set()),
            "install" => Some(Self::install_set()),
            "uninstall" => Some(Self::uninstall_set()),
            "configure" => Some(Self::configure_set()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phases(&self) -> &[Rc<dyn Phase>] {
        &self.phases
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// `weight * applicable / total` per phase; the raw weight when there are
    /// no operands at all.
    pub fn effective_weights(&self, operands: &[Operand]) -> Vec<f64> {
        self.phases
            .iter()
            .map(|phase| {
                let weight = f64::from(phase.weight());
                if operands.is_empty() {
                    return weight;
                }
                // A faulting predicate is reported by the phase run itself.
                let applicable = operands
                    .iter()
                    .filter(|operand| applies(phase.as_ref(), operand).unwrap_or(true))
                    .count();
                weight * applicable as f64 / operands.len() as f64
            })
            .collect()
    }

    /// Runs the phases in order, stopping at the first failed phase. Does not
    /// roll back; the caller owns `session` and decides.
    pub fn perform(
        &self,
        session: &mut EngineSession,
        profile: &mut Profile,
        operands: &[Operand],
        env: &PhaseEnv<'_>,
    ) -> Result<Status, EngineError> {
        let budgets: Vec<u64> = self
            .effective_weights(operands)
            .into_iter()
            .map(|weight| (weight * TICKS_PER_WEIGHT).round() as u64)
            .collect();
        env.monitor.begin(&self.name, budgets.iter().sum());

        let mut status = Status::ok();
        for (phase, budget) in self.phases.iter().zip(budgets) {
            if env.monitor.is_cancelled() {
                status.merge(Status::cancel(phase.id(), CANCELLED_MESSAGE));
                break;
            }
            let outcome = perform_phase(phase, session, profile, operands, env, budget)?;
            if env.trace.phases {
                debug!(
                    phase_set = %self.name,
                    phase = phase.id(),
                    severity = %outcome.status.severity(),
                    "phase finished"
                );
            }
            status.merge_problems(outcome.status);
            if outcome.state == PhaseState::Failed {
                break;
            }
        }
        env.monitor.done();
        Ok(status)
    }

    /// Resolves every applicable action and runs its static validation,
    /// without executing anything.
    pub fn validate(&self, operands: &[Operand], registry: &ActionRegistry) -> Status {
        let mut status = Status::ok();
        for phase in &self.phases {
            for operand in operands {
                match applies(phase.as_ref(), operand) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(problem) => {
                        status.merge(problem);
                        continue;
                    }
                }
                let resolved = guard(
                    phase.id(),
                    &format!("failed to resolve actions for {operand}"),
                    || phase.actions(operand, registry),
                );
                let actions = match resolved {
                    Ok(actions) => actions,
                    Err(problem) => {
                        status.merge(problem);
                        continue;
                    }
                };
                for action in &actions {
                    if let Err(problem) = action.validate() {
                        status.merge(Status::error(
                            action.id(),
                            format!("{} in phase {} for {operand}", problem.message(), phase.id()),
                        ));
                    }
                }
            }
        }
        status
    }
}
