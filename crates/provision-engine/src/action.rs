use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use provision_core::{InstallableUnit, Instruction, Memento, Status};
use provision_registry::Profile;
use tracing::warn;

use crate::builtin::{AddUnitAction, RemoveUnitAction, ADD_UNIT_ACTION, REMOVE_UNIT_ACTION};
use crate::context::{ActionParameters, Parameters};
use crate::guard::{guard, guard_status};
use crate::touchpoint::Touchpoint;

/// The smallest reversible unit of work.
///
/// `undo` only gets the parameters `execute` saw plus whatever the action put
/// in its own memento, and must cope with an `execute` that stopped halfway.
pub trait ProvisioningAction {
    fn execute(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status>;

    fn undo(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Result<Status>;

    fn memento(&self) -> Option<&Memento> {
        None
    }

    /// Static check used by dry-run validation; must not touch the target.
    fn validate(&self, _args: &Parameters) -> Result<()> {
        Ok(())
    }
}

/// Placeholder for an action id nothing is registered under. Fails forward
/// and undoes as a no-op so rollback stays symmetric.
#[derive(Debug, Clone)]
pub struct MissingAction {
    id: String,
}

impl MissingAction {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl ProvisioningAction for MissingAction {
    fn execute(&mut self, _params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        Err(anyhow!("no action registered for '{}'", self.id))
    }

    fn undo(&mut self, _params: &ActionParameters<'_>, _profile: &mut Profile) -> Result<Status> {
        Ok(Status::ok())
    }

    fn validate(&self, _args: &Parameters) -> Result<()> {
        Err(anyhow!("no action registered for '{}'", self.id))
    }
}

/// An action resolved for one operand: the implementation, its qualified id,
/// the touchpoint that owns it and the instruction arguments it runs with.
pub struct BoundAction {
    id: String,
    touchpoint: Option<Rc<dyn Touchpoint>>,
    args: Parameters,
    action: Box<dyn ProvisioningAction>,
}

impl BoundAction {
    pub fn new(
        id: impl Into<String>,
        touchpoint: Option<Rc<dyn Touchpoint>>,
        args: Parameters,
        action: Box<dyn ProvisioningAction>,
    ) -> Self {
        Self {
            id: id.into(),
            touchpoint,
            args,
            action,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touchpoint(&self) -> Option<&Rc<dyn Touchpoint>> {
        self.touchpoint.as_ref()
    }

    pub fn args(&self) -> &Parameters {
        &self.args
    }

    pub fn memento(&self) -> Option<&Memento> {
        self.action.memento()
    }

    pub(crate) fn execute(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Status {
        let context = format!("{} failed for {}", self.id, params.operand());
        let action = &mut self.action;
        guard_status(&self.id, &context, || action.execute(params, profile))
    }

    pub(crate) fn undo(&mut self, params: &ActionParameters<'_>, profile: &mut Profile) -> Status {
        let context = format!("undo of {} failed for {}", self.id, params.operand());
        let action = &mut self.action;
        let status = guard_status(&self.id, &context, || action.undo(params, profile));
        if status.is_ok() && status.message().is_empty() {
            return Status::ok_from(&self.id, format!("undone for {}", params.operand()));
        }
        status
    }

    pub(crate) fn validate(&self) -> Result<(), Status> {
        let action = &self.action;
        let args = &self.args;
        guard(&self.id, "validation failed", || action.validate(args))
    }
}

impl fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction")
            .field("id", &self.id)
            .field(
                "touchpoint",
                &self.touchpoint.as_ref().map(|tp| tp.touchpoint_type()),
            )
            .field("args", &self.args)
            .finish()
    }
}

pub type ActionFactory = Box<dyn Fn() -> Box<dyn ProvisioningAction>>;

/// Lookup table from qualified action id (`<touchpoint>.<name>`) to factory,
/// plus the touchpoints those ids belong to.
pub struct ActionRegistry {
    touchpoints: BTreeMap<String, Rc<dyn Touchpoint>>,
    factories: BTreeMap<String, ActionFactory>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// A registry holding only the built-in profile actions.
    pub fn new() -> Self {
        let mut registry = Self {
            touchpoints: BTreeMap::new(),
            factories: BTreeMap::new(),
        };
        registry.register_action(ADD_UNIT_ACTION, || Box::new(AddUnitAction::default()));
        registry.register_action(REMOVE_UNIT_ACTION, || {
            Box::new(RemoveUnitAction::default())
        });
        registry
    }

    pub fn register_touchpoint(&mut self, touchpoint: Rc<dyn Touchpoint>) {
        self.touchpoints
            .insert(touchpoint.touchpoint_type().to_string(), touchpoint);
    }

    pub fn register_action<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ProvisioningAction> + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    pub fn touchpoint(&self, touchpoint_type: &str) -> Option<Rc<dyn Touchpoint>> {
        self.touchpoints.get(touchpoint_type).cloned()
    }

    pub fn contains_action(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    pub fn action_ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, id: &str, args: Parameters) -> BoundAction {
        match self.factories.get(id) {
            Some(factory) => BoundAction::new(id, self.touchpoint_for_action(id), args, factory()),
            None => {
                warn!(action = id, "no action registered, using missing-action placeholder");
                BoundAction::new(id, None, args, Box::new(MissingAction::new(id)))
            }
        }
    }

    pub fn resolve_instruction(
        &self,
        unit: &InstallableUnit,
        instruction: &Instruction,
    ) -> BoundAction {
        let id = instruction.qualified_action(unit.touchpoint.as_deref());
        self.resolve(&id, instruction.args.clone())
    }

    fn touchpoint_for_action(&self, id: &str) -> Option<Rc<dyn Touchpoint>> {
        let (prefix, _) = id.split_once('.')?;
        self.touchpoints.get(prefix).cloned()
    }
}
