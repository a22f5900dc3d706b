use anyhow::Result;
use provision_core::{Operand, Status};
use provision_registry::Profile;

use crate::context::Parameters;

/// Adapter for one kind of target system. Every hook is optional.
///
/// Phase hooks run once per phase for each touchpoint that phase actually
/// uses; operand hooks bracket the actions of a single operand. `commit` and
/// `rollback` finalize a transaction and are mutually exclusive: a session
/// calls exactly one of them, once, on every touchpoint it touched. The
/// rollback sweep finalizes with `commit` because undo work is itself work the
/// touchpoint must make durable; `rollback` is reserved for sessions that are
/// abandoned because the undo sweep itself could not run.
pub trait Touchpoint {
    fn touchpoint_type(&self) -> &str;

    fn initialize_phase(
        &self,
        _profile: &Profile,
        _phase_id: &str,
        _params: &mut Parameters,
    ) -> Result<Status> {
        Ok(Status::ok())
    }

    fn complete_phase(
        &self,
        _profile: &Profile,
        _phase_id: &str,
        _params: &Parameters,
    ) -> Result<Status> {
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

    fn commit(&self, _profile: &Profile) -> Result<Status> {
        Ok(Status::ok())
    }

    fn rollback(&self, _profile: &Profile) -> Result<Status> {
        Ok(Status::ok())
    }
}
