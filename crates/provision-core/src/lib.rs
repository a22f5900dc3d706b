mod memento;
mod operand;
mod plan;
mod status;
mod unit;

pub use memento::{Memento, MementoValue};
pub use operand::{Operand, OperandKind};
pub use plan::ChangePlan;
pub use status::{Severity, Status};
pub use unit::{InstallableUnit, Instruction};
