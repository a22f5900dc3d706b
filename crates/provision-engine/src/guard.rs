use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use provision_core::Status;

/// Runs third-party code, turning both `Err` and panics into an ERROR status
/// tagged with `source`.
pub(crate) fn guard<T, F>(source: &str, context: &str, call: F) -> Result<T, Status>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Status::error(source, format!("{context}: {err:#}"))),
        Err(payload) => Err(Status::error(
            source,
            format!(
                "{context}: unexpected fault: {}",
                panic_message(payload.as_ref())
            ),
        )),
    }
}

pub(crate) fn guard_status<F>(source: &str, context: &str, call: F) -> Status
where
    F: FnOnce() -> anyhow::Result<Status>,
{
    match guard(source, context, call) {
        Ok(status) => status.or_source(source),
        Err(status) => status,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
