use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, cheap to clone and share with a UI thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress sink polled by the engine between operands.
pub trait ProgressMonitor {
    fn begin(&self, _task: &str, _total_work: u64) {}

    fn worked(&self, _work: u64) {}

    fn set_message(&self, _message: &str) {}

    fn is_cancelled(&self) -> bool {
        false
    }

    fn done(&self) {}
}

#[derive(Debug, Clone, Default)]
pub struct NullProgressMonitor {
    cancellation: CancellationToken,
}

impl NullProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }
}

impl ProgressMonitor for NullProgressMonitor {
    fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Slice `index` of `budget` split over `count` items; slices sum to `budget`.
pub(crate) fn work_share(budget: u64, index: usize, count: usize) -> u64 {
    if count == 0 {
        return 0;
    }
    let count = count as u128;
    let index = index as u128;
    let budget = u128::from(budget);
    let upper = budget * (index + 1) / count;
    let lower = budget * index / count;
    u64::try_from(upper - lower).unwrap_or(u64::MAX)
}
