use std::cell::RefCell;

use crossbeam::channel::{unbounded, Receiver, Sender};
use provision_core::{Operand, Status};

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningEvent {
    Begin {
        profile_id: String,
        phase_set: String,
        operands: Vec<Operand>,
    },
    Commit {
        profile_id: String,
        phase_set: String,
        operands: Vec<Operand>,
    },
    Rollback {
        profile_id: String,
        phase_set: String,
        operands: Vec<Operand>,
        cause: Status,
    },
}

impl ProvisioningEvent {
    pub fn profile_id(&self) -> &str {
        match self {
            Self::Begin { profile_id, .. }
            | Self::Commit { profile_id, .. }
            | Self::Rollback { profile_id, .. } => profile_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::Commit { .. } => "commit",
            Self::Rollback { .. } => "rollback",
        }
    }
}

/// Fan-out of transaction events to any number of observers. Sends go to
/// unbounded channels and never block; disconnected receivers are dropped.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Sender<ProvisioningEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ProvisioningEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn publish(&self, event: ProvisioningEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}
