use tokio::time::Instant;

use super::queue::Ticket;
use crate::endpoint::Endpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Waiting for `due`; the heap entry holding `ticket` is the live one
    Scheduled { due: Instant, ticket: Ticket },
    /// Due, waiting in the ready queue for a worker permit
    Ready,
    /// Due, but an attempt from an earlier registration is still running
    AwaitingPrevious,
    Probing,
}

/// Engine-side record of one registered endpoint
#[derive(Debug)]
pub(crate) struct Slot {
    pub endpoint: Endpoint,
    /// Identifies this registration; completions from older ones carry a different value
    pub generation: u64,
    pub registered_at: Instant,
    pub last_completed: Option<Instant>,
    pub state: SlotState,
}

impl Slot {
    pub fn new(endpoint: Endpoint, generation: u64, registered_at: Instant, ticket: Ticket) -> Self {
        let due = registered_at + endpoint.interval();
        Self {
            endpoint,
            generation,
            registered_at,
            last_completed: None,
            state: SlotState::Scheduled { due, ticket },
        }
    }

    /// Point the next probe is measured from
    pub fn anchor(&self) -> Instant {
        self.last_completed.unwrap_or(self.registered_at)
    }

    pub fn holds_ticket(&self, ticket: Ticket) -> bool {
        matches!(self.state, SlotState::Scheduled { ticket: live, .. } if live == ticket)
    }
}

/// Observable scheduling state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Unscheduled,
    Scheduled { due: Instant },
    Ready,
    AwaitingPrevious,
    Probing,
    Deleted,
}

impl From<SlotState> for EndpointState {
    fn from(state: SlotState) -> Self {
        match state {
            SlotState::Scheduled { due, .. } => EndpointState::Scheduled { due },
            SlotState::Ready => EndpointState::Ready,
            SlotState::AwaitingPrevious => EndpointState::AwaitingPrevious,
            SlotState::Probing => EndpointState::Probing,
        }
    }
}
