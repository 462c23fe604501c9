//! Push-to-talk group calls.

mod adapter;
mod coordinator;
mod floor;
mod negotiation;
mod roster;

pub use coordinator::{GroupCallCoordinator, GroupCallSnapshot};
pub use floor::FloorState;
pub use negotiation::{NegotiationInfo, NegotiationRole};
pub use roster::Participant;
