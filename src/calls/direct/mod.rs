//! One-to-one calls.

mod adapter;
mod coordinator;
mod state;

pub use coordinator::{DirectCallCoordinator, DirectCallSnapshot};
pub use state::{CallSession, DirectCallState, DirectTransition, InvalidTransition};
