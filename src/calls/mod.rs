//! Call orchestration over a pub/sub signaling channel.
//!
//! # Architecture
//!
//! - [`DirectCallCoordinator`]: one-to-one calls driven by the
//!   [`DirectCallState`] machine
//! - [`GroupCallCoordinator`]: push-to-talk sessions with a mesh of
//!   session-scoped negotiations and local [`FloorState`] arbitration
//! - [`CallEvent`] / snapshots: read-only fan-out of coordinator state
//!
//! Both coordinators serialize all work on a single worker task. Async media
//! and transport steps run in spawned tasks and report back tagged with the
//! attempt (direct) or session id (group) they were started for, so results
//! of superseded attempts are dropped.
//!
//! # Signaling
//!
//! A caller rings the callee through the callee's private channel, then both
//! meet on `presence-<caller>-<callee>`; the caller offers once the callee
//! shows up there. Push-to-talk members share one presence channel and the
//! speaker offers to every other member.

mod candidates;
mod channel_session;
mod direct;
mod error;
mod events;
mod group;
mod sdp;
mod worker;

pub use direct::{
    CallSession, DirectCallCoordinator, DirectCallSnapshot, DirectCallState, DirectTransition,
    InvalidTransition,
};
pub use error::CallError;
pub use events::{CallEvent, CallLogEntry, LogKind};
pub use group::{
    FloorState, GroupCallCoordinator, GroupCallSnapshot, NegotiationInfo, NegotiationRole,
    Participant,
};
