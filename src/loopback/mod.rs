//! In-process signaling and media doubles.
//!
//! Used by the `call_sim` binary and the integration tests to run several
//! coordinators against each other without a network.

pub mod media;
pub mod signaling;

pub use media::{MediaOperation, ScriptedConnection, ScriptedMediaEngine};
pub use signaling::{LoopbackChannel, LoopbackHub, PublishedEvent};
