//! Platform-agnostic core of the call signaling stack.
//!
//! Everything in this crate is runtime independent: identity and session
//! types, the JSON wire codec, relay credential parsing and the capability
//! traits that the runtime crate drives ([`channel::SignalingChannel`],
//! [`media::MediaEngine`], [`net::HttpClient`]).

pub mod channel;
pub mod media;
pub mod net;
pub mod relay;
pub mod signaling;
pub mod types;
