//! Signaling vocabulary shared by direct and push-to-talk calls.

mod message;
mod signal_type;

pub use message::{CodecError, EncodedSignal, SignalBody, SignalingMessage};
pub use signal_type::{
    EVENT_CALL, EVENT_CALL_DECLINE, EVENT_CLIENT_RTC, EVENT_GROUP_TALK, SignalType,
};
