//! Call-related error types.

use rtccore::channel::ChannelError;
use rtccore::media::MediaError;
use rtccore::relay::RelayError;
use rtccore::signaling::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("signaling error: {0}")]
    Channel(#[from] ChannelError),

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("coordinator has been shut down")]
    Disposed,
}
