// Re-export core modules
pub use rtccore::{channel, media, net, signaling};

pub mod types {
    pub use rtccore::types::*;
}

// Runtime modules
pub mod calls;
pub mod config;
pub mod loopback;
pub mod relay;

pub use calls::{
    CallError, CallEvent, CallLogEntry, DirectCallCoordinator, DirectCallSnapshot,
    DirectCallState, GroupCallCoordinator, GroupCallSnapshot, FloorState,
};
pub use config::{CallConfig, ConfigError, RelayConfig};
