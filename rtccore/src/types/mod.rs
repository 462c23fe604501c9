pub mod call;
pub mod session;
pub mod user;

pub use call::{CallDirection, CallKind};
pub use session::SessionId;
pub use user::{ChannelName, UserId};
