//! Publish/subscribe signaling transport capability.
//!
//! Modeled on hosted presence services: every client owns a private mailbox
//! channel, and call participants meet on presence channels that report
//! membership changes to all subscribers.

use crate::types::{ChannelName, UserId};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("not connected")]
    NotConnected,

    #[error("subscription to {channel} failed: {reason}")]
    Subscription { channel: ChannelName, reason: String },

    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: ChannelName, reason: String },
}

/// Receives everything delivered on one subscription.
///
/// Callbacks run on transport threads and must return quickly.
pub trait ChannelListener: Send + Sync {
    fn on_event(&self, channel: &ChannelName, event: &str, payload: &str);

    /// Current members, delivered once after a presence subscription succeeds.
    fn on_members(&self, _channel: &ChannelName, _members: Vec<UserId>) {}

    fn on_member_added(&self, _channel: &ChannelName, _member: UserId) {}

    fn on_member_removed(&self, _channel: &ChannelName, _member: UserId) {}

    /// Authentication or subscription failure reported after subscribing.
    fn on_error(&self, channel: &ChannelName, message: String);
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Connect as `self_id`. Resolves once the transport is ready.
    async fn connect(&self, self_id: &UserId) -> Result<(), ChannelError>;

    async fn subscribe_private(
        &self,
        name: &ChannelName,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError>;

    async fn subscribe_presence(
        &self,
        name: &ChannelName,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError>;

    async fn publish(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: &str,
    ) -> Result<(), ChannelError>;

    async fn unsubscribe(&self, channel: &ChannelName);

    async fn disconnect(&self);
}
