//! Connection and subscription bookkeeping over a [`SignalingChannel`].
//!
//! Every transport operation goes through one ordered outbox task, so a
//! description is always on the wire before the candidates gathered for it,
//! a final notice is sent before the channel is left, and a subscription
//! requested after an unsubscribe of the same channel lands after it.

use log::{debug, error, info};
use rtccore::channel::{ChannelError, ChannelListener, SignalingChannel};
use rtccore::signaling::{CodecError, EncodedSignal, SignalingMessage};
use rtccore::types::{ChannelName, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionKind {
    Private,
    Presence,
}

/// Owned by the outbox task.
#[derive(Default)]
struct Bookkeeping {
    connected: bool,
    subscriptions: HashSet<ChannelName>,
}

enum Outgoing {
    Subscribe {
        channel: ChannelName,
        kind: SubscriptionKind,
        listener: Arc<dyn ChannelListener>,
        done: oneshot::Sender<Result<(), ChannelError>>,
    },
    Publish {
        channel: ChannelName,
        signal: EncodedSignal,
    },
    Unsubscribe(ChannelName),
    Close(oneshot::Sender<()>),
}

pub(crate) type PublishErrorHandler = Arc<dyn Fn(ChannelName, ChannelError) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ChannelSession {
    self_id: UserId,
    outbox: mpsc::UnboundedSender<Outgoing>,
}

impl ChannelSession {
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        transport: Arc<dyn SignalingChannel>,
        self_id: UserId,
        on_publish_error: PublishErrorHandler,
    ) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_outbox(
            rx,
            transport,
            self_id.clone(),
            on_publish_error,
        ));

        Self { self_id, outbox }
    }

    pub(crate) fn self_id(&self) -> &UserId {
        &self.self_id
    }

    /// Subscribe unless already subscribed. Connects first if needed.
    pub(crate) async fn subscribe(
        &self,
        name: &ChannelName,
        kind: SubscriptionKind,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        let (done, result) = oneshot::channel();
        self.enqueue(Outgoing::Subscribe {
            channel: name.clone(),
            kind,
            listener,
            done,
        });
        result.await.unwrap_or(Err(ChannelError::NotConnected))
    }

    /// Encode `message` and queue it for `channel`.
    pub(crate) fn publish(
        &self,
        channel: &ChannelName,
        message: &SignalingMessage,
    ) -> Result<(), CodecError> {
        let signal = message.encode()?;
        self.enqueue(Outgoing::Publish {
            channel: channel.clone(),
            signal,
        });
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, channel: &ChannelName) {
        self.enqueue(Outgoing::Unsubscribe(channel.clone()));
    }

    /// Flush queued work, leave every channel and disconnect.
    pub(crate) async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Outgoing::Close(done_tx));
        let _ = done_rx.await;
    }

    fn enqueue(&self, item: Outgoing) {
        if self.outbox.send(item).is_err() {
            debug!("Signaling outbox is closed");
        }
    }
}

async fn subscribe(
    transport: &Arc<dyn SignalingChannel>,
    self_id: &UserId,
    state: &mut Bookkeeping,
    channel: &ChannelName,
    kind: SubscriptionKind,
    listener: Arc<dyn ChannelListener>,
) -> Result<(), ChannelError> {
    if !state.connected {
        transport.connect(self_id).await?;
        state.connected = true;
        info!("Signaling connected as {self_id}");
    }
    if state.subscriptions.contains(channel) {
        return Ok(());
    }

    match kind {
        SubscriptionKind::Private => transport.subscribe_private(channel, listener).await?,
        SubscriptionKind::Presence => transport.subscribe_presence(channel, listener).await?,
    }
    state.subscriptions.insert(channel.clone());
    debug!("Subscribed to {channel}");
    Ok(())
}

async fn drain_outbox(
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    transport: Arc<dyn SignalingChannel>,
    self_id: UserId,
    on_publish_error: PublishErrorHandler,
) {
    let mut state = Bookkeeping::default();
    while let Some(item) = rx.recv().await {
        match item {
            Outgoing::Subscribe {
                channel,
                kind,
                listener,
                done,
            } => {
                let result =
                    subscribe(&transport, &self_id, &mut state, &channel, kind, listener).await;
                let _ = done.send(result);
            }
            Outgoing::Publish { channel, signal } => {
                if let Err(e) = transport
                    .publish(&channel, signal.event, &signal.payload)
                    .await
                {
                    error!("Failed to publish {} on {channel}: {e}", signal.event);
                    on_publish_error(channel, e);
                }
            }
            Outgoing::Unsubscribe(channel) => {
                if state.subscriptions.remove(&channel) {
                    transport.unsubscribe(&channel).await;
                    debug!("Unsubscribed from {channel}");
                }
            }
            Outgoing::Close(done) => {
                for channel in state.subscriptions.drain() {
                    transport.unsubscribe(&channel).await;
                }
                if state.connected {
                    transport.disconnect().await;
                    state.connected = false;
                    info!("Signaling disconnected");
                }
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackHub;

    struct Quiet;

    impl ChannelListener for Quiet {
        fn on_event(&self, _channel: &ChannelName, _event: &str, _payload: &str) {}

        fn on_error(&self, _channel: &ChannelName, _message: String) {}
    }

    fn session(hub: &Arc<LoopbackHub>, user: &str) -> ChannelSession {
        ChannelSession::new(
            hub.client(),
            user.into(),
            Arc::new(|_: ChannelName, _: ChannelError| {}),
        )
    }

    #[tokio::test]
    async fn test_resubscribe_after_pending_unsubscribe() {
        let hub = LoopbackHub::new();
        let room = ChannelName::new("presence-alice-bob");
        let alice = session(&hub, "alice");

        alice
            .subscribe(&room, SubscriptionKind::Presence, Arc::new(Quiet))
            .await
            .unwrap();
        alice.unsubscribe(&room);
        alice
            .subscribe(&room, SubscriptionKind::Presence, Arc::new(Quiet))
            .await
            .unwrap();

        assert_eq!(hub.members(&room), vec![UserId::from("alice")]);
    }

    #[tokio::test]
    async fn test_publish_precedes_unsubscribe() {
        let hub = LoopbackHub::new();
        let own = ChannelName::new("private-alice");
        let alice = session(&hub, "alice");
        alice
            .subscribe(&own, SubscriptionKind::Private, Arc::new(Quiet))
            .await
            .unwrap();

        let message = SignalingMessage::stop_talk("alice".into());
        alice.publish(&own, &message).unwrap();
        alice.unsubscribe(&own);
        alice.close().await;

        assert_eq!(hub.published().len(), 1);
        assert!(hub.members(&own).is_empty());
    }
}
