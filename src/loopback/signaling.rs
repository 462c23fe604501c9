//! In-process signaling hub.
//!
//! Behaves like a hosted presence service: private channels are plain
//! mailboxes, presence channels report their member list on subscribe and
//! announce joins and leaves to the other subscribers. Events are never
//! echoed to the client that published them.

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use rtccore::channel::{ChannelError, ChannelListener, SignalingChannel};
use rtccore::types::{ChannelName, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// One event as it went over the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub channel: ChannelName,
    pub event: String,
    pub payload: String,
    pub from: UserId,
}

#[derive(Clone)]
struct Subscriber {
    client: u64,
    user: UserId,
    listener: Arc<dyn ChannelListener>,
}

#[derive(Default)]
pub struct LoopbackHub {
    channels: DashMap<ChannelName, Vec<Subscriber>>,
    failures: DashMap<ChannelName, String>,
    published: RwLock<Vec<PublishedEvent>>,
    next_client: AtomicU64,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A new, disconnected client of this hub.
    pub fn client(self: &Arc<Self>) -> Arc<LoopbackChannel> {
        Arc::new(LoopbackChannel {
            hub: self.clone(),
            client: self.next_client.fetch_add(1, Ordering::Relaxed),
            user: RwLock::new(None),
        })
    }

    /// Reject every later subscription to `channel` with `reason`.
    pub fn fail_subscriptions(&self, channel: &ChannelName, reason: impl Into<String>) {
        self.failures.insert(channel.clone(), reason.into());
    }

    /// Deliver a transport error to everyone subscribed to `channel`.
    pub fn report_error(&self, channel: &ChannelName, message: impl Into<String>) {
        let message = message.into();
        for subscriber in self.subscribers(channel) {
            subscriber.listener.on_error(channel, message.clone());
        }
    }

    /// Users currently subscribed to `channel`, without duplicates.
    pub fn members(&self, channel: &ChannelName) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .subscribers(channel)
            .into_iter()
            .map(|s| s.user)
            .collect();
        members.sort();
        members.dedup();
        members
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published
            .read()
            .expect("RwLock should not be poisoned")
            .clone()
    }

    // Copied out so listeners run without a shard lock held.
    fn subscribers(&self, channel: &ChannelName) -> Vec<Subscriber> {
        self.channels
            .get(channel)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn is_member(&self, channel: &ChannelName, user: &UserId) -> bool {
        self.subscribers(channel).iter().any(|s| s.user == *user)
    }

    fn add(&self, channel: &ChannelName, subscriber: Subscriber) -> bool {
        let mut entry = self.channels.entry(channel.clone()).or_default();
        if entry.iter().any(|s| s.client == subscriber.client) {
            return false;
        }
        entry.push(subscriber);
        true
    }

    fn remove(&self, channel: &ChannelName, client: u64) -> Option<Subscriber> {
        let mut entry = self.channels.get_mut(channel)?;
        let index = entry.iter().position(|s| s.client == client)?;
        Some(entry.remove(index))
    }

    fn channels_of(&self, client: u64) -> Vec<ChannelName> {
        self.channels
            .iter()
            .filter(|entry| entry.value().iter().any(|s| s.client == client))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn leave(&self, channel: &ChannelName, client: u64) {
        let Some(removed) = self.remove(channel, client) else {
            return;
        };
        debug!("{} left {channel}", removed.user);
        if channel.is_presence() && !self.is_member(channel, &removed.user) {
            for subscriber in self.subscribers(channel) {
                subscriber
                    .listener
                    .on_member_removed(channel, removed.user.clone());
            }
        }
    }
}

/// One client connection to a [`LoopbackHub`].
pub struct LoopbackChannel {
    hub: Arc<LoopbackHub>,
    client: u64,
    user: RwLock<Option<UserId>>,
}

impl LoopbackChannel {
    fn user(&self) -> Result<UserId, ChannelError> {
        self.user
            .read()
            .expect("RwLock should not be poisoned")
            .clone()
            .ok_or(ChannelError::NotConnected)
    }

    fn check_subscription(&self, name: &ChannelName, presence: bool) -> Result<(), ChannelError> {
        if let Some(reason) = self.hub.failures.get(name) {
            return Err(ChannelError::Subscription {
                channel: name.clone(),
                reason: reason.value().clone(),
            });
        }
        let valid = if presence {
            name.is_presence()
        } else {
            name.is_private()
        };
        if !valid {
            return Err(ChannelError::Subscription {
                channel: name.clone(),
                reason: "wrong channel type".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for LoopbackChannel {
    async fn connect(&self, self_id: &UserId) -> Result<(), ChannelError> {
        *self.user.write().expect("RwLock should not be poisoned") = Some(self_id.clone());
        Ok(())
    }

    async fn subscribe_private(
        &self,
        name: &ChannelName,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        let user = self.user()?;
        self.check_subscription(name, false)?;
        self.hub.add(
            name,
            Subscriber {
                client: self.client,
                user,
                listener,
            },
        );
        Ok(())
    }

    async fn subscribe_presence(
        &self,
        name: &ChannelName,
        listener: Arc<dyn ChannelListener>,
    ) -> Result<(), ChannelError> {
        let user = self.user()?;
        self.check_subscription(name, true)?;

        let others = self.hub.subscribers(name);
        let already_member = others.iter().any(|s| s.user == user);
        let added = self.hub.add(
            name,
            Subscriber {
                client: self.client,
                user: user.clone(),
                listener: listener.clone(),
            },
        );
        if !added {
            return Ok(());
        }

        debug!("{user} joined {name}");
        listener.on_members(name, self.hub.members(name));
        if !already_member {
            for subscriber in others {
                subscriber.listener.on_member_added(name, user.clone());
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        channel: &ChannelName,
        event: &str,
        payload: &str,
    ) -> Result<(), ChannelError> {
        let from = self.user()?;
        self.hub
            .published
            .write()
            .expect("RwLock should not be poisoned")
            .push(PublishedEvent {
                channel: channel.clone(),
                event: event.to_string(),
                payload: payload.to_string(),
                from,
            });

        for subscriber in self.hub.subscribers(channel) {
            if subscriber.client != self.client {
                subscriber.listener.on_event(channel, event, payload);
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &ChannelName) {
        self.hub.leave(channel, self.client);
    }

    async fn disconnect(&self) {
        for channel in self.hub.channels_of(self.client) {
            self.hub.leave(&channel, self.client);
        }
        *self.user.write().expect("RwLock should not be poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl ChannelListener for Recorder {
        fn on_event(&self, _channel: &ChannelName, event: &str, payload: &str) {
            self.events.lock().unwrap().push(format!("{event}:{payload}"));
        }

        fn on_members(&self, _channel: &ChannelName, members: Vec<UserId>) {
            let names: Vec<_> = members.iter().map(UserId::as_str).collect();
            self.events
                .lock()
                .unwrap()
                .push(format!("members:{}", names.join(",")));
        }

        fn on_member_added(&self, _channel: &ChannelName, member: UserId) {
            self.events.lock().unwrap().push(format!("added:{member}"));
        }

        fn on_member_removed(&self, _channel: &ChannelName, member: UserId) {
            self.events.lock().unwrap().push(format!("removed:{member}"));
        }

        fn on_error(&self, _channel: &ChannelName, message: String) {
            self.events.lock().unwrap().push(format!("error:{message}"));
        }
    }

    async fn connected(hub: &Arc<LoopbackHub>, user: &str) -> Arc<LoopbackChannel> {
        let client = hub.client();
        client.connect(&user.into()).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_presence_membership_notifications() {
        let hub = LoopbackHub::new();
        let room = ChannelName::new("presence-room");
        let alice = connected(&hub, "alice").await;
        let bob = connected(&hub, "bob").await;
        let alice_events = Arc::new(Recorder::default());
        let bob_events = Arc::new(Recorder::default());

        alice.subscribe_presence(&room, alice_events.clone()).await.unwrap();
        bob.subscribe_presence(&room, bob_events.clone()).await.unwrap();
        assert_eq!(alice_events.take(), vec!["members:alice", "added:bob"]);
        assert_eq!(bob_events.take(), vec!["members:alice,bob"]);

        bob.unsubscribe(&room).await;
        assert_eq!(alice_events.take(), vec!["removed:bob"]);
        assert_eq!(hub.members(&room), vec![UserId::from("alice")]);
    }

    #[tokio::test]
    async fn test_publish_is_not_echoed() {
        let hub = LoopbackHub::new();
        let room = ChannelName::new("presence-room");
        let alice = connected(&hub, "alice").await;
        let bob = connected(&hub, "bob").await;
        let alice_events = Arc::new(Recorder::default());
        let bob_events = Arc::new(Recorder::default());
        alice.subscribe_presence(&room, alice_events.clone()).await.unwrap();
        bob.subscribe_presence(&room, bob_events.clone()).await.unwrap();
        alice_events.take();
        bob_events.take();

        alice.publish(&room, "client-rtc", "{}").await.unwrap();
        assert!(alice_events.take().is_empty());
        assert_eq!(bob_events.take(), vec!["client-rtc:{}"]);
        assert_eq!(hub.published().len(), 1);
        assert_eq!(hub.published()[0].from, UserId::from("alice"));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let hub = LoopbackHub::new();
        let client = hub.client();
        let result = client
            .publish(&ChannelName::new("private-bob"), "rtc-call", "{}")
            .await;
        assert_eq!(result, Err(ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn test_injected_subscription_failure() {
        let hub = LoopbackHub::new();
        let room = ChannelName::new("presence-room");
        hub.fail_subscriptions(&room, "forbidden");
        let alice = connected(&hub, "alice").await;

        let result = alice
            .subscribe_presence(&room, Arc::new(Recorder::default()))
            .await;
        assert!(matches!(result, Err(ChannelError::Subscription { .. })));
        assert!(hub.members(&room).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_channel() {
        let hub = LoopbackHub::new();
        let room = ChannelName::new("presence-room");
        let alice = connected(&hub, "alice").await;
        let bob = connected(&hub, "bob").await;
        let bob_events = Arc::new(Recorder::default());
        alice
            .subscribe_private(&ChannelName::new("private-alice"), Arc::new(Recorder::default()))
            .await
            .unwrap();
        alice
            .subscribe_presence(&room, Arc::new(Recorder::default()))
            .await
            .unwrap();
        bob.subscribe_presence(&room, bob_events.clone()).await.unwrap();
        bob_events.take();

        alice.disconnect().await;
        assert_eq!(bob_events.take(), vec!["removed:alice"]);
        assert!(hub.members(&ChannelName::new("private-alice")).is_empty());
    }
}
