//! Outbound notifications of the call coordinators.
//!
//! Two channels per coordinator: a `watch` channel carrying the latest
//! immutable snapshot, and a `broadcast` bus carrying [`CallEvent`]s.

use chrono::{DateTime, Utc};
use rtccore::media::RemoteTrack;
use rtccore::types::UserId;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogKind {
    /// Signaling received from a peer.
    Inbound,
    /// Signaling sent to a peer.
    Outbound,
    Internal,
    Error,
}

/// One entry of the per-coordinator call log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallLogEntry {
    pub time: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
}

impl CallLogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallEvent<S> {
    Log(CallLogEntry),
    StateChanged(S),
    /// Transient user-facing message that does not end the call.
    Notice(String),
    RemoteTrack { peer: UserId, track: RemoteTrack },
    /// The call (or group session) is over. `message` is user-facing.
    Finished { message: String },
}

/// Owned by a coordinator worker; fans state out to subscribers.
pub(crate) struct EventFanout<S, Snap> {
    events: broadcast::Sender<CallEvent<S>>,
    snapshots: watch::Sender<Snap>,
    log: VecDeque<CallLogEntry>,
    log_limit: usize,
}

impl<S: Clone, Snap> EventFanout<S, Snap> {
    pub(crate) fn new(capacity: usize, log_limit: usize, initial: Snap) -> Self {
        Self {
            events: broadcast::channel(capacity.max(1)).0,
            snapshots: watch::channel(initial).0,
            log: VecDeque::new(),
            log_limit,
        }
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CallEvent<S>> {
        self.events.clone()
    }

    pub(crate) fn snapshot_receiver(&self) -> watch::Receiver<Snap> {
        self.snapshots.subscribe()
    }

    pub(crate) fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        let entry = CallLogEntry::new(kind, message);
        if self.log.len() >= self.log_limit {
            self.log.pop_front();
        }
        self.log.push_back(entry.clone());
        self.emit(CallEvent::Log(entry));
    }

    pub(crate) fn log_entries(&self) -> Vec<CallLogEntry> {
        self.log.iter().cloned().collect()
    }

    // Sending fails only when nobody is subscribed.
    pub(crate) fn emit(&self, event: CallEvent<S>) {
        let _ = self.events.send(event);
    }

    pub(crate) fn publish(&self, snapshot: Snap) {
        self.snapshots.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let mut fanout: EventFanout<(), ()> = EventFanout::new(8, 3, ());
        for n in 0..5 {
            fanout.log(LogKind::Internal, format!("entry {n}"));
        }
        let messages: Vec<_> = fanout
            .log_entries()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[tokio::test]
    async fn test_subscribers_see_events_and_snapshots() {
        let fanout: EventFanout<u8, u8> = EventFanout::new(8, 10, 0);
        let mut events = fanout.event_sender().subscribe();
        let snapshots = fanout.snapshot_receiver();

        fanout.emit(CallEvent::StateChanged(7));
        fanout.publish(9);

        assert!(matches!(events.recv().await, Ok(CallEvent::StateChanged(7))));
        assert_eq!(*snapshots.borrow(), 9);
    }
}
