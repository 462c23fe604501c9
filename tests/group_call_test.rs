use std::sync::Arc;
use std::time::Duration;

use rtc_mesh::calls::{CallEvent, GroupCallSnapshot, LogKind, NegotiationRole};
use rtc_mesh::channel::{ChannelListener, SignalingChannel};
use rtc_mesh::loopback::{LoopbackChannel, LoopbackHub, MediaOperation, ScriptedMediaEngine};
use rtc_mesh::media::{IceCandidate, SessionDescription};
use rtc_mesh::relay::StaticRelaySource;
use rtc_mesh::signaling::{SignalType, SignalingMessage};
use rtc_mesh::types::{ChannelName, SessionId, UserId};
use rtc_mesh::{CallConfig, FloorState, GroupCallCoordinator};
use tokio::sync::broadcast;

const ROOM: &str = "presence-ptt-room";

struct Member {
    id: UserId,
    coordinator: GroupCallCoordinator,
    media: Arc<ScriptedMediaEngine>,
}

fn member(hub: &Arc<LoopbackHub>, id: &str) -> Member {
    let media = ScriptedMediaEngine::new(id);
    let coordinator = GroupCallCoordinator::start(
        CallConfig::new(id),
        hub.client(),
        media.clone(),
        Arc::new(StaticRelaySource::new(Vec::new())),
    );
    coordinator.join(ChannelName::new(ROOM)).unwrap();
    Member {
        id: id.into(),
        coordinator,
        media,
    }
}

async fn wait_for(
    coordinator: &GroupCallCoordinator,
    done: impl Fn(&GroupCallSnapshot) -> bool,
) -> GroupCallSnapshot {
    let mut rx = coordinator.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if done(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("coordinator stopped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

/// Join everyone and wait until each sees all the others.
async fn room(hub: &Arc<LoopbackHub>, ids: &[&str]) -> Vec<Member> {
    let mut members = Vec::new();
    for id in ids {
        members.push(member(hub, id));
        wait_for(&members.last().unwrap().coordinator, |s| s.joined).await;
    }
    for m in &members {
        wait_for(&m.coordinator, |s| s.participants.len() == ids.len() - 1).await;
    }
    members
}

fn answered_to(snapshot: &GroupCallSnapshot, peer: &str) -> Option<SessionId> {
    snapshot
        .negotiations
        .iter()
        .find(|n| n.peer.as_str() == peer && n.answered)
        .map(|n| n.session_id.clone())
}

fn published_by(hub: &LoopbackHub, user: &str) -> Vec<SignalingMessage> {
    hub.published()
        .into_iter()
        .filter(|e| e.from.as_str() == user)
        .map(|e| SignalingMessage::decode(&e.event, &e.payload).unwrap())
        .collect()
}

async fn next_notice(events: &mut broadcast::Receiver<CallEvent<FloorState>>) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(CallEvent::Notice(message)) | Ok(CallEvent::Finished { message }) => {
                    return message;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a notice")
}

#[tokio::test]
async fn test_speaker_offers_each_member_and_listener_leaves_quietly() {
    let _ = env_logger::builder().is_test(true).try_init();

    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob", "carol"]).await;
    let (alice, bob, carol) = (&members[0], &members[1], &members[2]);

    alice.coordinator.start_talking().unwrap();
    let speaking = wait_for(&alice.coordinator, |s| {
        answered_to(s, "bob").is_some() && answered_to(s, "carol").is_some()
    })
    .await;
    assert_eq!(speaking.floor, FloorState::Speaking);
    assert!(
        speaking
            .negotiations
            .iter()
            .all(|n| n.role == NegotiationRole::Offerer)
    );
    let to_bob = answered_to(&speaking, "bob").unwrap();
    let to_carol = answered_to(&speaking, "carol").unwrap();
    assert_ne!(to_bob, to_carol);

    // Listeners answer under the id they were offered and see alice talking
    let listening = wait_for(&bob.coordinator, |s| answered_to(s, "alice").is_some()).await;
    assert_eq!(answered_to(&listening, "alice"), Some(to_bob.clone()));
    assert_eq!(
        listening.floor,
        FloorState::Listening {
            speaker: alice.id.clone()
        }
    );
    assert!(
        listening
            .participants
            .iter()
            .any(|p| p.id == alice.id && p.is_talking)
    );
    assert!(!bob.media.connections()[0].config().send_audio);
    assert!(alice.media.connections()[0].config().send_audio);

    carol.coordinator.leave().await;
    let after = wait_for(&alice.coordinator, |s| s.participants.len() == 1).await;
    assert_eq!(after.negotiations.len(), 1);
    assert_eq!(answered_to(&after, "bob"), Some(to_bob));
    assert_eq!(after.floor, FloorState::Speaking);
    assert!(after.log.iter().all(|e| e.kind != LogKind::Error));

    tokio::time::timeout(Duration::from_secs(5), async {
        while alice.media.open_connections() != 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("carol's connection was not closed");
}

#[tokio::test]
async fn test_stale_answer_from_previous_turn_is_discarded() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob"]).await;
    let (alice, bob) = (&members[0], &members[1]);

    alice.coordinator.start_talking().unwrap();
    let first = wait_for(&alice.coordinator, |s| answered_to(s, "bob").is_some()).await;
    let s1 = answered_to(&first, "bob").unwrap();

    alice.coordinator.stop_talking().unwrap();
    wait_for(&bob.coordinator, |s| s.floor == FloorState::Idle).await;
    alice.coordinator.start_talking().unwrap();
    let second = wait_for(&alice.coordinator, |s| {
        answered_to(s, "bob").is_some_and(|id| id != s1)
    })
    .await;
    let s2 = answered_to(&second, "bob").unwrap();

    // Replay an answer tagged with the first turn's id
    let rogue: Arc<LoopbackChannel> = hub.client();
    rogue.connect(&"bob".into()).await.unwrap();
    let stale = SignalingMessage::answer(
        "bob".into(),
        "alice".into(),
        s1.clone(),
        SessionDescription::answer("v=0\r\ns=stale\r\n"),
    )
    .encode()
    .unwrap();
    rogue
        .publish(&ChannelName::new(ROOM), stale.event, &stale.payload)
        .await
        .unwrap();

    // A turn change afterwards proves the worker got past the stale answer
    alice.coordinator.stop_talking().unwrap();
    let idle = wait_for(&alice.coordinator, |s| s.floor == FloorState::Idle).await;
    assert!(idle.negotiations.is_empty());
    assert!(idle.log.iter().all(|e| e.kind != LogKind::Error));
    assert_ne!(s1, s2);

    for connection in alice.media.connections() {
        let remote = connection.remote_description().unwrap();
        assert!(!remote.sdp.contains("stale"));
    }
    assert_eq!(alice.media.connections().len(), 2);
}

struct Silent;

impl ChannelListener for Silent {
    fn on_event(&self, _channel: &ChannelName, _event: &str, _payload: &str) {}

    fn on_error(&self, _channel: &ChannelName, _message: String) {}
}

async fn send(client: &LoopbackChannel, message: SignalingMessage) {
    let signal = message.encode().unwrap();
    client
        .publish(&ChannelName::new(ROOM), signal.event, &signal.payload)
        .await
        .unwrap();
}

/// Session ids of the offers `from` has sent so far, oldest first.
fn offers_from(hub: &LoopbackHub, from: &str) -> Vec<SessionId> {
    published_by(hub, from)
        .into_iter()
        .filter(|m| m.signal_type() == SignalType::Offer)
        .filter_map(|m| m.session_id)
        .collect()
}

async fn offered(hub: &LoopbackHub, from: &str, count: usize) -> Vec<SessionId> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let offers = offers_from(hub, from);
            if offers.len() >= count {
                return offers;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("offer was not sent")
}

#[tokio::test]
async fn test_mismatched_session_leaves_pending_offer_untouched() {
    let hub = LoopbackHub::new();
    let alice = member(&hub, "alice");
    wait_for(&alice.coordinator, |s| s.joined).await;

    // Bob is driven by hand, so the second turn stays unanswered
    let bob = hub.client();
    bob.connect(&"bob".into()).await.unwrap();
    bob.subscribe_presence(&ChannelName::new(ROOM), Arc::new(Silent))
        .await
        .unwrap();
    wait_for(&alice.coordinator, |s| s.participants.len() == 1).await;

    alice.coordinator.start_talking().unwrap();
    let s1 = offered(&hub, "alice", 1).await[0].clone();
    alice.coordinator.stop_talking().unwrap();
    alice.coordinator.start_talking().unwrap();
    let s2 = offered(&hub, "alice", 2).await[1].clone();
    assert_ne!(s1, s2);

    send(
        &bob,
        SignalingMessage::answer(
            "bob".into(),
            "alice".into(),
            s1.clone(),
            SessionDescription::answer("v=0 stale"),
        ),
    )
    .await;
    send(
        &bob,
        SignalingMessage::ice_candidate(
            "bob".into(),
            "alice".into(),
            s1,
            IceCandidate::new("candidate:stale"),
        ),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pending = alice.coordinator.snapshot();
    assert_eq!(pending.negotiations.len(), 1);
    assert_eq!(pending.negotiations[0].session_id, s2);
    assert!(!pending.negotiations[0].answered);
    let connection = alice.media.connections()[1].clone();
    assert!(connection.remote_description().is_none());

    // The same answer twice: the second copy must not reach the connection
    for _ in 0..2 {
        send(
            &bob,
            SignalingMessage::answer(
                "bob".into(),
                "alice".into(),
                s2.clone(),
                SessionDescription::answer("v=0 current"),
            ),
        )
        .await;
    }
    send(
        &bob,
        SignalingMessage::ice_candidate(
            "bob".into(),
            "alice".into(),
            s2.clone(),
            IceCandidate::new("candidate:current"),
        ),
    )
    .await;

    wait_for(&alice.coordinator, |s| answered_to(s, "bob") == Some(s2.clone())).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while connection.applied_candidates().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("candidate was not applied");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        connection.remote_description().map(|d| d.sdp),
        Some("v=0 current".to_string())
    );
    assert_eq!(
        connection.applied_candidates(),
        vec![IceCandidate::new("candidate:current")]
    );
    let speaker = alice.coordinator.snapshot();
    assert!(speaker.log.iter().all(|e| e.kind != LogKind::Error));
    assert_eq!(answered_to(&speaker, "bob"), Some(s2));
    assert!(alice.media.connections()[0].is_closed());
}

#[tokio::test]
async fn test_stop_talk_from_peer_drops_its_negotiation() {
    let hub = LoopbackHub::new();
    let alice = member(&hub, "alice");
    wait_for(&alice.coordinator, |s| s.joined).await;
    let bob = hub.client();
    bob.connect(&"bob".into()).await.unwrap();
    bob.subscribe_presence(&ChannelName::new(ROOM), Arc::new(Silent))
        .await
        .unwrap();
    wait_for(&alice.coordinator, |s| s.participants.len() == 1).await;

    alice.coordinator.start_talking().unwrap();
    offered(&hub, "alice", 1).await;
    send(&bob, SignalingMessage::stop_talk("bob".into())).await;

    let after = wait_for(&alice.coordinator, |s| s.negotiations.is_empty()).await;
    assert_eq!(after.floor, FloorState::Speaking);
    tokio::time::timeout(Duration::from_secs(5), async {
        while alice.media.open_connections() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("negotiation with bob was not closed");
}

#[tokio::test]
async fn test_stop_talking_without_floor_is_noop() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob"]).await;
    let alice = &members[0];

    alice.coordinator.stop_talking().unwrap();
    alice.coordinator.stop_talking().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(alice.coordinator.snapshot().floor, FloorState::Idle);
    assert!(published_by(&hub, "alice").is_empty());
}

#[tokio::test]
async fn test_talking_alone_reports_no_one_here() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice"]).await;
    let alice = &members[0];

    let mut events = alice.coordinator.subscribe();
    alice.coordinator.start_talking().unwrap();
    assert_eq!(next_notice(&mut events).await, "No one here");

    assert_eq!(alice.coordinator.snapshot().floor, FloorState::Idle);
    assert!(hub.published().is_empty());
    assert!(alice.media.connections().is_empty());
}

#[tokio::test]
async fn test_stop_talking_closes_turn() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob", "carol"]).await;
    let (alice, bob) = (&members[0], &members[1]);

    alice.coordinator.start_talking().unwrap();
    wait_for(&alice.coordinator, |s| {
        answered_to(s, "bob").is_some() && answered_to(s, "carol").is_some()
    })
    .await;

    alice.coordinator.stop_talking().unwrap();
    let listener = wait_for(&bob.coordinator, |s| {
        s.floor == FloorState::Idle && s.negotiations.is_empty()
    })
    .await;
    assert!(listener.participants.iter().all(|p| !p.is_talking));

    let speaker = wait_for(&alice.coordinator, |s| s.negotiations.is_empty()).await;
    assert_eq!(speaker.floor, FloorState::Idle);
    let stops = published_by(&hub, "alice")
        .iter()
        .filter(|m| m.signal_type() == SignalType::StopTalk)
        .count();
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn test_late_joiner_gets_offer_while_speaking() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob"]).await;
    let alice = &members[0];

    alice.coordinator.start_talking().unwrap();
    wait_for(&alice.coordinator, |s| answered_to(s, "bob").is_some()).await;

    let dave = member(&hub, "dave");
    let speaking = wait_for(&alice.coordinator, |s| answered_to(s, "dave").is_some()).await;
    assert_eq!(speaking.negotiations.len(), 2);

    let joiner = wait_for(&dave.coordinator, |s| answered_to(s, "alice").is_some()).await;
    assert_eq!(joiner.negotiations[0].role, NegotiationRole::Answerer);
}

#[tokio::test]
async fn test_failed_answer_discards_only_that_negotiation() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob", "carol"]).await;
    let (alice, bob, carol) = (&members[0], &members[1], &members[2]);
    bob.media.fail_next(MediaOperation::CreateAnswer);

    alice.coordinator.start_talking().unwrap();
    wait_for(&alice.coordinator, |s| answered_to(s, "carol").is_some()).await;
    wait_for(&carol.coordinator, |s| answered_to(s, "alice").is_some()).await;

    let failed = wait_for(&bob.coordinator, |s| {
        s.log.iter().any(|e| e.kind == LogKind::Error)
    })
    .await;
    assert!(failed.negotiations.is_empty());
    assert!(failed.joined);

    let speaker = alice.coordinator.snapshot();
    assert_eq!(speaker.floor, FloorState::Speaking);
    assert!(answered_to(&speaker, "bob").is_none());
}

#[tokio::test]
async fn test_transport_error_ends_session() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob"]).await;
    let (alice, bob) = (&members[0], &members[1]);

    alice.coordinator.start_talking().unwrap();
    wait_for(&alice.coordinator, |s| answered_to(s, "bob").is_some()).await;

    let mut events = alice.coordinator.subscribe();
    hub.report_error(&ChannelName::new(ROOM), "auth failed");
    assert_eq!(next_notice(&mut events).await, "auth failed");

    let ended = wait_for(&alice.coordinator, |s| s.channel.is_none()).await;
    assert!(!ended.joined);
    assert!(ended.negotiations.is_empty());
    assert_eq!(ended.floor, FloorState::Idle);
    wait_for(&bob.coordinator, |s| s.channel.is_none()).await;
}

#[tokio::test]
async fn test_join_failure_is_reported() {
    let hub = LoopbackHub::new();
    hub.fail_subscriptions(&ChannelName::new(ROOM), "forbidden");

    let coordinator = GroupCallCoordinator::start(
        CallConfig::new("alice"),
        hub.client(),
        ScriptedMediaEngine::new("alice"),
        Arc::new(StaticRelaySource::new(Vec::new())),
    );
    let mut events = coordinator.subscribe();
    coordinator.join(ChannelName::new(ROOM)).unwrap();

    assert_eq!(
        next_notice(&mut events).await,
        format!("Failed to join {ROOM}")
    );
    let snapshot = wait_for(&coordinator, |s| s.channel.is_none()).await;
    assert!(!snapshot.joined);
}

#[tokio::test]
async fn test_leave_disposes_coordinator() {
    let hub = LoopbackHub::new();
    let members = room(&hub, &["alice", "bob"]).await;
    let (alice, bob) = (&members[0], &members[1]);

    alice.coordinator.start_talking().unwrap();
    wait_for(&alice.coordinator, |s| answered_to(s, "bob").is_some()).await;

    alice.coordinator.leave().await;
    assert!(alice.coordinator.start_talking().is_err());
    assert!(
        published_by(&hub, "alice")
            .iter()
            .any(|m| m.signal_type() == SignalType::StopTalk)
    );

    let listener = wait_for(&bob.coordinator, |s| s.participants.is_empty()).await;
    assert_eq!(listener.floor, FloorState::Idle);
    assert!(listener.negotiations.is_empty());
    assert_eq!(hub.members(&ChannelName::new(ROOM)), vec![bob.id.clone()]);
}
