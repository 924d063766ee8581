//! End-to-end session scenarios over the mock transport and REST doubles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use donorlink_core::{
    names, CacheKey, ConnectionState, Event, GamificationState, Identity, ResourceType, Result,
    Role, Session,
};
use donorlink_realtime::mock::{InboxCall, MockConnector, MockFetcher, MockInboxApi, MockProgressApi};
use donorlink_realtime::{
    Celebration, Collaborators, Connector, Handshake, Link, RealtimeConfig, ReconnectPolicy,
    SessionContext,
};

struct Doubles {
    connector: MockConnector,
    fetcher: MockFetcher,
    inbox_api: MockInboxApi,
}

fn start(session: Option<Session>, fetcher: MockFetcher) -> (SessionContext, Doubles) {
    let doubles = Doubles {
        connector: MockConnector::new(),
        fetcher,
        inbox_api: MockInboxApi::new(),
    };
    let config = RealtimeConfig::default()
        .with_reconnect(
            ReconnectPolicy::default()
                .with_initial_delay(Duration::from_millis(100))
                .without_jitter(),
        )
        .with_celebration_duration(Duration::from_secs(4));
    let context = SessionContext::start(
        session,
        config,
        Collaborators {
            connector: Arc::new(doubles.connector.clone()),
            fetcher: Arc::new(doubles.fetcher.clone()),
            inbox_api: Arc::new(doubles.inbox_api.clone()),
            progress_api: Some(Arc::new(MockProgressApi::new(GamificationState {
                points: 120,
                level: 2,
                ..Default::default()
            }))),
        },
    );
    (context, doubles)
}

async fn connected(context: &SessionContext) {
    context
        .state_changes()
        .wait_for(|s| s.is_connected())
        .await
        .unwrap();
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn test_pushed_notifications_then_read_tracking() {
    let donor = Session::new(Identity::new("u1", Role::Donor), "token");
    let (mut context, doubles) = start(Some(donor), MockFetcher::new());
    connected(&context).await;

    for (id, message) in [("n1", "first"), ("n2", "second"), ("n3", "third")] {
        doubles
            .connector
            .push(names::NOTIFICATION_NEW, json!({"id": id, "message": message}));
    }
    settle().await;
    assert_eq!(context.inbox().unread_count(), 3);
    assert_eq!(context.toasts().len(), 3);

    context.inbox().mark_read("n2").await.unwrap();
    assert_eq!(context.inbox().unread_count(), 2);
    assert!(context.inbox().get("n2").unwrap().is_read);

    // Same id again is a no-op.
    doubles
        .connector
        .push(names::NOTIFICATION_NEW, json!({"id": "n1"}));
    settle().await;
    assert_eq!(context.inbox().len(), 3);

    context.inbox().mark_all_read().await.unwrap();
    assert_eq!(context.inbox().unread_count(), 0);
    assert_eq!(
        doubles.inbox_api.calls(),
        vec![InboxCall::MarkRead("n2".into()), InboxCall::MarkAllRead]
    );
    context.shutdown().await;
}

#[tokio::test]
async fn test_empty_token_never_attempts_connection() {
    let anonymous = Session::new(Identity::new("u1", Role::Donor), "");
    let (mut context, doubles) = start(Some(anonymous), MockFetcher::new());
    settle().await;

    assert!(context.connection().is_none());
    assert_eq!(context.connection_state(), ConnectionState::Disconnected);
    assert_eq!(doubles.connector.connect_attempts(), 0);
    context.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_invalidations_collapses_into_one_refetch() {
    let fetcher = MockFetcher::new().with_latency(Duration::from_millis(200));
    let donor = Session::new(Identity::new("u1", Role::Donor), "token");
    let (mut context, doubles) = start(Some(donor), fetcher);
    let events = CacheKey::collection(ResourceType::Events);

    context.cache().get(&events).await.unwrap();
    assert_eq!(doubles.fetcher.calls(&events), 1);
    connected(&context).await;

    doubles.connector.push(names::EVENT_CREATED, json!({"eventId": "e1"}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(context.cache().is_stale(&events));
    doubles.connector.push(names::EVENT_CREATED, json!({"eventId": "e2"}));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(doubles.fetcher.calls(&events), 2);
    assert!(!context.cache().is_stale(&events));
    assert_eq!(context.cache().stats().collapsed, 1);

    // Each event still produced its own toast.
    assert_eq!(context.toasts().len(), 2);
    context.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_level_up_celebration_then_idle() {
    let volunteer = Session::new(Identity::new("v1", Role::Volunteer), "token");
    let (mut context, doubles) = start(Some(volunteer), MockFetcher::new());
    assert!(context.load_progress().await.unwrap());
    assert_eq!(context.progress().level(), 2);
    connected(&context).await;

    doubles.connector.push(
        names::POINTS_EARNED,
        json!({"totalPoints": 150, "levelUp": true, "newLevel": 3}),
    );
    settle().await;
    assert_eq!(context.progress().points(), 150);
    assert_eq!(context.progress().level(), 3);
    assert_eq!(
        context.progress().celebration(),
        Celebration::Celebrating { level: 3 }
    );

    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(context.progress().celebration(), Celebration::Idle);
    assert_eq!(context.progress().level(), 3);
    context.shutdown().await;
}

#[tokio::test]
async fn test_organization_room_only_for_staff_roles() {
    let staff = Session::new(
        Identity::new("s1", Role::NgoStaff).with_organization("ngo-1"),
        "token",
    );
    let (mut context, doubles) = start(Some(staff), MockFetcher::new());
    doubles.connector.wait_for_commands(2).await;
    let rooms: Vec<_> = doubles
        .connector
        .sent_commands()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(rooms, vec![names::JOIN_PERSONAL, names::JOIN_ORGANIZATION]);
    context.shutdown().await;

    let donor = Session::new(
        Identity::new("d1", Role::Donor).with_organization("ngo-1"),
        "token",
    );
    let (mut context, doubles) = start(Some(donor), MockFetcher::new());
    connected(&context).await;
    doubles.connector.wait_for_commands(1).await;
    settle().await;
    let commands = doubles.connector.sent_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name, names::JOIN_PERSONAL);
    context.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_malformed_events_are_harmless() {
    let donor = Session::new(Identity::new("u1", Role::Donor), "token");
    let (mut context, doubles) = start(Some(donor), MockFetcher::new());
    connected(&context).await;

    doubles.connector.push("weather:changed", json!({"sky": "grey"}));
    doubles.connector.push(names::POINTS_EARNED, json!({"levelUp": true}));
    doubles.connector.push(names::BADGE_EARNED, json!({}));
    settle().await;

    assert_eq!(context.progress().points(), 0);
    assert!(context.progress().badges().is_empty());
    assert_eq!(context.connection_state(), ConnectionState::Connected);

    doubles
        .connector
        .push(names::DONATION_DELIVERED, json!({"donationId": "d9"}));
    settle().await;
    assert_eq!(
        context.toasts().active().last().unwrap().text,
        "Donation delivered"
    );
    context.shutdown().await;
}

/// Server that pushes a notification the instant the handshake completes.
struct EagerConnector;

#[async_trait]
impl Connector for EagerConnector {
    async fn connect(&self, _handshake: &Handshake) -> Result<Link> {
        let (outbound, mut commands) = mpsc::channel(8);
        tokio::spawn(async move { while commands.recv().await.is_some() {} });
        let first = Event::new(names::NOTIFICATION_NEW, json!({"id": "first"}));
        let inbound = futures::stream::iter(vec![Ok(first)])
            .chain(futures::stream::pending())
            .boxed();
        Ok(Link { outbound, inbound })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_event_after_handshake_reaches_router() {
    for round in 0..100 {
        let inbox_api = MockInboxApi::new();
        let mut context = SessionContext::start(
            Some(Session::new(Identity::new("u1", Role::Donor), "token")),
            RealtimeConfig::default(),
            Collaborators {
                connector: Arc::new(EagerConnector),
                fetcher: Arc::new(MockFetcher::new()),
                inbox_api: Arc::new(inbox_api),
                progress_api: None,
            },
        );

        let mut changes = context.inbox().changes();
        let delivered = tokio::time::timeout(
            Duration::from_secs(2),
            changes.wait_for(|_| context.inbox().get("first").is_some()),
        )
        .await;
        assert!(delivered.is_ok(), "first event lost in round {round}");
        assert_eq!(context.inbox().unread_count(), 1);
        context.shutdown().await;
    }
}
