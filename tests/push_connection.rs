use std::sync::Arc;
use std::time::Duration;

use shelf_live::api::SessionStore;
use shelf_live::core::{ConnectionState, MessageType, PushMessage, Topic};
use shelf_live::dispatch::{PushHandler, handler};
use shelf_live::testing::{
    MockServer, MockTransport, NoReconnect, ScriptedTransport, StaticSession,
};
use shelf_live::PushClient;
use sonic_rs::JsonValueTrait;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(1);

async fn open_client(
    session: Option<Arc<dyn SessionStore>>,
) -> (PushClient<MockTransport, NoReconnect>, MockServer) {
    let (transport, server) = MockTransport::channel_pair();
    let client = PushClient::spawn("ws://push.test/ws", transport, NoReconnect, session);
    client.connect().await.expect("connect");
    (client, server)
}

fn labelled(tx: &mpsc::UnboundedSender<&'static str>, label: &'static str) -> PushHandler {
    let tx = tx.clone();
    handler(move |_| {
        let _ = tx.send(label);
    })
}

#[tokio::test]
async fn exact_handlers_run_before_wildcard_in_registration_order() {
    let (client, server) = open_client(None).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .subscribe(MessageType::NewFollower, labelled(&tx, "exact-a"))
        .await
        .unwrap();
    client
        .subscribe(Topic::Wildcard, labelled(&tx, "wildcard"))
        .await
        .unwrap();
    client
        .subscribe(MessageType::NewFollower, labelled(&tx, "exact-b"))
        .await
        .unwrap();
    client
        .subscribe(MessageType::ReviewLike, labelled(&tx, "other-type"))
        .await
        .unwrap();

    server
        .send_text(r#"{"type":"NEW_FOLLOWER","data":"Jane Doe started following you"}"#)
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    assert_eq!(seen, vec!["exact-a", "exact-b", "wildcard"]);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let (client, server) = open_client(None).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let kept = client
        .subscribe(Topic::Wildcard, labelled(&tx, "kept"))
        .await
        .unwrap();
    let dropped = client
        .subscribe(Topic::Wildcard, labelled(&tx, "dropped"))
        .await
        .unwrap();
    assert!(client.unsubscribe(Topic::Wildcard, dropped).await.unwrap());
    assert!(!client.unsubscribe(Topic::Wildcard, dropped).await.unwrap());
    assert_ne!(kept, dropped);

    server
        .send_text(r#"{"type":"REVIEW_LIKE","data":"John liked your review"}"#)
        .unwrap();
    assert_eq!(
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap(),
        Some("kept")
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn panicking_handler_does_not_block_the_others() {
    let (client, server) = open_client(None).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    client
        .subscribe(Topic::Wildcard, handler(|_| panic!("subscriber bug")))
        .await
        .unwrap();
    client
        .subscribe(Topic::Wildcard, labelled(&tx, "survivor"))
        .await
        .unwrap();

    server.send_text(r#"{"type":"NEW_REVIEW","data":"x"}"#).unwrap();
    server.send_text(r#"{"type":"NEW_REVIEW","data":"y"}"#).unwrap();

    for _ in 0..2 {
        assert_eq!(
            tokio::time::timeout(WAIT, rx.recv()).await.unwrap(),
            Some("survivor")
        );
    }
    assert!(client.is_connected());
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_the_connection_stays_open() {
    let (client, server) = open_client(None).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<PushMessage>();
    client
        .subscribe(
            Topic::Wildcard,
            handler(move |message| {
                let _ = tx.send(message.clone());
            }),
        )
        .await
        .unwrap();

    server.send_text("not json at all").unwrap();
    server.send_text(r#"{"data":"no type"}"#).unwrap();
    server.send_text(r#"{"type":"","data":"blank type"}"#).unwrap();
    server
        .send_text(r#"{"type":"UNFOLLOWED","data":"Sam unfollowed you","timestamp":1700000000000}"#)
        .unwrap();

    let message = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.kind, MessageType::Unfollowed);
    assert_eq!(message.timestamp, 1_700_000_000_000);
    assert!(rx.try_recv().is_err());
    assert_eq!(client.current_state().await.unwrap(), ConnectionState::Open);
}

#[tokio::test]
async fn connection_established_triggers_identification() {
    let session: Arc<dyn SessionStore> =
        Arc::new(StaticSession::viewer("42", "Jane Doe", "jdoe@example.com"));
    let (_client, mut server) = open_client(Some(session)).await;

    server
        .send_text(r#"{"type":"CONNECTION_ESTABLISHED","data":"welcome"}"#)
        .unwrap();

    let identify = server.recv_message(WAIT).await.expect("identify frame");
    assert_eq!(identify.kind, MessageType::IdentifyUser);
    assert_eq!(identify.data.as_str(), Some("42"));
}

#[tokio::test]
async fn anonymous_client_does_not_identify() {
    let (_client, mut server) = open_client(None).await;

    server
        .send_text(r#"{"type":"CONNECTION_ESTABLISHED","data":"welcome"}"#)
        .unwrap();

    assert!(
        server
            .recv_outbound_timeout(Duration::from_millis(200))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn follower_count_update_becomes_a_refresh_signal() {
    let (client, server) = open_client(None).await;
    let mut refresh = client.refresh_signals();

    server
        .send_text(
            r#"{"type":"FOLLOWER_COUNT_UPDATE","data":{"userId":"7","followerCount":12,"followingCount":3}}"#,
        )
        .unwrap();

    let update = tokio::time::timeout(WAIT, refresh.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update.user_id.as_deref(), Some("7"));
    assert_eq!(update.follower_count, 12);
    assert_eq!(update.following_count, 3);
}

#[tokio::test]
async fn send_reaches_the_server_only_while_open() {
    let (client, mut server) = open_client(None).await;

    let sent = client
        .send(PushMessage::text(MessageType::Other("PING".into()), "hello", 5))
        .await
        .unwrap();
    assert!(sent);
    let echoed = server.recv_message(WAIT).await.unwrap();
    assert_eq!(echoed.kind.as_str(), "PING");
    assert_eq!(echoed.timestamp, 5);

    client.disconnect().await.unwrap();
    let dropped = client
        .send(PushMessage::text(MessageType::Other("PING".into()), "late", 6))
        .await
        .unwrap();
    assert!(!dropped);
}

#[tokio::test]
async fn disconnect_clears_every_subscriber() {
    let (transport, mut servers) = ScriptedTransport::succeeding();
    let client = PushClient::spawn("ws://push.test/ws", transport, NoReconnect, None);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = client
        .subscribe(Topic::Wildcard, labelled(&tx, "stale"))
        .await
        .unwrap();

    client.connect().await.unwrap();
    let _first = servers.next().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Idle);
    assert!(!client.unsubscribe(Topic::Wildcard, id).await.unwrap());

    client.connect().await.unwrap();
    let second = servers.next().await.unwrap();
    second
        .send_text(r#"{"type":"NEW_FOLLOWER","data":"Jane Doe started following you"}"#)
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let (transport, _servers) = ScriptedTransport::succeeding();
    let transport = transport.with_connect_delay(Duration::from_millis(50));
    let client = PushClient::spawn("ws://push.test/ws", transport.clone(), NoReconnect, None);

    let (a, b) = tokio::join!(client.connect(), client.connect());
    a.unwrap();
    b.unwrap();
    client
        .state_changes()
        .wait_for(|state| state.is_open())
        .await
        .unwrap();
    client.connect().await.unwrap();

    assert_eq!(transport.attempt_count(), 1);
}

#[tokio::test]
async fn remote_close_without_retries_leaves_the_client_closed() {
    let (client, server) = open_client(None).await;

    server.close(1001, "going away").unwrap();

    let state = *client
        .state_changes()
        .wait_for(|state| !state.is_open())
        .await
        .unwrap();
    assert_eq!(state, ConnectionState::Closed { attempt: 0 });
}

#[tokio::test]
async fn shutdown_stops_the_actor() {
    let (client, _server) = open_client(None).await;
    client.shutdown().await;
    assert!(client.current_state().await.is_err());
}
