use std::sync::Arc;
use std::time::Duration;

use shelf_live::PushClient;
use shelf_live::api::SessionStore;
use shelf_live::core::{ConnectionState, LinearBackoffReconnect};
use shelf_live::testing::{ScriptedTransport, StaticSession};
use tokio::time::Instant;

const BASE: Duration = Duration::from_secs(3);
const MAX_ATTEMPTS: u32 = 5;

fn client(transport: &ScriptedTransport) -> PushClient<ScriptedTransport, LinearBackoffReconnect> {
    PushClient::spawn(
        "ws://push.test/ws",
        transport.clone(),
        LinearBackoffReconnect::new(BASE, MAX_ATTEMPTS),
        None,
    )
}

fn assert_gap(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected a gap of {expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_connects_back_off_linearly_until_exhausted() {
    let (transport, _servers) = ScriptedTransport::failing(usize::MAX);
    let client = client(&transport);

    assert!(client.connect().await.is_err());
    tokio::time::sleep(Duration::from_secs(120)).await;

    // One explicit attempt plus MAX_ATTEMPTS retries.
    assert_eq!(transport.attempt_count(), MAX_ATTEMPTS as usize + 1);
    let gaps = transport.attempt_gaps();
    for (i, gap) in gaps.iter().enumerate() {
        assert_gap(*gap, BASE * (i as u32 + 1));
    }
    assert_eq!(
        client.current_state().await.unwrap(),
        ConnectionState::Closed {
            attempt: MAX_ATTEMPTS
        }
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.attempt_count(), MAX_ATTEMPTS as usize + 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_exhaustion_starts_over() {
    let (transport, mut servers) = ScriptedTransport::failing(usize::MAX);
    let client = client(&transport);

    assert!(client.connect().await.is_err());
    tokio::time::sleep(Duration::from_secs(120)).await;
    let exhausted_at = transport.attempt_count();

    transport.fail_next(0);
    client.connect().await.unwrap();
    assert_eq!(transport.attempt_count(), exhausted_at + 1);
    assert!(servers.next().await.is_some());
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_the_schedule() {
    let (transport, mut servers) = ScriptedTransport::failing(2);
    let client = client(&transport);

    assert!(client.connect().await.is_err());
    let mut server = servers.next().await.expect("third attempt succeeds");
    client
        .state_changes()
        .wait_for(|state| state.is_open())
        .await
        .unwrap();
    assert_eq!(transport.attempt_count(), 3);
    let gaps = transport.attempt_gaps();
    assert_gap(gaps[0], BASE);
    assert_gap(gaps[1], BASE * 2);

    let dropped_at = Instant::now();
    server.drop_socket();
    let _next = servers.next().await.expect("reconnected after drop");

    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 4);
    assert_gap(attempts[3].duration_since(dropped_at), BASE);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_a_pending_retry() {
    let (transport, _servers) = ScriptedTransport::failing(usize::MAX);
    let client = client(&transport);

    assert!(client.connect().await.is_err());
    assert_eq!(client.state(), ConnectionState::Closed { attempt: 1 });

    client.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.attempt_count(), 1);
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_supersedes_a_pending_retry() {
    let (transport, mut servers) = ScriptedTransport::failing(1);
    let client = client(&transport);

    assert!(client.connect().await.is_err());
    client.connect().await.unwrap();
    assert!(servers.next().await.is_some());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.attempt_count(), 2);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn write_failure_schedules_a_single_retry() {
    let (transport, mut servers) = ScriptedTransport::succeeding();
    let session: Arc<dyn SessionStore> =
        Arc::new(StaticSession::viewer("42", "Jane Doe", "jdoe@example.com"));
    let client = PushClient::spawn(
        "ws://push.test/ws",
        transport.clone(),
        LinearBackoffReconnect::new(BASE, MAX_ATTEMPTS),
        Some(session),
    );
    let mut states = client.state_changes();

    client.connect().await.unwrap();
    let server = servers.next().await.unwrap();

    // The identify reply hits a closed writer while the reader sees the stream end.
    server
        .send_text(r#"{"type":"CONNECTION_ESTABLISHED","data":"welcome"}"#)
        .unwrap();
    drop(server);

    let closed = *states
        .wait_for(|state| matches!(state, ConnectionState::Closed { .. }))
        .await
        .unwrap();
    assert_eq!(closed, ConnectionState::Closed { attempt: 1 });

    assert!(servers.next().await.is_some());
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_gap(attempts[1] - attempts[0], BASE);
}
