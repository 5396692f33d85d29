//! Reusable test doubles for driving the push client and surfaces without a socket or a
//! backend.
//!
//! - [`MockTransport`]: one in-memory connection plus its [`MockServer`] handle.
//! - [`ScriptedTransport`]: fails a scripted number of connects, then hands out a fresh
//!   [`MockServer`] per successful connect; records when every attempt happened.
//! - [`FakeNotificationApi`], [`StaticSession`], [`StaticProfiles`]: backend stand-ins.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Sink, Stream};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::{
    ApiError, ApiFuture, ApiResult, NotificationApi, NotificationCounts, NotificationPage,
    NotificationQuery, ProfileDirectory, SessionStore, SessionUser, ViewerProfile,
};
use crate::core::{PushError, PushMessage, ReconnectStrategy, WsFrame};
use crate::notification::{NotificationKind, PersistedNotification};
use crate::transport::{PushTransport, TransportConnectFuture};

fn mock_pair() -> (MockReader, MockWriter, MockServer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel::<WsFrame>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsFrame>();
    (
        MockReader { rx: inbound_rx },
        MockWriter { sent_tx },
        MockServer {
            outbound_rx: sent_rx,
            inbound_tx: Some(inbound_tx),
        },
    )
}

/// A transport backed by in-memory channels. Supports a single connection.
#[derive(Clone)]
pub struct MockTransport {
    pending: Arc<Mutex<Option<(MockReader, MockWriter)>>>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (reader, writer, server) = mock_pair();
        (
            Self {
                pending: Arc::new(Mutex::new(Some((reader, writer)))),
            },
            server,
        )
    }
}

impl PushTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, _url: String) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let pending = self.pending.lock().take();
        Box::pin(async move {
            pending.ok_or_else(|| {
                PushError::InvalidState(
                    "mock transport only supports a single active connection".to_string(),
                )
            })
        })
    }
}

#[derive(Debug)]
struct Script {
    failures_remaining: usize,
    connect_delay: Duration,
    attempts: Vec<Instant>,
}

/// Transport that fails the first `n` connects and succeeds afterwards.
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    servers_tx: mpsc::UnboundedSender<MockServer>,
}

/// Receives one [`MockServer`] per successful [`ScriptedTransport`] connect.
pub struct MockServerQueue {
    rx: mpsc::UnboundedReceiver<MockServer>,
}

impl MockServerQueue {
    pub async fn next(&mut self) -> Option<MockServer> {
        self.rx.recv().await
    }
}

impl ScriptedTransport {
    pub fn failing(times: usize) -> (Self, MockServerQueue) {
        let (servers_tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Arc::new(Mutex::new(Script {
                    failures_remaining: times,
                    connect_delay: Duration::ZERO,
                    attempts: Vec::new(),
                })),
                servers_tx,
            },
            MockServerQueue { rx },
        )
    }

    pub fn succeeding() -> (Self, MockServerQueue) {
        Self::failing(0)
    }

    /// Every connect takes `delay` before it resolves.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.script.lock().connect_delay = delay;
        self
    }

    pub fn fail_next(&self, times: usize) {
        self.script.lock().failures_remaining = times;
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.script.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.script.lock().attempts.len()
    }

    /// Gaps between consecutive connect attempts.
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        self.attempts()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

impl PushTransport for ScriptedTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, _url: String) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let (fail, delay) = {
            let mut script = self.script.lock();
            script.attempts.push(Instant::now());
            let fail = script.failures_remaining > 0;
            if fail {
                script.failures_remaining -= 1;
            }
            (fail, script.connect_delay)
        };
        let servers_tx = self.servers_tx.clone();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(PushError::ConnectionFailed(
                    "scripted connect failure".to_string(),
                ));
            }
            let (reader, writer, server) = mock_pair();
            servers_tx.send(server).map_err(|_| {
                PushError::InvalidState("mock server queue dropped".to_string())
            })?;
            Ok((reader, writer))
        })
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The client side is no longer receiving inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle for one mock connection.
pub struct MockServer {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockServer {
    /// Receive a frame written by the client.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Receive the next outbound frame and decode it as a push message.
    pub async fn recv_message(&mut self, timeout: Duration) -> Option<PushMessage> {
        let frame = self.recv_outbound_timeout(timeout).await?;
        PushMessage::decode(frame.payload()?, 0).ok()
    }

    /// Push an inbound frame to the client.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    pub fn send_message(&self, message: &PushMessage) -> Result<(), MockServerError> {
        let text = message
            .encode()
            .map_err(|_| MockServerError::ChannelClosed)?;
        self.send_text(text)
    }

    /// Send a close frame; the socket stays open until [`MockServer::drop_socket`].
    pub fn close(&self, code: u16, reason: &'static str) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::close(code, Bytes::from_static(reason.as_bytes())))
    }

    /// Simulate a server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side of a mock connection.
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl Stream for MockReader {
    type Item = Result<WsFrame, PushError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side of a mock connection.
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = PushError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| PushError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Reconnect strategy that never retries.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        false
    }

    fn attempts(&self) -> u32 {
        0
    }
}

/// Session store with a fixed (or swappable) viewer.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<SessionUser>>,
}

impl StaticSession {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn viewer(id: &str, full_name: &str, email: &str) -> Self {
        Self {
            user: RwLock::new(Some(SessionUser {
                id: id.to_string(),
                full_name: Some(full_name.to_string()),
                email: Some(email.to_string()),
                token: format!("token-{id}"),
            })),
        }
    }

    pub fn logout(&self) {
        *self.user.write() = None;
    }
}

impl SessionStore for StaticSession {
    fn current_user(&self) -> Option<SessionUser> {
        self.user.read().clone()
    }
}

/// Profile directory returning a fixed profile, or failing when none is set.
#[derive(Debug, Default)]
pub struct StaticProfiles {
    profile: Option<ViewerProfile>,
}

impl StaticProfiles {
    pub fn with_display_name(display_name: &str) -> Self {
        Self {
            profile: Some(ViewerProfile {
                display_name: Some(display_name.to_string()),
                ..ViewerProfile::default()
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }
}

impl ProfileDirectory for StaticProfiles {
    fn current_profile(&self) -> ApiFuture<'_, ViewerProfile> {
        let result = self.profile.clone().ok_or(ApiError::Http {
            status: 404,
            path: "/profiles/me".to_string(),
        });
        Box::pin(async move { result })
    }
}

/// Backend endpoints that [`FakeNotificationApi`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Notifications,
    Counts,
    MarkRead,
    MarkAllRead,
    Delete,
}

/// One recorded backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCall {
    Notifications(NotificationQuery),
    Counts,
    MarkRead(i64),
    MarkAllRead,
    Delete(i64),
}

#[derive(Debug, Default)]
struct FakeState {
    records: Vec<PersistedNotification>,
    failing: HashSet<Endpoint>,
    failing_deletes: HashSet<i64>,
    calls: Vec<ApiCall>,
}

/// In-memory notification store that records every call.
#[derive(Debug, Default)]
pub struct FakeNotificationApi {
    state: Mutex<FakeState>,
}

/// Persisted notification fixture. Newer ids get later creation times.
pub fn persisted(
    id: i64,
    kind: NotificationKind,
    message: &str,
    is_read: bool,
) -> PersistedNotification {
    let created_date = chrono::DateTime::from_timestamp_millis(1_700_000_000_000 + id * 1_000)
        .map(|at| at.naive_utc())
        .unwrap_or_default();
    PersistedNotification {
        id,
        kind,
        message: message.to_string(),
        is_read,
        created_date,
        read_at: None,
        trigger_user_id: None,
        trigger_user_display_name: None,
        related_entity_type: None,
        related_entity_id: None,
        book_title: None,
        google_book_id: None,
    }
}

impl FakeNotificationApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<PersistedNotification>) -> Self {
        let api = Self::default();
        api.state.lock().records = records;
        api
    }

    pub fn fail(&self, endpoint: Endpoint) {
        self.state.lock().failing.insert(endpoint);
    }

    pub fn recover(&self, endpoint: Endpoint) {
        self.state.lock().failing.remove(&endpoint);
    }

    /// Fail deletes of one record only.
    pub fn fail_delete_of(&self, id: i64) {
        self.state.lock().failing_deletes.insert(id);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    pub fn records(&self) -> Vec<PersistedNotification> {
        self.state.lock().records.clone()
    }

    fn begin(&self, call: ApiCall, endpoint: Endpoint, path: String) -> ApiResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.failing.contains(&endpoint) {
            return Err(ApiError::Http { status: 500, path });
        }
        Ok(())
    }
}

impl NotificationApi for FakeNotificationApi {
    fn notifications(&self, query: NotificationQuery) -> ApiFuture<'_, NotificationPage> {
        let result = self
            .begin(
                ApiCall::Notifications(query),
                Endpoint::Notifications,
                "/notifications".to_string(),
            )
            .map(|()| {
                let state = self.state.lock();
                let matching: Vec<PersistedNotification> = state
                    .records
                    .iter()
                    .filter(|record| !query.unread_only || !record.is_read)
                    .cloned()
                    .collect();
                let size = query.size.max(1) as usize;
                let total = matching.len();
                let total_pages = total.div_ceil(size);
                let content: Vec<PersistedNotification> = matching
                    .into_iter()
                    .skip(query.page as usize * size)
                    .take(size)
                    .collect();
                NotificationPage {
                    content,
                    number: query.page,
                    size: query.size,
                    total_elements: total as u64,
                    total_pages: total_pages as u32,
                    first: query.page == 0,
                    last: (query.page as usize + 1) >= total_pages,
                }
            });
        Box::pin(async move { result })
    }

    fn counts(&self) -> ApiFuture<'_, NotificationCounts> {
        let result = self
            .begin(ApiCall::Counts, Endpoint::Counts, "/notifications/count".to_string())
            .map(|()| {
                let state = self.state.lock();
                NotificationCounts {
                    unread_count: state.records.iter().filter(|r| !r.is_read).count() as u64,
                    total_count: state.records.len() as u64,
                }
            });
        Box::pin(async move { result })
    }

    fn mark_read(&self, id: i64) -> ApiFuture<'_, ()> {
        let result = self
            .begin(
                ApiCall::MarkRead(id),
                Endpoint::MarkRead,
                format!("/notifications/{id}/read"),
            )
            .map(|()| {
                let mut state = self.state.lock();
                if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
                    record.is_read = true;
                }
            });
        Box::pin(async move { result })
    }

    fn mark_all_read(&self) -> ApiFuture<'_, ()> {
        let result = self
            .begin(
                ApiCall::MarkAllRead,
                Endpoint::MarkAllRead,
                "/notifications/read-all".to_string(),
            )
            .map(|()| {
                for record in self.state.lock().records.iter_mut() {
                    record.is_read = true;
                }
            });
        Box::pin(async move { result })
    }

    fn delete(&self, id: i64) -> ApiFuture<'_, ()> {
        let path = format!("/notifications/{id}");
        let result = self
            .begin(ApiCall::Delete(id), Endpoint::Delete, path.clone())
            .and_then(|()| {
                let mut state = self.state.lock();
                if state.failing_deletes.contains(&id) {
                    return Err(ApiError::Http { status: 500, path });
                }
                let before = state.records.len();
                state.records.retain(|record| record.id != id);
                if state.records.len() == before {
                    return Err(ApiError::Http { status: 404, path });
                }
                Ok(())
            });
        Box::pin(async move { result })
    }
}
