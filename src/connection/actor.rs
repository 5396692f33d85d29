//! Push connection actor.
//!
//! The socket read loop runs in its own task and feeds decoded messages back to the actor;
//! the actor owns connection state, the reconnect schedule and the subscriber registry.
//! Every connect attempt gets a new generation so results and timers from an earlier attempt
//! are recognised and ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::SessionStore;
use crate::core::{
    ConnectionState, DisconnectCause, FollowerCountUpdate, MessageType, PushError, PushMessage,
    PushResult, ReconnectStrategy, Topic, WsFrame, epoch_millis,
};
use crate::dispatch::{Dispatcher, PushHandler, SubscriptionId};
use crate::transport::PushTransport;

/// Arguments for [`PushConnectionActor`].
pub struct PushConnectionArgs<T: PushTransport, R: ReconnectStrategy> {
    pub url: String,
    pub transport: T,
    pub reconnect_strategy: R,
    /// Source of the user id sent in `IDENTIFY_USER`. Without one no identification is sent.
    pub session: Option<Arc<dyn SessionStore>>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub refresh_tx: broadcast::Sender<FollowerCountUpdate>,
    /// Bumped every time the subscriber registry is wiped.
    pub registry_epoch: Arc<AtomicU64>,
}

pub struct PushConnectionActor<T: PushTransport, R: ReconnectStrategy> {
    url: String,
    transport: T,
    reconnect: R,
    session: Option<Arc<dyn SessionStore>>,
    dispatcher: Dispatcher,
    actor_ref: ActorRef<Self>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    refresh_tx: broadcast::Sender<FollowerCountUpdate>,
    registry_epoch: Arc<AtomicU64>,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    generation: u64,
    intentionally_closed: bool,
}

impl<T: PushTransport, R: ReconnectStrategy> Actor for PushConnectionActor<T, R> {
    type Args = PushConnectionArgs<T, R>;
    type Error = PushError;

    fn name() -> &'static str {
        "PushConnectionActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> PushResult<Self> {
        let PushConnectionArgs {
            url,
            transport,
            reconnect_strategy,
            session,
            state_tx,
            refresh_tx,
            registry_epoch,
        } = args;
        state_tx.send_replace(ConnectionState::Idle);

        Ok(Self {
            url,
            transport,
            reconnect: reconnect_strategy,
            session,
            dispatcher: Dispatcher::new(),
            actor_ref,
            state: ConnectionState::Idle,
            state_tx,
            refresh_tx,
            registry_epoch,
            writer: None,
            reader_task: None,
            reconnect_task: None,
            generation: 0,
            intentionally_closed: false,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> PushResult<()> {
        self.abort_reconnect();
        self.teardown_io().await;
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "PushConnectionActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

/// Result of a [`Connect`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    AlreadyOpen,
    InFlight,
    Started,
}

/// Explicit connect. Idempotent while open or connecting.
pub struct Connect;

/// Explicit disconnect: cancels reconnection and clears all subscribers.
pub struct Disconnect;

/// Best-effort outbound send. Replies `false` when the message was dropped.
pub struct SendMessage(pub PushMessage);

pub struct Subscribe {
    pub topic: Topic,
    pub handler: PushHandler,
}

pub struct Unsubscribe {
    pub topic: Topic,
    pub id: SubscriptionId,
}

pub struct GetState;

pub(crate) struct ConnectionEstablished<T: PushTransport> {
    generation: u64,
    reader: T::Reader,
    writer: T::Writer,
}

pub(crate) struct ConnectionFailed {
    generation: u64,
    error: String,
}

pub(crate) struct ConnectionLost {
    generation: u64,
    cause: DisconnectCause,
}

pub(crate) struct Inbound {
    generation: u64,
    message: PushMessage,
}

pub(crate) struct ReconnectDue {
    generation: u64,
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<Connect> for PushConnectionActor<T, R> {
    type Reply = PushResult<ConnectOutcome>;

    async fn handle(
        &mut self,
        _msg: Connect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match self.state {
            ConnectionState::Open => return Ok(ConnectOutcome::AlreadyOpen),
            ConnectionState::Connecting => return Ok(ConnectOutcome::InFlight),
            ConnectionState::Idle | ConnectionState::Closed { .. } => {}
        }
        // An explicit connect supersedes any pending retry and starts a fresh schedule.
        self.abort_reconnect();
        self.reconnect.reset();
        self.intentionally_closed = false;
        self.start_connect();
        Ok(ConnectOutcome::Started)
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<Disconnect>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<()>;

    async fn handle(
        &mut self,
        _msg: Disconnect,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.intentionally_closed = true;
        self.generation = self.generation.wrapping_add(1);
        self.abort_reconnect();
        self.teardown_io().await;
        self.dispatcher.clear();
        self.registry_epoch.fetch_add(1, Ordering::AcqRel);
        self.reconnect.reset();
        self.set_state(ConnectionState::Idle);
        info!(connection = %self.url, "push connection closed by client");
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<SendMessage>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<bool>;

    async fn handle(
        &mut self,
        msg: SendMessage,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.send_message(msg.0).await)
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<Subscribe>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<SubscriptionId>;

    async fn handle(
        &mut self,
        msg: Subscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.dispatcher.subscribe(msg.topic, msg.handler))
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<Unsubscribe>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<bool>;

    async fn handle(
        &mut self,
        msg: Unsubscribe,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.dispatcher.unsubscribe(&msg.topic, msg.id))
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<GetState> for PushConnectionActor<T, R> {
    type Reply = PushResult<ConnectionState>;

    async fn handle(
        &mut self,
        _msg: GetState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        Ok(self.state)
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<ConnectionEstablished<T>>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionEstablished<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let ConnectionEstablished {
            generation,
            reader,
            mut writer,
        } = msg;
        if generation != self.generation || self.intentionally_closed {
            debug!(connection = %self.url, generation, "discarding stale connection");
            let _ = writer.close().await;
            return Ok(());
        }
        self.on_connection_established(reader, writer);
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<ConnectionFailed>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation {
            return Ok(());
        }
        self.handle_connection_lost(DisconnectCause::HandshakeFailed { message: msg.error });
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<ConnectionLost>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectionLost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if msg.generation != self.generation {
            return Ok(());
        }
        self.teardown_io().await;
        self.handle_connection_lost(msg.cause);
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<Inbound> for PushConnectionActor<T, R> {
    type Reply = PushResult<()>;

    async fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if msg.generation != self.generation {
            return Ok(());
        }
        self.process_inbound(msg.message).await;
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> KameoMessage<ReconnectDue>
    for PushConnectionActor<T, R>
{
    type Reply = PushResult<()>;

    async fn handle(
        &mut self,
        msg: ReconnectDue,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.reconnect_task = None;
        if msg.generation != self.generation || self.intentionally_closed {
            return Ok(());
        }
        if matches!(self.state, ConnectionState::Closed { .. }) {
            self.start_connect();
        }
        Ok(())
    }
}

impl<T: PushTransport, R: ReconnectStrategy> PushConnectionActor<T, R> {
    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn abort_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    async fn teardown_io(&mut self) {
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.close().await;
        }
    }

    fn start_connect(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.set_state(ConnectionState::Connecting);
        info!(
            connection = %self.url,
            attempt = self.reconnect.attempts(),
            "connecting push channel"
        );

        let generation = self.generation;
        let actor_ref = self.actor_ref.clone();
        let url = self.url.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            match transport.connect(url).await {
                Ok((reader, writer)) => {
                    let _ = actor_ref
                        .tell(ConnectionEstablished::<T> {
                            generation,
                            reader,
                            writer,
                        })
                        .send()
                        .await;
                }
                Err(err) => {
                    let _ = actor_ref
                        .tell(ConnectionFailed {
                            generation,
                            error: err.to_string(),
                        })
                        .send()
                        .await;
                }
            }
        });
    }

    fn on_connection_established(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(connection = %self.url, "push channel connected");
        self.reconnect.reset();
        self.writer = Some(writer);
        self.set_state(ConnectionState::Open);

        let generation = self.generation;
        let actor_ref = self.actor_ref.clone();
        let connection = self.url.clone();
        let mut read = reader;
        self.reader_task = Some(tokio::spawn(async move {
            loop {
                let cause = match read.next().await {
                    Some(Ok(frame)) => {
                        if let Some(reason) = frame.describe_close() {
                            DisconnectCause::RemoteClosed { reason }
                        } else {
                            let Some(payload) = frame.payload() else {
                                continue;
                            };
                            match PushMessage::decode(payload, epoch_millis()) {
                                Ok(message) => {
                                    let inbound = Inbound {
                                        generation,
                                        message,
                                    };
                                    if actor_ref.tell(inbound).send().await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    warn!(
                                        connection = %connection,
                                        error = %err,
                                        "dropping malformed push frame"
                                    );
                                }
                            }
                            continue;
                        }
                    }
                    Some(Err(err)) => DisconnectCause::ReadFailure {
                        error: err.to_string(),
                    },
                    None => DisconnectCause::RemoteClosed {
                        reason: "stream ended".to_string(),
                    },
                };
                let _ = actor_ref
                    .tell(ConnectionLost { generation, cause })
                    .send()
                    .await;
                break;
            }
        }));
    }

    fn handle_connection_lost(&mut self, cause: DisconnectCause) {
        if self.intentionally_closed {
            self.set_state(ConnectionState::Idle);
            return;
        }

        if !self.reconnect.should_retry() {
            let attempt = self.reconnect.attempts();
            self.set_state(ConnectionState::Closed { attempt });
            warn!(
                connection = %self.url,
                attempt,
                cause = %cause,
                "push channel reconnect attempts exhausted; waiting for explicit connect"
            );
            return;
        }

        let delay = self.reconnect.next_delay();
        let attempt = self.reconnect.attempts();
        self.set_state(ConnectionState::Closed { attempt });
        warn!(
            connection = %self.url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            cause = %cause,
            "push channel lost; reconnect scheduled"
        );

        self.abort_reconnect();
        let generation = self.generation;
        let actor_ref = self.actor_ref.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = actor_ref.tell(ReconnectDue { generation }).send().await;
        }));
    }

    async fn process_inbound(&mut self, message: PushMessage) {
        match message.kind {
            MessageType::ConnectionEstablished => self.identify().await,
            MessageType::FollowerCountUpdate => {
                if let Some(update) = FollowerCountUpdate::from_message(&message) {
                    // No receivers is fine; the signal is advisory.
                    let _ = self.refresh_tx.send(update);
                }
            }
            _ => {}
        }
        self.dispatcher.dispatch(&message);
    }

    async fn identify(&mut self) {
        let Some(user) = self.session.as_ref().and_then(|s| s.current_user()) else {
            debug!(connection = %self.url, "no session user; skipping identification");
            return;
        };
        self.send_message(PushMessage::identify(&user.id, epoch_millis()))
            .await;
    }

    async fn send_message(&mut self, message: PushMessage) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            warn!(
                connection = %self.url,
                kind = %message.kind,
                "push channel not open; dropping outbound message"
            );
            return false;
        };
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(kind = %message.kind, error = %err, "failed to encode outbound message");
                return false;
            }
        };
        let result = writer.send(WsFrame::text(payload)).await;
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(connection = %self.url, error = %err, "push channel write failed");
                // Retire this socket's generation so the reader's own close report is ignored.
                self.generation = self.generation.wrapping_add(1);
                self.teardown_io().await;
                self.handle_connection_lost(DisconnectCause::WriteFailure {
                    error: err.to_string(),
                });
                false
            }
        }
    }
}
