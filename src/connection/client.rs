use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kameo::error::SendError;
use kameo::prelude::{Actor, ActorRef};
use tokio::sync::{broadcast, watch};

use super::actor::{
    Connect, ConnectOutcome, Disconnect, GetState, PushConnectionActor, PushConnectionArgs,
    SendMessage, Subscribe, Unsubscribe,
};
use crate::api::SessionStore;
use crate::core::{
    ConnectionState, FollowerCountUpdate, PushError, PushMessage, PushResult, ReconnectStrategy,
    Topic,
};
use crate::dispatch::{PushHandler, SubscriptionId};
use crate::transport::PushTransport;

const REFRESH_CHANNEL_CAPACITY: usize = 16;

/// Cloneable handle to one push connection.
///
/// Construct one per session and pass it to every surface; there is no process-wide instance.
pub struct PushClient<T: PushTransport, R: ReconnectStrategy> {
    actor: ActorRef<PushConnectionActor<T, R>>,
    state_rx: watch::Receiver<ConnectionState>,
    refresh_tx: broadcast::Sender<FollowerCountUpdate>,
    registry_epoch: Arc<AtomicU64>,
}

impl<T: PushTransport, R: ReconnectStrategy> Clone for PushClient<T, R> {
    fn clone(&self) -> Self {
        Self {
            actor: self.actor.clone(),
            state_rx: self.state_rx.clone(),
            refresh_tx: self.refresh_tx.clone(),
            registry_epoch: self.registry_epoch.clone(),
        }
    }
}

fn actor_error<M>(err: SendError<M, PushError>) -> PushError {
    match err {
        SendError::HandlerError(err) => err,
        _ => PushError::ActorError("push connection actor is not running".to_string()),
    }
}

impl<T: PushTransport, R: ReconnectStrategy> PushClient<T, R> {
    /// Spawn the connection actor. Nothing is dialled until [`PushClient::connect`].
    pub fn spawn(
        url: impl Into<String>,
        transport: T,
        reconnect_strategy: R,
        session: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (refresh_tx, _) = broadcast::channel(REFRESH_CHANNEL_CAPACITY);
        let registry_epoch = Arc::new(AtomicU64::new(0));
        let actor = PushConnectionActor::spawn(PushConnectionArgs {
            url: url.into(),
            transport,
            reconnect_strategy,
            session,
            state_tx,
            refresh_tx: refresh_tx.clone(),
            registry_epoch: registry_epoch.clone(),
        });
        Self {
            actor,
            state_rx,
            refresh_tx,
            registry_epoch,
        }
    }

    /// Open the channel.
    ///
    /// Returns immediately when already open or when another connect is in flight. Otherwise
    /// waits for the attempt to finish; a failed attempt still leaves automatic reconnection
    /// armed.
    pub async fn connect(&self) -> PushResult<()> {
        let outcome = self.actor.ask(Connect).await.map_err(actor_error)?;
        if outcome != ConnectOutcome::Started {
            return Ok(());
        }
        let mut state_rx = self.state_rx.clone();
        let state = *state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map_err(|_| PushError::ActorError("connection state channel closed".to_string()))?;
        match state {
            ConnectionState::Open => Ok(()),
            other => Err(PushError::ConnectionFailed(format!(
                "push channel did not open ({other:?})"
            ))),
        }
    }

    pub async fn disconnect(&self) -> PushResult<()> {
        self.actor.ask(Disconnect).await.map_err(actor_error)
    }

    /// At-most-once send. `Ok(false)` means the message was dropped because the channel was
    /// not open.
    pub async fn send(&self, message: PushMessage) -> PushResult<bool> {
        self.actor
            .ask(SendMessage(message))
            .await
            .map_err(actor_error)
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_open()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Authoritative state as seen by the actor, ordered after every earlier request.
    pub async fn current_state(&self) -> PushResult<ConnectionState> {
        self.actor.ask(GetState).await.map_err(actor_error)
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub async fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: PushHandler,
    ) -> PushResult<SubscriptionId> {
        self.actor
            .ask(Subscribe {
                topic: topic.into(),
                handler,
            })
            .await
            .map_err(actor_error)
    }

    /// Unknown registrations are a no-op.
    pub async fn unsubscribe(
        &self,
        topic: impl Into<Topic>,
        id: SubscriptionId,
    ) -> PushResult<bool> {
        self.actor
            .ask(Unsubscribe {
                topic: topic.into(),
                id,
            })
            .await
            .map_err(actor_error)
    }

    /// Changes whenever [`PushClient::disconnect`] drops every subscriber. Subscription ids
    /// taken under an older epoch no longer deliver anything.
    pub fn registry_epoch(&self) -> u64 {
        self.registry_epoch.load(Ordering::Acquire)
    }

    /// Follower/following count refresh signals. Never delivered as notifications.
    pub fn refresh_signals(&self) -> broadcast::Receiver<FollowerCountUpdate> {
        self.refresh_tx.subscribe()
    }

    /// Stop the connection actor. The handle is unusable afterwards.
    pub async fn shutdown(&self) {
        let _ = self.actor.stop_gracefully().await;
        self.actor.wait_for_shutdown().await;
    }
}
