//! Per-login wiring of the push client, viewer identity and the three surfaces.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{HttpBackend, NotificationApi, ProfileDirectory, SessionStore};
use crate::config::LiveConfig;
use crate::connection::PushClient;
use crate::core::{LinearBackoffReconnect, PushResult, ReconnectStrategy};
use crate::identity::{SharedIdentity, resolve_identity};
use crate::surface::{FriendsFeed, NotificationBell, ToastOverlay};
use crate::transport::PushTransport;
use crate::transport::tungstenite::TungsteniteTransport;

/// Collaborators handed to [`LiveSession::init`].
pub struct LiveSessionArgs<T: PushTransport, R: ReconnectStrategy> {
    pub config: LiveConfig,
    pub transport: T,
    pub reconnect_strategy: R,
    pub api: Arc<dyn NotificationApi>,
    pub profiles: Arc<dyn ProfileDirectory>,
    pub session: Arc<dyn SessionStore>,
}

/// Everything live for one logged-in viewer. Created by `init` at login and consumed by
/// `teardown` at logout.
pub struct LiveSession<
    T: PushTransport = TungsteniteTransport,
    R: ReconnectStrategy = LinearBackoffReconnect,
> {
    client: PushClient<T, R>,
    identity: SharedIdentity,
    toast: ToastOverlay,
    bell: NotificationBell,
    feed: FriendsFeed,
}

impl<T: PushTransport, R: ReconnectStrategy> LiveSession<T, R> {
    /// Resolve the viewer's aliases, mount every surface and open the push channel.
    ///
    /// A failed first connect is logged, not returned: the reconnect schedule is already armed.
    pub async fn init(args: LiveSessionArgs<T, R>) -> PushResult<Self> {
        let LiveSessionArgs {
            config,
            transport,
            reconnect_strategy,
            api,
            profiles,
            session,
        } = args;

        let identity = SharedIdentity::new();
        identity.set(resolve_identity(session.as_ref(), profiles.as_ref()).await);

        let client = PushClient::spawn(
            config.push_url.clone(),
            transport,
            reconnect_strategy,
            Some(Arc::clone(&session)),
        );
        let toast = ToastOverlay::new(
            &config.toast,
            Arc::clone(&api),
            Arc::clone(&session),
            identity.clone(),
        );
        let bell = NotificationBell::new(
            &config.bell,
            Arc::clone(&api),
            Arc::clone(&session),
            identity.clone(),
        );
        let feed = FriendsFeed::new(&config.feed, api, session, identity.clone());

        toast.mount(&client).await?;
        bell.mount(&client).await?;
        feed.mount(&client).await?;

        if let Err(err) = client.connect().await {
            warn!(connection = %config.push_url, error = %err, "initial push connect failed");
        }
        info!(connection = %config.push_url, "live session started");

        Ok(Self {
            client,
            identity,
            toast,
            bell,
            feed,
        })
    }

    /// Unmount every surface, close the channel and stop the connection actor.
    pub async fn teardown(self) {
        self.toast.unmount(&self.client).await;
        self.bell.unmount(&self.client).await;
        self.feed.unmount(&self.client).await;
        if let Err(err) = self.client.disconnect().await {
            warn!(error = %err, "push disconnect during teardown failed");
        }
        self.identity.clear();
        self.client.shutdown().await;
        info!("live session ended");
    }

    pub fn client(&self) -> &PushClient<T, R> {
        &self.client
    }

    pub fn identity(&self) -> &SharedIdentity {
        &self.identity
    }

    pub fn toast(&self) -> &ToastOverlay {
        &self.toast
    }

    pub fn bell(&self) -> &NotificationBell {
        &self.bell
    }

    pub fn feed(&self) -> &FriendsFeed {
        &self.feed
    }
}

impl LiveSession<TungsteniteTransport, LinearBackoffReconnect> {
    /// Production wiring: websocket transport plus the REST backend from `config`.
    pub async fn start(config: LiveConfig, session: Arc<dyn SessionStore>) -> PushResult<Self> {
        let backend = Arc::new(HttpBackend::new(
            config.api_base_url.clone(),
            Arc::clone(&session),
        ));
        let transport =
            TungsteniteTransport::default().max_message_bytes(config.max_message_bytes);
        let reconnect_strategy = LinearBackoffReconnect::from(config.reconnect);
        Self::init(LiveSessionArgs {
            config,
            transport,
            reconnect_strategy,
            api: backend.clone(),
            profiles: backend,
            session,
        })
        .await
    }
}
