use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::{Acceptance, Reconciler, Registrations, SurfacePolicy};
use crate::api::{ApiError, ApiResult, NotificationApi, NotificationQuery, SessionStore};
use crate::config::FeedConfig;
use crate::connection::PushClient;
use crate::core::{MessageType, PushMessage, PushResult, ReconnectStrategy, Topic};
use crate::dispatch::handler;
use crate::identity::{SharedIdentity, extract_actor};
use crate::notification::ViewModelNotification;
use crate::transport::PushTransport;

/// One rendered feed row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub notification: ViewModelNotification,
    pub actor: String,
}

/// Friends activity feed. Shows activity types only.
#[derive(Clone)]
pub struct FriendsFeed {
    reconciler: Reconciler,
    config: FeedConfig,
    show_all: Arc<AtomicBool>,
    registrations: Arc<Registrations>,
}

impl FriendsFeed {
    pub fn new(
        config: &FeedConfig,
        api: Arc<dyn NotificationApi>,
        session: Arc<dyn SessionStore>,
        identity: SharedIdentity,
    ) -> Self {
        let policy = SurfacePolicy {
            name: "feed",
            acceptance: Acceptance::ActivityOnly,
            live_cap: config.live_cap,
            fetch_counts: false,
        };
        Self {
            reconciler: Reconciler::new(policy, api, session, identity),
            config: *config,
            show_all: Arc::new(AtomicBool::new(false)),
            registrations: Arc::new(Registrations::default()),
        }
    }

    /// Subscribe to each activity type, then load the first page.
    pub async fn mount<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) -> PushResult<()> {
        if self.registrations.is_mounted(client) {
            return Ok(());
        }
        let reconciler = self.reconciler.clone();
        let on_message = handler(move |message| {
            reconciler.accept_live(message);
        });
        let topics = MessageType::ACTIVITY.into_iter().map(Topic::Exact);
        self.registrations
            .subscribe(client, topics, on_message)
            .await?;

        match self.refresh().await {
            Ok(_) | Err(ApiError::Unauthenticated) => {}
            Err(err) => debug!(error = %err, "feed mounted without persisted history"),
        }
        Ok(())
    }

    pub async fn unmount<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) {
        self.registrations.release(client).await;
    }

    fn page_size(&self) -> u32 {
        if self.show_all.load(Ordering::Acquire) {
            self.config.show_all_size
        } else {
            self.config.page_size
        }
    }

    pub async fn refresh(&self) -> ApiResult<usize> {
        let size = self.page_size();
        self.reconciler
            .load(NotificationQuery::first_page(size), size as usize)
            .await
    }

    /// Switch between the short page and "show all", reloading with the new size.
    pub async fn toggle_show_all(&self) -> ApiResult<bool> {
        let show_all = !self.show_all.fetch_xor(true, Ordering::AcqRel);
        self.refresh().await?;
        Ok(show_all)
    }

    pub fn is_showing_all(&self) -> bool {
        self.show_all.load(Ordering::Acquire)
    }

    /// Offer a live message directly, bypassing the push client.
    pub fn push(&self, message: &PushMessage) -> Option<ViewModelNotification> {
        self.reconciler.accept_live(message).map(|insert| insert.item)
    }

    pub async fn delete(&self, id: &str) -> ApiResult<bool> {
        self.reconciler.delete(id).await
    }

    pub fn entries(&self) -> Vec<FeedEntry> {
        self.reconciler
            .snapshot()
            .into_iter()
            .map(|notification| FeedEntry {
                actor: extract_actor(&notification.message),
                notification,
            })
            .collect()
    }

    /// Unread entries currently in the feed.
    pub fn unread_count(&self) -> u64 {
        self.reconciler.unread_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.reconciler.last_error()
    }
}
