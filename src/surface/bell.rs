use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::{Acceptance, ClearReport, Reconciler, Registrations, SurfacePolicy};
use crate::api::{ApiError, ApiResult, NotificationApi, NotificationQuery, SessionStore};
use crate::config::BellConfig;
use crate::connection::PushClient;
use crate::core::{PushMessage, PushResult, ReconnectStrategy, Topic};
use crate::dispatch::handler;
use crate::identity::SharedIdentity;
use crate::notification::ViewModelNotification;
use crate::transport::PushTransport;

/// Notification bell: persisted history plus live arrivals, with unread badge and dropdown.
#[derive(Clone)]
pub struct NotificationBell {
    reconciler: Reconciler,
    config: BellConfig,
    open: Arc<AtomicBool>,
    registrations: Arc<Registrations>,
}

impl NotificationBell {
    pub fn new(
        config: &BellConfig,
        api: Arc<dyn NotificationApi>,
        session: Arc<dyn SessionStore>,
        identity: SharedIdentity,
    ) -> Self {
        let policy = SurfacePolicy {
            name: "bell",
            acceptance: Acceptance::AllNotifications,
            live_cap: config.capacity,
            fetch_counts: true,
        };
        Self {
            reconciler: Reconciler::new(policy, api, session, identity),
            config: *config,
            open: Arc::new(AtomicBool::new(false)),
            registrations: Arc::new(Registrations::default()),
        }
    }

    /// Subscribe for live arrivals, then load the first persisted page.
    ///
    /// A failed load leaves the bell mounted with an inline error.
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
        self.registrations
            .subscribe(client, [Topic::Wildcard], on_message)
            .await?;

        match self.refresh().await {
            Ok(_) | Err(ApiError::Unauthenticated) => {}
            Err(err) => debug!(error = %err, "bell mounted without persisted history"),
        }
        Ok(())
    }

    pub async fn unmount<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) {
        self.registrations.release(client).await;
        self.open.store(false, Ordering::Release);
    }

    pub async fn refresh(&self) -> ApiResult<usize> {
        self.reconciler
            .load(
                NotificationQuery::first_page(self.config.page_size),
                self.config.capacity,
            )
            .await
    }

    /// Open or close the dropdown. Opening with unread entries marks everything read.
    /// Returns whether the dropdown is now open.
    pub async fn toggle_dropdown(&self) -> bool {
        let now_open = !self.open.fetch_xor(true, Ordering::AcqRel);
        if now_open && self.reconciler.unread_count() > 0 {
            match self.reconciler.mark_all_read().await {
                Ok(()) | Err(ApiError::Unauthenticated) => {}
                Err(err) => warn!(error = %err, "bell could not sync read state"),
            }
        }
        now_open
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Offer a live message directly, bypassing the push client.
    pub fn push(&self, message: &PushMessage) -> Option<ViewModelNotification> {
        self.reconciler.accept_live(message).map(|insert| insert.item)
    }

    pub async fn mark_all_read(&self) -> ApiResult<()> {
        self.reconciler.mark_all_read().await
    }

    pub async fn mark_read(&self, id: &str) -> ApiResult<bool> {
        self.reconciler.mark_read(id).await
    }

    pub async fn delete(&self, id: &str) -> ApiResult<bool> {
        self.reconciler.delete(id).await
    }

    pub async fn clear_all(&self) -> ClearReport {
        self.reconciler.clear_all().await
    }

    pub fn notifications(&self) -> Vec<ViewModelNotification> {
        self.reconciler.snapshot()
    }

    pub fn unread_count(&self) -> u64 {
        self.reconciler.unread_count()
    }

    pub fn total_count(&self) -> Option<u64> {
        self.reconciler.total_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.reconciler.last_error()
    }
}
