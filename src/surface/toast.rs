use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::{Acceptance, Reconciler, Registrations, SurfacePolicy};
use crate::api::{NotificationApi, SessionStore};
use crate::config::ToastConfig;
use crate::connection::PushClient;
use crate::core::{ConnectionState, PushMessage, PushResult, ReconnectStrategy, Topic};
use crate::dispatch::handler;
use crate::identity::SharedIdentity;
use crate::notification::ViewModelNotification;
use crate::transport::PushTransport;

/// Transient overlay showing the most recent live notifications.
///
/// Every entry expires `ttl` after insertion on its own timer. The timer is cancelled when the
/// entry leaves by any other path (eviction, dismissal, clear).
#[derive(Clone)]
pub struct ToastOverlay {
    reconciler: Reconciler,
    session: Arc<dyn SessionStore>,
    ttl: Duration,
    timers: Arc<Mutex<HashMap<String, AbortHandle>>>,
    registrations: Arc<Registrations>,
}

impl ToastOverlay {
    pub fn new(
        config: &ToastConfig,
        api: Arc<dyn NotificationApi>,
        session: Arc<dyn SessionStore>,
        identity: SharedIdentity,
    ) -> Self {
        let policy = SurfacePolicy {
            name: "toast",
            acceptance: Acceptance::AllNotifications,
            live_cap: config.capacity,
            fetch_counts: false,
        };
        Self {
            reconciler: Reconciler::new(policy, api, Arc::clone(&session), identity),
            session,
            ttl: config.ttl,
            timers: Arc::new(Mutex::new(HashMap::new())),
            registrations: Arc::new(Registrations::default()),
        }
    }

    /// Subscribe to every message type. Mounting twice is a no-op.
    pub async fn mount<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) -> PushResult<()> {
        if self.registrations.is_mounted(client) {
            return Ok(());
        }
        let overlay = self.clone();
        let on_message = handler(move |message| {
            overlay.push(message);
        });
        self.registrations
            .subscribe(client, [Topic::Wildcard], on_message)
            .await
    }

    pub async fn unmount<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) {
        self.registrations.release(client).await;
        self.clear();
    }

    /// Offer a live message to the overlay. Returns the entry when it was shown.
    pub fn push(&self, message: &PushMessage) -> Option<ViewModelNotification> {
        let insert = self.reconciler.accept_live(message)?;
        for evicted in &insert.evicted {
            self.cancel_timer(&evicted.id);
        }
        self.schedule_expiry(&insert.item.id);
        Some(insert.item)
    }

    fn schedule_expiry(&self, id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(notification_id = %id, "no async runtime; toast will not expire");
            return;
        };
        let ttl = self.ttl;
        let reconciler = self.reconciler.clone();
        let timers = Arc::clone(&self.timers);
        let expired_id = id.to_string();
        // Hold the table until the handle is stored so the task cannot expire first.
        let mut pending = self.timers.lock();
        let task = runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            timers.lock().remove(&expired_id);
            if reconciler.remove_local(&expired_id).is_some() {
                debug!(notification_id = %expired_id, "toast expired");
            }
        });
        pending.insert(id.to_string(), task.abort_handle());
    }

    fn cancel_timer(&self, id: &str) {
        if let Some(timer) = self.timers.lock().remove(id) {
            timer.abort();
        }
    }

    /// Manual dismissal.
    pub fn dismiss(&self, id: &str) -> bool {
        self.cancel_timer(id);
        self.reconciler.remove_local(id).is_some()
    }

    pub fn clear(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.abort();
        }
        self.reconciler.clear_local();
    }

    /// Visible toasts, most recent first.
    pub fn visible(&self) -> Vec<ViewModelNotification> {
        self.reconciler.snapshot()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Connectivity indicator. Anonymous viewers get none.
    pub fn connectivity<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) -> Option<ConnectionState> {
        self.session
            .is_authenticated()
            .then(|| client.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessageType;
    use crate::testing::{FakeNotificationApi, StaticSession};

    fn overlay() -> ToastOverlay {
        ToastOverlay::new(
            &ToastConfig::default(),
            Arc::new(FakeNotificationApi::new()),
            Arc::new(StaticSession::viewer("1", "Jane Doe", "jdoe@example.com")),
            SharedIdentity::new(),
        )
    }

    fn follow(n: usize) -> PushMessage {
        PushMessage::text(
            MessageType::NewFollower,
            &format!("User{n} Reader started following you"),
            n as i64,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn instant_expiry_leaves_no_timer_behind() {
        let toasts = ToastOverlay::new(
            &ToastConfig {
                capacity: 5,
                ttl: Duration::ZERO,
            },
            Arc::new(FakeNotificationApi::new()),
            Arc::new(StaticSession::viewer("1", "Jane Doe", "jdoe@example.com")),
            SharedIdentity::new(),
        );
        for round in 0..20 {
            for n in 0..3 {
                toasts.push(&follow(round * 3 + n));
            }
            for _ in 0..200 {
                if toasts.visible().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert!(toasts.visible().is_empty());
            assert_eq!(toasts.pending_timers(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_five_most_recent_and_expires_them() {
        let toasts = overlay();
        for n in 0..7 {
            toasts.push(&follow(n));
        }

        let visible: Vec<i64> = toasts.visible().iter().map(|t| t.timestamp).collect();
        assert_eq!(visible, vec![6, 5, 4, 3, 2]);
        assert_eq!(toasts.pending_timers(), 5);

        tokio::time::sleep(Duration::from_secs(6) + Duration::from_millis(1)).await;

        assert!(toasts.visible().is_empty());
        assert_eq!(toasts.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_entry_expires_on_its_own_timer() {
        let toasts = overlay();
        toasts.push(&follow(1));
        tokio::time::sleep(Duration::from_secs(4)).await;
        toasts.push(&follow(2));

        tokio::time::sleep(Duration::from_millis(2_001)).await;
        let visible: Vec<i64> = toasts.visible().iter().map(|t| t.timestamp).collect();
        assert_eq!(visible, vec![2]);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(toasts.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dismissal_cancels_the_timer() {
        let toasts = overlay();
        let shown = toasts.push(&follow(1)).unwrap();

        assert!(toasts.dismiss(&shown.id));
        assert!(!toasts.dismiss(&shown.id));
        assert_eq!(toasts.pending_timers(), 0);
        assert!(toasts.visible().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn control_messages_never_toast() {
        let toasts = overlay();
        assert!(
            toasts
                .push(&PushMessage::text(MessageType::ConnectionEstablished, "hi", 0))
                .is_none()
        );
        assert!(
            toasts
                .push(&PushMessage::text(MessageType::UserIdentified, "ok", 0))
                .is_none()
        );
        assert!(toasts.visible().is_empty());
    }
}
