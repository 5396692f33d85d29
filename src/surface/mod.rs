//! Notification surfaces and the reconciliation engine they share.
//!
//! Each surface owns one [`Reconciler`], which merges the persisted page fetched from the
//! backend with live push messages into a single list in strict prepend order. The list is
//! never re-sorted by timestamp. State sits behind a `parking_lot` mutex that is never held
//! across an await, so live delivery keeps flowing while a backend call is pending.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::api::{ApiError, ApiResult, NotificationApi, NotificationQuery, SessionStore};
use crate::connection::PushClient;
use crate::core::{MessageType, PushMessage, PushResult, ReconnectStrategy, Topic};
use crate::dispatch::{PushHandler, SubscriptionId};
use crate::identity::SharedIdentity;
use crate::notification::{Origin, ViewModelNotification};
use crate::transport::PushTransport;

pub mod bell;
pub mod feed;
pub mod toast;

pub use bell::NotificationBell;
pub use feed::{FeedEntry, FriendsFeed};
pub use toast::ToastOverlay;

/// Which live message types a surface renders. Control types are never accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    AllNotifications,
    ActivityOnly,
}

impl Acceptance {
    pub fn accepts(self, kind: &MessageType) -> bool {
        if kind.is_control() {
            return false;
        }
        match self {
            Acceptance::AllNotifications => true,
            Acceptance::ActivityOnly => kind.is_activity(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SurfacePolicy {
    pub name: &'static str,
    pub acceptance: Acceptance,
    /// Bound applied after every live prepend.
    pub live_cap: usize,
    /// Whether a load also fetches the unread/total counts.
    pub fetch_counts: bool,
}

/// Ordered notification list, most recent arrival first. Ids are unique.
#[derive(Debug, Clone, Default)]
pub struct SurfaceList {
    items: VecDeque<ViewModelNotification>,
}

impl SurfaceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the front, then drop the oldest entries beyond `cap`. Returns what was dropped.
    pub fn prepend(
        &mut self,
        item: ViewModelNotification,
        cap: usize,
    ) -> Vec<ViewModelNotification> {
        self.items.retain(|existing| existing.id != item.id);
        self.items.push_front(item);
        self.truncate(cap)
    }

    pub fn truncate(&mut self, cap: usize) -> Vec<ViewModelNotification> {
        if self.items.len() <= cap {
            return Vec::new();
        }
        self.items.drain(cap..).collect()
    }

    /// Replace the persisted portion with `page`.
    ///
    /// Live entries already in the list stay ahead of the page in their current order;
    /// page entries follow in server order, skipping ids already present.
    pub fn merge_page(
        &mut self,
        page: Vec<ViewModelNotification>,
        cap: usize,
    ) -> Vec<ViewModelNotification> {
        self.items.retain(ViewModelNotification::is_live);
        for item in page {
            if !self.contains(&item.id) {
                self.items.push_back(item);
            }
        }
        self.truncate(cap)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ViewModelNotification> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<ViewModelNotification> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.items.remove(index)
    }

    /// Returns the number of entries that changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for item in self.items.iter_mut().filter(|item| !item.read) {
            item.read = true;
            changed += 1;
        }
        changed
    }

    /// Mark one entry read. Returns whether it was unread and where it came from.
    pub fn mark_read(&mut self, id: &str) -> Option<(bool, Origin)> {
        let item = self.items.iter_mut().find(|item| item.id == id)?;
        let was_unread = !item.read;
        item.read = true;
        Some((was_unread, item.origin))
    }

    pub fn clear(&mut self) -> Vec<ViewModelNotification> {
        self.items.drain(..).collect()
    }

    pub fn unread(&self) -> usize {
        self.items.iter().filter(|item| !item.read).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewModelNotification> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ViewModelNotification> {
        self.items.iter().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    list: SurfaceList,
    unread: u64,
    total: Option<u64>,
    error: Option<String>,
}

/// A live message accepted into a surface.
#[derive(Debug, Clone)]
pub struct LiveInsert {
    pub item: ViewModelNotification,
    pub evicted: Vec<ViewModelNotification>,
}

/// Outcome of [`Reconciler::clear_all`]. Remote failures are reported per item, never as one
/// error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub remote_deleted: usize,
    pub remote_failed: usize,
    pub cleared: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    policy: SurfacePolicy,
    api: Arc<dyn NotificationApi>,
    session: Arc<dyn SessionStore>,
    identity: SharedIdentity,
    state: Arc<Mutex<SurfaceState>>,
}

impl Reconciler {
    pub fn new(
        policy: SurfacePolicy,
        api: Arc<dyn NotificationApi>,
        session: Arc<dyn SessionStore>,
        identity: SharedIdentity,
    ) -> Self {
        Self {
            policy,
            api,
            session,
            identity,
            state: Arc::new(Mutex::new(SurfaceState::default())),
        }
    }

    pub fn policy(&self) -> &SurfacePolicy {
        &self.policy
    }

    /// Fetch a persisted page (and counts, when the surface uses them) and merge it in.
    ///
    /// Never calls the backend for an unauthenticated viewer. A failed fetch is recorded as
    /// the surface's inline error; live delivery is unaffected.
    pub async fn load(&self, query: NotificationQuery, capacity: usize) -> ApiResult<usize> {
        if !self.session.is_authenticated() {
            debug!(surface = self.policy.name, "skipping load for anonymous viewer");
            return Err(ApiError::Unauthenticated);
        }

        let page = match self.api.notifications(query).await {
            Ok(page) => page,
            Err(err) => return Err(self.record_failure("load notifications", err)),
        };
        let items: Vec<ViewModelNotification> = page
            .content
            .iter()
            .map(ViewModelNotification::from_persisted)
            .collect();
        let loaded = items.len();
        {
            let mut state = self.state.lock();
            state.list.merge_page(items, capacity);
            state.error = None;
            if !self.policy.fetch_counts {
                state.unread = state.list.unread() as u64;
                state.total = Some(page.total_elements);
            }
        }

        if self.policy.fetch_counts {
            match self.api.counts().await {
                Ok(counts) => {
                    let mut state = self.state.lock();
                    state.unread = counts.unread_count;
                    state.total = Some(counts.total_count);
                }
                Err(err) => return Err(self.record_failure("load counts", err)),
            }
        }

        debug!(surface = self.policy.name, loaded, "persisted notifications loaded");
        Ok(loaded)
    }

    fn record_failure(&self, action: &'static str, err: ApiError) -> ApiError {
        warn!(surface = self.policy.name, action, error = %err, "backend read failed");
        self.state.lock().error = Some(err.to_string());
        err
    }

    /// Run a live message through the type and self filters and prepend it.
    pub fn accept_live(&self, message: &PushMessage) -> Option<LiveInsert> {
        if !self.policy.acceptance.accepts(&message.kind) {
            return None;
        }
        if self.identity.is_self_event(&message.body()) {
            debug!(surface = self.policy.name, kind = %message.kind, "dropping self event");
            return None;
        }

        let item = ViewModelNotification::from_live(message);
        let evicted = {
            let mut state = self.state.lock();
            let evicted = state.list.prepend(item.clone(), self.policy.live_cap);
            state.unread = if self.policy.fetch_counts {
                state.unread.saturating_add(1)
            } else {
                // Locally counted surfaces must not count entries the cap just evicted.
                state.list.unread() as u64
            };
            evicted
        };
        debug!(
            surface = self.policy.name,
            notification_id = %item.id,
            kind = %item.kind,
            evicted = evicted.len(),
            "live notification accepted"
        );
        Some(LiveInsert { item, evicted })
    }

    /// Mark everything read locally, then issue one bulk call.
    ///
    /// Local state is not rolled back when the call fails.
    pub async fn mark_all_read(&self) -> ApiResult<()> {
        {
            let mut state = self.state.lock();
            state.list.mark_all_read();
            state.unread = 0;
        }
        if !self.session.is_authenticated() {
            return Err(ApiError::Unauthenticated);
        }
        self.api.mark_all_read().await.inspect_err(|err| {
            warn!(
                surface = self.policy.name,
                error = %err,
                "mark all read failed; keeping local read state"
            );
        })
    }

    /// Mark one entry read, optimistically like [`Reconciler::mark_all_read`].
    pub async fn mark_read(&self, id: &str) -> ApiResult<bool> {
        let origin = {
            let mut state = self.state.lock();
            let Some((was_unread, origin)) = state.list.mark_read(id) else {
                return Ok(false);
            };
            if was_unread {
                state.unread = state.unread.saturating_sub(1);
            }
            origin
        };
        let Origin::Persistent { id: remote_id } = origin else {
            return Ok(true);
        };
        if !self.session.is_authenticated() {
            return Err(ApiError::Unauthenticated);
        }
        self.api.mark_read(remote_id).await.inspect_err(|err| {
            warn!(
                surface = self.policy.name,
                notification_id = remote_id,
                error = %err,
                "mark read failed; keeping local read state"
            );
        })?;
        Ok(true)
    }

    /// Delete one entry. Persisted entries are removed locally only after the backend
    /// confirms; on failure the entry stays. Live entries are removed locally.
    pub async fn delete(&self, id: &str) -> ApiResult<bool> {
        let origin = match self.state.lock().list.get(id) {
            Some(item) => item.origin,
            None => return Ok(false),
        };
        let remote_id = match origin {
            Origin::Live => return Ok(self.remove_local(id).is_some()),
            Origin::Persistent { id } => id,
        };
        if !self.session.is_authenticated() {
            return Err(ApiError::Unauthenticated);
        }
        match self.api.delete(remote_id).await {
            Ok(()) => {
                self.remove_local(id);
                Ok(true)
            }
            Err(err) => {
                warn!(
                    surface = self.policy.name,
                    notification_id = remote_id,
                    error = %err,
                    "delete failed; notification kept"
                );
                Err(err)
            }
        }
    }

    /// Remove an entry without touching the backend.
    pub fn remove_local(&self, id: &str) -> Option<ViewModelNotification> {
        let mut state = self.state.lock();
        let removed = state.list.remove(id)?;
        if !removed.read {
            state.unread = state.unread.saturating_sub(1);
        }
        if removed.persistent_id().is_some() {
            state.total = state.total.map(|total| total.saturating_sub(1));
        }
        Some(removed)
    }

    /// Delete every persisted entry remotely (best effort), then clear the list.
    pub async fn clear_all(&self) -> ClearReport {
        let remote_ids: Vec<i64> = self
            .state
            .lock()
            .list
            .iter()
            .filter_map(ViewModelNotification::persistent_id)
            .collect();

        let mut report = ClearReport::default();
        if self.session.is_authenticated() {
            for remote_id in remote_ids {
                match self.api.delete(remote_id).await {
                    Ok(()) => report.remote_deleted += 1,
                    Err(err) => {
                        report.remote_failed += 1;
                        warn!(
                            surface = self.policy.name,
                            notification_id = remote_id,
                            error = %err,
                            "remote delete failed during clear"
                        );
                    }
                }
            }
        }
        report.cleared = self.clear_local().len();
        report
    }

    pub fn clear_local(&self) -> Vec<ViewModelNotification> {
        let mut state = self.state.lock();
        state.unread = 0;
        state.total = None;
        state.list.clear()
    }

    pub fn snapshot(&self) -> Vec<ViewModelNotification> {
        self.state.lock().list.to_vec()
    }

    pub fn unread_count(&self) -> u64 {
        self.state.lock().unread
    }

    pub fn total_count(&self) -> Option<u64> {
        self.state.lock().total
    }

    /// Inline error from the most recent failed read, cleared by the next successful load.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().list.is_empty()
    }
}

/// Subscriptions a mounted surface holds on the push client.
///
/// Entries are tagged with the client's registry epoch; once a disconnect wipes the registry
/// they no longer count as mounted.
#[derive(Debug, Default)]
pub(crate) struct Registrations {
    inner: Mutex<RegisteredTopics>,
}

#[derive(Debug, Default)]
struct RegisteredTopics {
    epoch: u64,
    entries: Vec<(Topic, SubscriptionId)>,
}

impl Registrations {
    pub(crate) fn is_mounted<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) -> bool {
        let inner = self.inner.lock();
        !inner.entries.is_empty() && inner.epoch == client.registry_epoch()
    }

    /// Registers `handler` once per topic, replacing any entries left over from a wiped registry.
    pub(crate) async fn subscribe<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
        topics: impl IntoIterator<Item = Topic>,
        handler: PushHandler,
    ) -> PushResult<()> {
        // Read before subscribing so a disconnect racing this call leaves the entries stale.
        let epoch = client.registry_epoch();
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                inner.entries.clear();
            }
            inner.epoch = epoch;
        }
        for topic in topics {
            let id = client.subscribe(topic.clone(), Arc::clone(&handler)).await?;
            self.inner.lock().entries.push((topic, id));
        }
        Ok(())
    }

    pub(crate) async fn release<T: PushTransport, R: ReconnectStrategy>(
        &self,
        client: &PushClient<T, R>,
    ) {
        let entries = std::mem::take(&mut self.inner.lock().entries);
        for (topic, id) in entries {
            if let Err(err) = client.unsubscribe(topic, id).await {
                debug!(error = %err, "unsubscribe after client shutdown");
            }
        }
    }
}
