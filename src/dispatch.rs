//! Publish/subscribe registry for decoded push messages.
//!
//! Delivery is synchronous and ordered: handlers registered for the message's exact type run
//! first, in registration order, then wildcard handlers in registration order. A panicking
//! handler is logged and skipped; the remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error};

use crate::core::{PushMessage, Topic};

/// Callback invoked for every delivered message.
pub type PushHandler = Arc<dyn Fn(&PushMessage) + Send + Sync>;

/// Opaque registration token returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

/// Wrap a closure as a [`PushHandler`].
pub fn handler<F>(f: F) -> PushHandler
where
    F: Fn(&PushMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<Topic, Vec<(SubscriptionId, PushHandler)>>,
}

/// Per-message delivery summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Topic, handler: PushHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.routes.entry(topic).or_default().push((id, handler));
        id
    }

    /// Remove a registration. Unknown ids are a no-op; returns whether anything was removed.
    pub fn unsubscribe(&mut self, topic: &Topic, id: SubscriptionId) -> bool {
        let Some(handlers) = self.routes.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.routes.remove(topic);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn dispatch(&self, message: &PushMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let exact = Topic::Exact(message.kind.clone());
        for topic in [&exact, &Topic::Wildcard] {
            let Some(handlers) = self.routes.get(topic) else {
                continue;
            };
            for (id, handler) in handlers {
                match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                    Ok(()) => report.delivered += 1,
                    Err(panic) => {
                        report.failed += 1;
                        error!(
                            subscription = ?id,
                            kind = %message.kind,
                            panic = panic_message(panic.as_ref()),
                            "push handler panicked"
                        );
                    }
                }
            }
        }
        debug!(
            kind = %message.kind,
            delivered = report.delivered,
            failed = report.failed,
            "dispatched push message"
        );
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
