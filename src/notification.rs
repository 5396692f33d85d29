//! Persisted notification records and the view-model each surface renders.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::{MessageType, PushMessage};

/// Closed vocabulary of persisted notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewFollower,
    Unfollowed,
    ReviewLike,
    ReplyLike,
    ReviewReply,
}

impl NotificationKind {
    pub fn message_type(self) -> MessageType {
        match self {
            Self::NewFollower => MessageType::NewFollower,
            Self::Unfollowed => MessageType::Unfollowed,
            Self::ReviewLike => MessageType::ReviewLike,
            Self::ReplyLike => MessageType::ReplyLike,
            Self::ReviewReply => MessageType::ReviewReply,
        }
    }
}

/// Durable notification owned by the backend. Only read/delete calls mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNotification {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_date: NaiveDateTime,
    #[serde(default)]
    pub read_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub trigger_user_id: Option<i64>,
    #[serde(default)]
    pub trigger_user_display_name: Option<String>,
    #[serde(default)]
    pub related_entity_type: Option<String>,
    #[serde(default)]
    pub related_entity_id: Option<i64>,
    #[serde(default)]
    pub book_title: Option<String>,
    #[serde(default)]
    pub google_book_id: Option<String>,
}

/// Where a view-model entry came from. Read and delete calls are routed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Persistent { id: i64 },
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewModelNotification {
    pub id: String,
    pub kind: MessageType,
    pub message: String,
    pub timestamp: i64,
    pub read: bool,
    pub origin: Origin,
}

pub const PERSISTENT_PREFIX: &str = "persistent-";
const LIVE_PREFIX: &str = "live-";

static LIVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Locally unique id for a live entry. Never starts with [`PERSISTENT_PREFIX`].
fn next_live_id(timestamp: i64) -> String {
    let seq = LIVE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{LIVE_PREFIX}{timestamp}-{seq}")
}

impl ViewModelNotification {
    pub fn from_persisted(record: &PersistedNotification) -> Self {
        Self {
            id: format!("{PERSISTENT_PREFIX}{}", record.id),
            kind: record.kind.message_type(),
            message: record.message.clone(),
            timestamp: record.created_date.and_utc().timestamp_millis(),
            read: record.is_read,
            origin: Origin::Persistent { id: record.id },
        }
    }

    pub fn from_live(message: &PushMessage) -> Self {
        Self {
            id: next_live_id(message.timestamp),
            kind: message.kind.clone(),
            message: message.body(),
            timestamp: message.timestamp,
            read: false,
            origin: Origin::Live,
        }
    }

    pub fn persistent_id(&self) -> Option<i64> {
        match self.origin {
            Origin::Persistent { id } => Some(id),
            Origin::Live => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.origin, Origin::Live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PersistedNotification {
        sonic_rs::from_str(
            r#"{
                "id": 41,
                "type": "REVIEW_LIKE",
                "message": "John Smith liked your review of Dune",
                "isRead": true,
                "createdDate": "2024-05-01T10:15:30.250",
                "readAt": null,
                "triggerUserId": 8,
                "triggerUserDisplayName": "jsmith",
                "relatedEntityType": "REVIEW",
                "relatedEntityId": 12,
                "bookTitle": "Dune",
                "googleBookId": "B1ydMwEACAAJ"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn persisted_projection_keeps_id_and_read_state() {
        let record = record();
        let vm = ViewModelNotification::from_persisted(&record);

        assert_eq!(vm.id, "persistent-41");
        assert!(vm.read);
        assert_eq!(vm.kind, MessageType::ReviewLike);
        assert_eq!(vm.origin, Origin::Persistent { id: 41 });
        assert_eq!(vm.timestamp, 1_714_558_530_250);
        assert_eq!(record.book_title.as_deref(), Some("Dune"));
    }

    #[test]
    fn optional_backend_fields_may_be_absent() {
        let record: PersistedNotification = sonic_rs::from_str(
            r#"{"id":1,"type":"NEW_FOLLOWER","message":"Jane Doe started following you!","isRead":false,"createdDate":"2024-01-02T03:04:05"}"#,
        )
        .unwrap();
        assert!(record.trigger_user_id.is_none());
        assert!(!ViewModelNotification::from_persisted(&record).read);
    }

    #[test]
    fn live_ids_are_unique_and_never_collide_with_persisted_ids() {
        let msg = PushMessage::text(MessageType::NewReview, "jane_d wrote a review", 5);
        let a = ViewModelNotification::from_live(&msg);
        let b = ViewModelNotification::from_live(&msg);

        assert_ne!(a.id, b.id);
        assert!(!a.id.starts_with(PERSISTENT_PREFIX));
        assert!(a.is_live());
        assert!(!a.read);
        assert_eq!(a.message, "jane_d wrote a review");
        assert_eq!(a.persistent_id(), None);
    }
}
