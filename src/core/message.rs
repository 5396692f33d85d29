//! Push channel message model.
//!
//! Frames on the live channel are UTF-8 JSON objects of the shape
//! `{"type": "...", "data": ..., "userId": "...", "timestamp": 1700000000000}` where only
//! `type` is mandatory. Decoding stamps a missing `timestamp` with the local receive time.

use serde::{Deserialize, Serialize};
use sonic_rs::{JsonValueTrait, Value};

use super::types::{PushError, PushResult};

/// Message type tag. Known tags get their own variant; everything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    NewFollower,
    Unfollowed,
    ReviewLike,
    ReplyLike,
    ReviewReply,
    NewReview,
    BookRecommendation,
    ActivityUpdate,
    FollowerCountUpdate,
    ConnectionEstablished,
    UserIdentified,
    IdentifyUser,
    Other(String),
}

impl MessageType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "NEW_FOLLOWER" => Self::NewFollower,
            "UNFOLLOWED" => Self::Unfollowed,
            "REVIEW_LIKE" => Self::ReviewLike,
            "REPLY_LIKE" => Self::ReplyLike,
            "REVIEW_REPLY" => Self::ReviewReply,
            "NEW_REVIEW" => Self::NewReview,
            "BOOK_RECOMMENDATION" => Self::BookRecommendation,
            "ACTIVITY_UPDATE" => Self::ActivityUpdate,
            "FOLLOWER_COUNT_UPDATE" => Self::FollowerCountUpdate,
            "CONNECTION_ESTABLISHED" => Self::ConnectionEstablished,
            "USER_IDENTIFIED" => Self::UserIdentified,
            "IDENTIFY_USER" => Self::IdentifyUser,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::NewFollower => "NEW_FOLLOWER",
            Self::Unfollowed => "UNFOLLOWED",
            Self::ReviewLike => "REVIEW_LIKE",
            Self::ReplyLike => "REPLY_LIKE",
            Self::ReviewReply => "REVIEW_REPLY",
            Self::NewReview => "NEW_REVIEW",
            Self::BookRecommendation => "BOOK_RECOMMENDATION",
            Self::ActivityUpdate => "ACTIVITY_UPDATE",
            Self::FollowerCountUpdate => "FOLLOWER_COUNT_UPDATE",
            Self::ConnectionEstablished => "CONNECTION_ESTABLISHED",
            Self::UserIdentified => "USER_IDENTIFIED",
            Self::IdentifyUser => "IDENTIFY_USER",
            Self::Other(tag) => tag.as_str(),
        }
    }

    /// Reserved types that never become notifications on any surface.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::ConnectionEstablished
                | Self::UserIdentified
                | Self::IdentifyUser
                | Self::FollowerCountUpdate
        )
    }

    /// Types the friends feed renders as activity.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            Self::ActivityUpdate
                | Self::NewFollower
                | Self::Unfollowed
                | Self::ReviewLike
                | Self::ReviewReply
                | Self::NewReview
                | Self::BookRecommendation
        )
    }

    pub const ACTIVITY: [MessageType; 7] = [
        Self::ActivityUpdate,
        Self::NewFollower,
        Self::Unfollowed,
        Self::ReviewLike,
        Self::ReviewReply,
        Self::NewReview,
        Self::BookRecommendation,
    ];

    /// Human label. Unrecognized types fall back to a generic label instead of being rejected.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewFollower => "New follower",
            Self::Unfollowed => "Unfollowed",
            Self::ReviewLike | Self::ReplyLike => "Liked",
            Self::ReviewReply => "Reply",
            Self::NewReview => "New review",
            Self::BookRecommendation => "Recommendation",
            Self::ActivityUpdate => "Activity",
            _ => "Notification",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription key: an exact message type or the wildcard that receives everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Exact(MessageType),
    Wildcard,
}

impl Topic {
    pub const WILDCARD: &'static str = "*";

    pub fn parse(tag: &str) -> Self {
        if tag == Self::WILDCARD {
            Topic::Wildcard
        } else {
            Topic::Exact(MessageType::parse(tag))
        }
    }
}

impl From<MessageType> for Topic {
    fn from(kind: MessageType) -> Self {
        Topic::Exact(kind)
    }
}

#[derive(Deserialize)]
struct InboundWire {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Serialize)]
struct OutboundWire<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a Value,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    timestamp: i64,
}

/// A decoded push message. `timestamp` is always populated (origin time or receive time).
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub kind: MessageType,
    pub data: Value,
    pub user_id: Option<String>,
    pub timestamp: i64,
}

impl PushMessage {
    pub fn new(kind: MessageType, data: Value, timestamp: i64) -> Self {
        Self {
            kind,
            data,
            user_id: None,
            timestamp,
        }
    }

    /// Text-payload convenience constructor.
    pub fn text(kind: MessageType, body: &str, timestamp: i64) -> Self {
        Self::new(kind, Value::from(body), timestamp)
    }

    /// Outbound viewer identification sent after `CONNECTION_ESTABLISHED`.
    pub fn identify(user_id: &str, timestamp: i64) -> Self {
        Self::text(MessageType::IdentifyUser, user_id, timestamp)
    }

    /// Decode one inbound frame payload.
    ///
    /// Fails for non-JSON payloads and for messages without a non-empty `type`.
    pub fn decode(payload: &[u8], received_at_ms: i64) -> PushResult<Self> {
        let wire: InboundWire =
            sonic_rs::from_slice(payload).map_err(|err| PushError::ParseFailed(err.to_string()))?;
        let kind = wire
            .kind
            .filter(|tag| !tag.trim().is_empty())
            .ok_or_else(|| PushError::ParseFailed("message has no type".to_string()))?;
        Ok(Self {
            kind: MessageType::parse(&kind),
            data: wire.data.unwrap_or_else(Value::new),
            user_id: wire.user_id,
            timestamp: wire.timestamp.unwrap_or(received_at_ms),
        })
    }

    pub fn encode(&self) -> PushResult<String> {
        let wire = OutboundWire {
            kind: self.kind.as_str(),
            data: &self.data,
            user_id: self.user_id.as_deref(),
            timestamp: self.timestamp,
        };
        sonic_rs::to_string(&wire).map_err(|err| PushError::ParseFailed(err.to_string()))
    }

    /// Human-readable body: string data as-is, else `data.message`, else compact JSON.
    pub fn body(&self) -> String {
        if let Some(text) = self.data.as_str() {
            return text.to_string();
        }
        if let Some(text) = self.data.get("message").and_then(|m| m.as_str()) {
            return text.to_string();
        }
        if self.data.is_null() {
            return String::new();
        }
        sonic_rs::to_string(&self.data).unwrap_or_default()
    }
}

/// UI refresh signal carried by `FOLLOWER_COUNT_UPDATE`. Never becomes a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowerCountUpdate {
    pub user_id: Option<String>,
    pub follower_count: i64,
    pub following_count: i64,
    pub message: Option<String>,
}

impl FollowerCountUpdate {
    pub fn from_message(message: &PushMessage) -> Option<Self> {
        if message.kind != MessageType::FollowerCountUpdate {
            return None;
        }
        let data = &message.data;
        Some(Self {
            user_id: data
                .get("userId")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            follower_count: data.get("followerCount").and_then(|v| v.as_i64())?,
            following_count: data.get("followingCount").and_then(|v| v.as_i64())?,
            message: data
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

/// Wall-clock epoch milliseconds.
#[inline]
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_origin_timestamp() {
        let msg = PushMessage::decode(
            br#"{"type":"NEW_FOLLOWER","data":"Jane Doe started following you!","timestamp":42}"#,
            1_000,
        )
        .unwrap();
        assert_eq!(msg.kind, MessageType::NewFollower);
        assert_eq!(msg.timestamp, 42);
        assert_eq!(msg.body(), "Jane Doe started following you!");
    }

    #[test]
    fn decode_stamps_missing_timestamp_with_receive_time() {
        let msg = PushMessage::decode(br#"{"type":"CONNECTION_ESTABLISHED","data":"hi"}"#, 777)
            .unwrap();
        assert_eq!(msg.timestamp, 777);
        assert!(msg.kind.is_control());
    }

    #[test]
    fn decode_rejects_garbage_and_missing_type() {
        assert!(PushMessage::decode(b"not json", 0).is_err());
        assert!(PushMessage::decode(br#"{"data":"x"}"#, 0).is_err());
        assert!(PushMessage::decode(br#"{"type":"  ","data":"x"}"#, 0).is_err());
    }

    #[test]
    fn unknown_types_are_preserved() {
        let msg = PushMessage::decode(br#"{"type":"TBR_ADDED","data":"x"}"#, 0).unwrap();
        assert_eq!(msg.kind, MessageType::Other("TBR_ADDED".to_string()));
        assert_eq!(msg.kind.as_str(), "TBR_ADDED");
        assert_eq!(msg.kind.label(), "Notification");
        assert!(!msg.kind.is_control());
    }

    #[test]
    fn body_prefers_message_field_of_structured_payloads() {
        let msg = PushMessage::decode(
            br#"{"type":"ACTIVITY_UPDATE","data":{"message":"jane_d finished reading Dune","bookId":7}}"#,
            0,
        )
        .unwrap();
        assert_eq!(msg.body(), "jane_d finished reading Dune");

        let msg = PushMessage::decode(br#"{"type":"X","data":{"n":1}}"#, 0).unwrap();
        assert_eq!(msg.body(), r#"{"n":1}"#);

        let msg = PushMessage::decode(br#"{"type":"X"}"#, 0).unwrap();
        assert_eq!(msg.body(), "");
    }

    #[test]
    fn identify_message_encodes_user_id_as_data() {
        let encoded = PushMessage::identify("17", 5).encode().unwrap();
        let back = PushMessage::decode(encoded.as_bytes(), 0).unwrap();
        assert_eq!(back.kind, MessageType::IdentifyUser);
        assert_eq!(back.body(), "17");
        assert_eq!(back.timestamp, 5);
    }

    #[test]
    fn follower_count_update_is_decoded_from_payload() {
        let msg = PushMessage::decode(
            br#"{"type":"FOLLOWER_COUNT_UPDATE","data":{"message":"Follower count updated","followerCount":12,"followingCount":3,"userId":"9"}}"#,
            0,
        )
        .unwrap();
        let update = FollowerCountUpdate::from_message(&msg).unwrap();
        assert_eq!(update.follower_count, 12);
        assert_eq!(update.following_count, 3);
        assert_eq!(update.user_id.as_deref(), Some("9"));
    }

    #[test]
    fn wildcard_topic_parses() {
        assert_eq!(Topic::parse("*"), Topic::Wildcard);
        assert_eq!(
            Topic::parse("REVIEW_LIKE"),
            Topic::Exact(MessageType::ReviewLike)
        );
    }
}
