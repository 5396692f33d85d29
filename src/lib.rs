//! Live notification plumbing for the Shelf web client.
//!
//! A single kameo actor owns the push websocket and fans decoded messages out to topic
//! subscribers. Three surfaces (toast overlay, notification bell, friends feed) reconcile those
//! live messages with the persisted notification history served by the REST backend.

pub mod api;
pub mod config;
pub mod connection;
pub mod core;
pub mod dispatch;
pub mod identity;
pub mod notification;
pub mod session;
pub mod surface;
pub mod testing;
pub mod tls;
pub mod transport;

pub use config::LiveConfig;
pub use connection::PushClient;
pub use core::{ConnectionState, MessageType, PushError, PushMessage, PushResult, Topic};
pub use dispatch::{PushHandler, SubscriptionId, handler};
pub use session::{LiveSession, LiveSessionArgs};
pub use surface::{FriendsFeed, NotificationBell, ToastOverlay};
