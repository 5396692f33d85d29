//! Backend API boundary.
//!
//! The notification endpoints, the viewer profile lookup and the session store are external
//! collaborators. Surfaces talk to them only through the traits below so tests can substitute
//! the fakes from [`crate::testing`].

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notification::PersistedNotification;

pub mod http;

pub use http::HttpBackend;

/// Convenience result alias for Backend API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Boxed future returned by the API traits so they stay object safe.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("no authenticated viewer; request not sent")]
    Unauthenticated,

    #[error("HTTP {status} from {path}")]
    Http { status: u16, path: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// The logged-in viewer as known to the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub token: String,
}

/// Token storage owned outside this crate.
pub trait SessionStore: Send + Sync + 'static {
    fn current_user(&self) -> Option<SessionUser>;

    fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }
}

/// Page request for `GET /notifications`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationQuery {
    pub page: u32,
    pub size: u32,
    pub unread_only: bool,
}

impl NotificationQuery {
    pub fn first_page(size: u32) -> Self {
        Self {
            page: 0,
            size,
            unread_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub content: Vec<PersistedNotification>,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounts {
    pub unread_count: u64,
    pub total_count: u64,
}

/// Subset of the profile resource used to resolve the viewer's display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerProfile {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Persisted notification endpoints.
pub trait NotificationApi: Send + Sync + 'static {
    fn notifications(&self, query: NotificationQuery) -> ApiFuture<'_, NotificationPage>;

    fn counts(&self) -> ApiFuture<'_, NotificationCounts>;

    fn mark_read(&self, id: i64) -> ApiFuture<'_, ()>;

    fn mark_all_read(&self) -> ApiFuture<'_, ()>;

    fn delete(&self, id: i64) -> ApiFuture<'_, ()>;
}

/// Profile lookup for the current viewer.
pub trait ProfileDirectory: Send + Sync + 'static {
    fn current_profile(&self) -> ApiFuture<'_, ViewerProfile>;
}
