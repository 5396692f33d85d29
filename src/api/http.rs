use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    ApiError, ApiFuture, ApiResult, NotificationApi, NotificationCounts, NotificationPage,
    NotificationQuery, ProfileDirectory, SessionStore, ViewerProfile,
};

/// REST client for the notification and profile endpoints.
///
/// Every request carries the session's bearer token. Without a session user nothing is sent
/// and the call fails with [`ApiError::Unauthenticated`].
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionStore>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, session: Arc<dyn SessionStore>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let user = self
            .session
            .current_user()
            .ok_or(ApiError::Unauthenticated)?;
        let url = format!("{}{}", self.base_url, path);
        Ok(self.client.request(method, url).bearer_auth(user.token))
    }

    async fn execute(&self, method: Method, path: String) -> ApiResult<bytes::Bytes> {
        let request = self.request(method.clone(), &path)?;
        debug!(%method, path = %path, "backend request");
        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                path,
            });
        }
        response
            .bytes()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))
    }

    async fn fetch<T: DeserializeOwned>(&self, path: String) -> ApiResult<T> {
        let body = self.execute(Method::GET, path).await?;
        sonic_rs::from_slice(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }
}

impl NotificationApi for HttpBackend {
    fn notifications(&self, query: NotificationQuery) -> ApiFuture<'_, NotificationPage> {
        Box::pin(self.fetch(format!(
            "/notifications?page={}&size={}&unreadOnly={}",
            query.page, query.size, query.unread_only
        )))
    }

    fn counts(&self) -> ApiFuture<'_, NotificationCounts> {
        Box::pin(self.fetch("/notifications/count".to_string()))
    }

    fn mark_read(&self, id: i64) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.execute(Method::PUT, format!("/notifications/{id}/read"))
                .await
                .map(drop)
        })
    }

    fn mark_all_read(&self) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.execute(Method::PUT, "/notifications/read-all".to_string())
                .await
                .map(drop)
        })
    }

    fn delete(&self, id: i64) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.execute(Method::DELETE, format!("/notifications/{id}"))
                .await
                .map(drop)
        })
    }
}

impl ProfileDirectory for HttpBackend {
    fn current_profile(&self) -> ApiFuture<'_, ViewerProfile> {
        Box::pin(async move {
            let user = self
                .session
                .current_user()
                .ok_or(ApiError::Unauthenticated)?;
            self.fetch(format!("/profiles/{}", user.id)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticSession;

    #[tokio::test]
    async fn requests_without_a_session_are_never_sent() {
        let backend = HttpBackend::new("http://127.0.0.1:9", Arc::new(StaticSession::anonymous()));

        assert_eq!(
            backend.counts().await.unwrap_err(),
            ApiError::Unauthenticated
        );
        assert_eq!(
            backend.delete(3).await.unwrap_err(),
            ApiError::Unauthenticated
        );
        assert_eq!(
            backend.current_profile().await.unwrap_err(),
            ApiError::Unauthenticated
        );
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let backend = HttpBackend::new(
            "http://localhost:8088/api/v1/",
            Arc::new(StaticSession::anonymous()),
        );
        assert_eq!(backend.base_url(), "http://localhost:8088/api/v1");
    }
}
