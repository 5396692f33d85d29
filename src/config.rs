//! Runtime configuration.

use std::time::Duration;

use crate::core::LinearBackoffReconnect;

pub const API_BASE_URL_ENV: &str = "SHELF_API_BASE_URL";
pub const PUSH_URL_ENV: &str = "SHELF_PUSH_URL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

impl From<ReconnectConfig> for LinearBackoffReconnect {
    fn from(cfg: ReconnectConfig) -> Self {
        LinearBackoffReconnect::new(cfg.base_delay, cfg.max_attempts)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToastConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            ttl: Duration::from_secs(6),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BellConfig {
    pub capacity: usize,
    pub page_size: u32,
}

impl Default for BellConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            page_size: 20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedConfig {
    pub page_size: u32,
    pub show_all_size: u32,
    /// Bound applied on every live insert, independent of the page size.
    pub live_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            show_all_size: 50,
            live_cap: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveConfig {
    pub api_base_url: String,
    pub push_url: String,
    /// Largest inbound push frame accepted by the websocket transport.
    pub max_message_bytes: usize,
    pub reconnect: ReconnectConfig,
    pub toast: ToastConfig,
    pub bell: BellConfig,
    pub feed: FeedConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8088/api/v1".to_string(),
            push_url: "ws://localhost:8088/api/v1/ws/websocket".to_string(),
            max_message_bytes: 1 << 20,
            reconnect: ReconnectConfig::default(),
            toast: ToastConfig::default(),
            bell: BellConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl LiveConfig {
    /// Defaults with the endpoint URLs taken from the environment when set.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value: &String| !value.trim().is_empty());
        if let Some(url) = non_empty(API_BASE_URL_ENV) {
            self.api_base_url = url;
        }
        if let Some(url) = non_empty(PUSH_URL_ENV) {
            self.push_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_backend() {
        let cfg = LiveConfig::default();
        assert_eq!(cfg.reconnect.base_delay, Duration::from_secs(3));
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.toast.capacity, 5);
        assert_eq!(cfg.bell.capacity, 50);
        assert_eq!(cfg.feed.show_all_size, 50);
    }

    #[test]
    fn overrides_replace_only_set_urls() {
        let cfg = LiveConfig::default().with_overrides(|key| match key {
            PUSH_URL_ENV => Some("wss://shelf.example/ws".to_string()),
            API_BASE_URL_ENV => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.push_url, "wss://shelf.example/ws");
        assert_eq!(cfg.api_base_url, "http://localhost:8088/api/v1");
    }
}
