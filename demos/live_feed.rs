//! Connects as one viewer and prints what each surface shows until Ctrl-C.
//!
//! ```text
//! SHELF_USER_ID=42 SHELF_TOKEN=... SHELF_FULL_NAME="Jane Doe" \
//!     RUST_LOG=shelf_live=debug cargo run --example live_feed
//! ```

use std::sync::Arc;
use std::time::Duration;

use shelf_live::api::{SessionStore, SessionUser};
use shelf_live::tls::install_rustls_crypto_provider;
use shelf_live::{LiveConfig, LiveSession};
use tracing_subscriber::EnvFilter;

struct EnvSession {
    user: Option<SessionUser>,
}

impl EnvSession {
    fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let user = match (var("SHELF_USER_ID"), var("SHELF_TOKEN")) {
            (Some(id), Some(token)) => Some(SessionUser {
                id,
                full_name: var("SHELF_FULL_NAME"),
                email: var("SHELF_EMAIL"),
                token,
            }),
            _ => None,
        };
        Self { user }
    }
}

impl SessionStore for EnvSession {
    fn current_user(&self) -> Option<SessionUser> {
        self.user.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    install_rustls_crypto_provider();

    let config = LiveConfig::from_env();
    let session = LiveSession::start(config, Arc::new(EnvSession::from_env())).await?;
    let mut refresh = session.client().refresh_signals();

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(update) = refresh.recv() => {
                println!(
                    "followers={} following={}",
                    update.follower_count, update.following_count
                );
            }
            _ = ticker.tick() => {
                println!(
                    "state={:?} toasts={} bell={} (unread {}) feed={}",
                    session.client().state(),
                    session.toast().visible().len(),
                    session.bell().notifications().len(),
                    session.bell().unread_count(),
                    session.feed().entries().len(),
                );
                for entry in session.feed().entries().iter().take(3) {
                    println!("  {} | {}", entry.actor, entry.notification.message);
                }
            }
        }
    }

    session.teardown().await;
    Ok(())
}
