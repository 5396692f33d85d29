//! Actor extraction and the self-event filter.
//!
//! Push payloads carry no actor id, so the acting user is guessed from the message body using
//! the backend's message templates. The heuristic misfires on names that look like the verbs
//! it splits on; that is tolerated rather than patched around.

use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, warn};

use crate::api::{ProfileDirectory, SessionStore};

pub const UNKNOWN_ACTOR: &str = "Unknown User";

/// Ordered, first match wins.
static ACTOR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(.+?)\s+(added to|is currently|finished|started|wrote|removed from)",
        r"^(.+?)\s+(added|finished|started|wrote|removed|reviewed)",
        r"^(.+?)\s+(started following|unfollowed|liked your|replied to)",
        r"^(.+?)\s+(to TBR|reading|to Read)",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static TWO_TOKENS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(\w+\s+\w+)").ok());

/// Best-effort guess of who performed the action described by `body`.
pub fn extract_actor(body: &str) -> String {
    let captured = ACTOR_PATTERNS
        .iter()
        .find_map(|re| re.captures(body))
        .or_else(|| TWO_TOKENS.as_ref().and_then(|re| re.captures(body)))
        .and_then(|caps| caps.get(1));
    match captured {
        Some(m) => m.as_str().trim().to_string(),
        None => UNKNOWN_ACTOR.to_string(),
    }
}

/// The viewer's own aliases. Used only as comparison keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerIdentity {
    pub full_name: Option<String>,
    pub email_local_part: Option<String>,
    pub display_name: Option<String>,
}

impl ViewerIdentity {
    pub fn new(
        full_name: Option<String>,
        email: Option<&str>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            full_name,
            email_local_part: email.and_then(email_local_part),
            display_name,
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        [&self.full_name, &self.email_local_part, &self.display_name]
            .into_iter()
            .filter_map(|alias| alias.as_deref())
            .filter(|alias| !alias.is_empty())
    }

    pub fn is_resolved(&self) -> bool {
        self.aliases().next().is_some()
    }

    /// Case-sensitive comparison against every known alias.
    pub fn matches(&self, actor: &str) -> bool {
        self.aliases().any(|alias| alias == actor)
    }
}

fn email_local_part(email: &str) -> Option<String> {
    let local = email.split('@').next()?.trim();
    (!local.is_empty()).then(|| local.to_string())
}

/// Whether `body` describes an action by the viewer.
///
/// Fails open: with no alias resolved yet the event is shown.
pub fn is_self_event(body: &str, identity: &ViewerIdentity) -> bool {
    if !identity.is_resolved() {
        return false;
    }
    let actor = extract_actor(body);
    let own = identity.matches(&actor);
    if own {
        debug!(actor = %actor, "suppressing self event");
    }
    own
}

/// Viewer identity shared between surfaces; filled in asynchronously after login.
#[derive(Debug, Clone, Default)]
pub struct SharedIdentity {
    inner: Arc<RwLock<ViewerIdentity>>,
}

impl SharedIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ViewerIdentity {
        self.inner.read().clone()
    }

    pub fn set(&self, identity: ViewerIdentity) {
        *self.inner.write() = identity;
    }

    pub fn clear(&self) {
        self.set(ViewerIdentity::default());
    }

    pub fn is_self_event(&self, body: &str) -> bool {
        is_self_event(body, &self.inner.read())
    }
}

/// Resolve the viewer's aliases from the session and the profile lookup.
///
/// A failed profile lookup leaves the display name unresolved; the other aliases still apply.
pub async fn resolve_identity(
    session: &dyn SessionStore,
    profiles: &dyn ProfileDirectory,
) -> ViewerIdentity {
    let Some(user) = session.current_user() else {
        return ViewerIdentity::default();
    };
    let mut identity = ViewerIdentity::new(user.full_name, user.email.as_deref(), None);
    match profiles.current_profile().await {
        Ok(profile) => {
            identity.display_name = profile.display_name.filter(|name| !name.is_empty());
            if identity.full_name.is_none() {
                identity.full_name = profile.full_name;
            }
            if identity.email_local_part.is_none() {
                identity.email_local_part = profile.email.as_deref().and_then(email_local_part);
            }
        }
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "failed to resolve viewer profile");
        }
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_phrasings_extract_the_actor() {
        assert_eq!(extract_actor("Jane Doe added The Hobbit to TBR"), "Jane Doe");
        assert_eq!(extract_actor("jane_d finished reading Dune"), "jane_d");
        assert_eq!(extract_actor("John Smith started following you"), "John Smith");
        assert_eq!(extract_actor("John Smith started following you!"), "John Smith");
        assert_eq!(extract_actor("Ann Lee is currently reading Emma"), "Ann Lee");
        assert_eq!(extract_actor("Ann Lee removed from Read: Emma"), "Ann Lee");
        assert_eq!(extract_actor("Mo reviewed Piranesi"), "Mo");
        assert_eq!(extract_actor("Bob Ray unfollowed you"), "Bob Ray");
        assert_eq!(extract_actor("Bob Ray liked your review"), "Bob Ray");
        assert_eq!(extract_actor("Bob Ray replied to your review"), "Bob Ray");
    }

    #[test]
    fn two_token_fallback_then_unknown() {
        assert_eq!(extract_actor("Reading Club"), "Reading Club");
        assert_eq!(extract_actor("xyz"), UNKNOWN_ACTOR);
        assert_eq!(extract_actor(""), UNKNOWN_ACTOR);
    }

    fn jane() -> ViewerIdentity {
        ViewerIdentity::new(
            Some("Jane Doe".to_string()),
            Some("jdoe@example.com"),
            Some("janed".to_string()),
        )
    }

    #[test]
    fn events_by_any_alias_are_suppressed() {
        let identity = jane();
        assert_eq!(identity.email_local_part.as_deref(), Some("jdoe"));

        assert!(is_self_event("Jane Doe added The Hobbit to TBR", &identity));
        assert!(is_self_event("jdoe finished reading Dune", &identity));
        assert!(is_self_event("janed started following you", &identity));
        assert!(!is_self_event("John Smith started following you", &identity));
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert!(!is_self_event("jane doe added Emma to TBR", &jane()));
    }

    #[test]
    fn unresolved_identity_fails_open() {
        let identity = ViewerIdentity::default();
        assert!(!identity.is_resolved());
        assert!(!is_self_event("Unknown User", &identity));
        assert!(!is_self_event("Jane Doe added The Hobbit to TBR", &identity));

        let blank = ViewerIdentity::new(Some(String::new()), None, None);
        assert!(!blank.is_resolved());
    }

    #[test]
    fn shared_identity_updates_are_visible_to_clones() {
        let shared = SharedIdentity::new();
        let reader = shared.clone();
        assert!(!reader.is_self_event("Jane Doe finished Emma"));

        shared.set(jane());
        assert!(reader.is_self_event("Jane Doe finished Emma"));

        shared.clear();
        assert!(!reader.is_self_event("Jane Doe finished Emma"));
    }
}
