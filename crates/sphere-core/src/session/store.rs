//! Session state and its single-writer store.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::types::{User, UserPatch};

/// Credential plus identity held by the running client.
///
/// Authentication is derived from the presence of both halves, so a session
/// can never claim to be authenticated with either one missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    credential: Option<String>,
    identity: Option<User>,
}

impl Session {
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn identity(&self) -> Option<&User> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some() && self.identity.is_some()
    }
}

/// Shared handle to the session. Cloning shares the same session.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create an unauthenticated session.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current session value.
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn credential(&self) -> Option<String> {
        self.tx.borrow().credential.clone()
    }

    pub fn identity(&self) -> Option<User> {
        self.tx.borrow().identity.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated()
    }

    /// Observe session transitions.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Start an authenticated session.
    pub fn establish(&self, identity: User, credential: String) {
        info!(user = %identity.username, "Session established");
        self.tx.send_replace(Session {
            credential: Some(credential),
            identity: Some(identity),
        });
    }

    /// Swap in a refreshed credential.
    ///
    /// Returns false (and changes nothing) when the session was cleared in the
    /// meantime; a late refresh must not resurrect a logged-out session.
    pub fn replace_credential(&self, credential: String) -> bool {
        self.tx.send_if_modified(|session| {
            if session.identity.is_none() {
                return false;
            }
            session.credential = Some(credential);
            true
        })
    }

    /// End the session.
    pub fn clear(&self) {
        let was_authenticated = self.tx.send_if_modified(|session| {
            if *session == Session::default() {
                return false;
            }
            *session = Session::default();
            true
        });
        if was_authenticated {
            info!("Session cleared");
        }
    }

    /// Replace the identity's following list.
    pub fn update_following(&self, following: Vec<String>) {
        self.tx.send_if_modified(|session| match session.identity.as_mut() {
            Some(user) => {
                user.following = following;
                true
            }
            None => false,
        });
    }

    /// Merge a partial identity update.
    pub fn update_identity(&self, patch: UserPatch) {
        self.tx.send_if_modified(|session| match session.identity.as_mut() {
            Some(user) => {
                user.apply(patch);
                true
            }
            None => false,
        });
    }
}

#[cfg(test)]
pub(crate) fn test_user(id: &str, username: &str) -> User {
    User {
        id: id.to_string(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        is_email_verified: true,
        is_phone_verified: None,
        following: Vec::new(),
        followers: None,
        profile_picture: None,
    }
}
