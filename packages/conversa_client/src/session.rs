//! Session context: the authenticated identity and its token.
//!
//! The identity lives in a `watch` channel so every connection holder can
//! observe login/logout and tear itself down when the token it was opened
//! with is no longer current.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

/// The logged-in user as returned by `POST /auth-token/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            name: None,
            email: None,
        }
    }

    /// Value for the REST `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Token {}", self.token)
    }
}

struct SessionInner {
    identity: watch::Sender<Option<Identity>>,
    store: Option<PathBuf>,
}

/// Shared, cheaply cloneable handle to the current identity.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl SessionContext {
    /// In-memory session; nothing is written to disk.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Session persisted as JSON at `path`.
    pub fn with_store(path: PathBuf) -> Self {
        Self::build(Some(path))
    }

    fn build(store: Option<PathBuf>) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            inner: Arc::new(SessionInner { identity, store }),
        }
    }

    /// Load a previously stored identity, if any.
    pub fn restore(&self) -> Result<Option<Identity>> {
        let Some(path) = self.inner.store.as_ref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {:?}", path))?;
        match serde_json::from_str::<Identity>(&raw) {
            Ok(identity) => {
                debug!(user = %identity.username, "Restored session");
                self.inner.identity.send_replace(Some(identity.clone()));
                Ok(Some(identity))
            }
            Err(e) => {
                warn!("Ignoring unreadable session file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.inner.identity.borrow().clone()
    }

    pub fn require(&self) -> Result<Identity> {
        self.current().ok_or(ClientError::NotAuthenticated)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.inner.identity.subscribe()
    }

    /// Replace the identity (login). Connections opened with an older token
    /// observe the change and close.
    pub fn set_identity(&self, identity: Identity) -> Result<()> {
        if let Some(path) = self.inner.store.as_ref() {
            let json = serde_json::to_string_pretty(&identity)
                .context("Failed to serialize session")?;
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write session file: {:?}", path))?;
        }
        info!(user = %identity.username, "Logged in");
        self.inner.identity.send_replace(Some(identity));
        Ok(())
    }

    /// Clear the identity and the stored file. Idempotent.
    pub fn logout(&self) {
        if let Some(path) = self.inner.store.as_ref() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove session file {:?}: {}", path, e);
                }
            }
        }
        let previous = self.inner.identity.send_replace(None);
        if let Some(identity) = previous {
            info!(user = %identity.username, "Logged out");
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_without_identity() {
        let session = SessionContext::new();
        assert!(matches!(session.require(), Err(ClientError::NotAuthenticated)));
    }

    #[test]
    fn test_set_identity_notifies_subscribers() {
        let session = SessionContext::new();
        let mut rx = session.subscribe();
        session.set_identity(Identity::new("alice", "t1")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|i| i.token.as_str()),
            Some("t1")
        );

        session.logout();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(Identity::new("alice", "abc").authorization(), "Token abc");
    }

    #[test]
    fn test_store_roundtrip_and_logout_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");

        let session = SessionContext::with_store(path.clone());
        session.set_identity(Identity::new("alice", "abc")).unwrap();
        assert!(path.exists());

        let restored = SessionContext::with_store(path.clone());
        let identity = restored.restore().unwrap().unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(restored.current(), Some(identity));

        restored.logout();
        assert!(!path.exists());
        assert!(restored.current().is_none());
        // Second logout is a no-op
        restored.logout();
    }

    #[test]
    fn test_restore_ignores_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let session = SessionContext::with_store(path);
        assert!(session.restore().unwrap().is_none());
        assert!(session.current().is_none());
    }
}
