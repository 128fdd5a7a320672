//! `ChatClient`: owns the session and the two kinds of socket session, and
//! keeps them consistent with the current identity.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::conversation::ConversationSession;
use crate::error::{ClientError, Result};
use crate::notifications::NotificationSession;
use crate::session::{Identity, SessionContext};

pub struct ChatClient {
    config: ClientConfig,
    session: SessionContext,
    api: ApiClient,
    identity_rx: watch::Receiver<Option<Identity>>,
    notifications: Option<NotificationSession>,
    conversation: Option<ConversationSession>,
    /// Set once the notification channel is requested, cleared by `shutdown`.
    /// Keeps the channel following the identity across logins.
    wants_notifications: bool,
}

impl ChatClient {
    /// Client whose session is persisted under the data directory and
    /// restored from it.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let session = SessionContext::with_store(config.session_path());
        if let Some(identity) = session.restore()? {
            info!(user = %identity.username, "Restored session");
        }
        Ok(Self::with_session(config, session))
    }

    pub fn with_session(config: ClientConfig, session: SessionContext) -> Self {
        let api = ApiClient::new(config.server.clone(), session.clone());
        let mut identity_rx = session.subscribe();
        identity_rx.mark_unchanged();
        Self {
            config,
            session,
            api,
            identity_rx,
            notifications: None,
            conversation: None,
            wants_notifications: false,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.current()
    }

    pub fn conversation(&self) -> Option<&ConversationSession> {
        self.conversation.as_ref()
    }

    pub fn notifications(&self) -> Option<&NotificationSession> {
        self.notifications.as_ref()
    }

    /// Log in. Sessions opened under a previous identity are reopened with
    /// the new token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Identity> {
        let identity = self.api.login(username, password).await?;
        self.sync_with_identity().await;
        Ok(identity)
    }

    /// Close both channels and clear the stored identity.
    pub async fn logout(&mut self) {
        self.shutdown().await;
        self.session.logout();
    }

    /// Close both channels. The identity is kept.
    pub async fn shutdown(&mut self) {
        self.wants_notifications = false;
        self.close_conversation().await;
        if let Some(notifications) = self.notifications.take() {
            notifications.close().await;
        }
    }

    /// Open the notification channel for the current identity unless it is
    /// already open.
    pub fn ensure_notifications(&mut self) -> Result<&NotificationSession> {
        let identity = self.session.require()?;
        self.wants_notifications = true;
        let reusable = self
            .notifications
            .as_ref()
            .is_some_and(|n| n.belongs_to(&identity) && !n.is_finished());
        if !reusable {
            let opened =
                NotificationSession::open(&self.session, &self.config.server, &self.config.chat)?;
            // The replaced session, if any, closes on drop
            self.notifications = Some(opened);
        }
        self.notifications
            .as_ref()
            .ok_or(ClientError::NotConnected)
    }

    /// Enter the conversation with `other`. Any open conversation is closed
    /// first, together with its pending history fetch and typing timer.
    pub async fn open_conversation(&mut self, other: &str) -> Result<&ConversationSession> {
        self.session.require()?;
        self.close_conversation().await;

        let history = Arc::new(self.api.clone());
        let opened = ConversationSession::open(
            &self.session,
            other,
            &self.config.server,
            &self.config.chat,
            history,
        )?;
        Ok(&*self.conversation.insert(opened))
    }

    pub async fn close_conversation(&mut self) {
        if let Some(conversation) = self.conversation.take() {
            info!(conversation = %conversation.id(), "Leaving conversation");
            conversation.close().await;
        }
    }

    /// Wait for the identity to change (login elsewhere, logout, or a 401
    /// from the REST layer), then bring the channels in line with it.
    pub async fn watch_identity(&mut self) -> Option<Identity> {
        if self.identity_rx.changed().await.is_err() {
            return None;
        }
        self.sync_with_identity().await;
        self.session.current()
    }

    /// Close sessions that were opened with a token that is no longer
    /// current, then reopen them under the current identity. Without an
    /// identity the conversation stays closed; the notification channel
    /// comes back on the next login.
    pub async fn sync_with_identity(&mut self) {
        self.identity_rx.mark_unchanged();
        let current = self.session.current();

        let mut reopen_with = None;
        let conversation_stale = self
            .conversation
            .as_ref()
            .is_some_and(|c| !current.as_ref().is_some_and(|i| c.belongs_to(i)));
        if conversation_stale {
            reopen_with = self
                .conversation
                .as_ref()
                .and_then(|c| c.other())
                .map(str::to_string);
            self.close_conversation().await;
        }

        let notifications_stale = self
            .notifications
            .as_ref()
            .is_some_and(|n| !current.as_ref().is_some_and(|i| n.belongs_to(i)));
        if notifications_stale {
            if let Some(notifications) = self.notifications.take() {
                notifications.close().await;
            }
        }

        if current.is_none() {
            return;
        }
        if self.wants_notifications {
            if let Err(e) = self.ensure_notifications() {
                warn!("Failed to reopen notification channel: {}", e);
            }
        }
        if let Some(other) = reopen_with {
            info!(other = %other, "Reopening conversation for new identity");
            if let Err(e) = self.open_conversation(&other).await {
                warn!(other = %other, "Failed to reopen conversation: {}", e);
            }
        }
    }
}
