//! REST boundary
//!
//! Plain request/response calls the core depends on: login, user and
//! conversation listings, and the paginated message history used by
//! backfill. A 401 from any authenticated call logs the session out.

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};
use crate::models::{ConversationId, ConversationSummary, MessagePage, UserSummary};
use crate::session::{Identity, SessionContext};

/// Source of older history pages for a conversation.
pub trait HistorySource: Send + Sync {
    fn fetch_page(
        &self,
        conversation: &ConversationId,
        page: u32,
    ) -> BoxFuture<'static, Result<MessagePage>>;
}

/// Body of `POST /auth-token/`, success or failure.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    non_field_errors: Vec<String>,
}

impl LoginResponse {
    fn into_identity(self, requested_username: &str) -> Result<Identity> {
        match self.token {
            Some(token) if !token.is_empty() => Ok(Identity {
                username: self
                    .username
                    .unwrap_or_else(|| requested_username.to_string()),
                token,
                name: self.name,
                email: self.email,
            }),
            _ => {
                let detail = self
                    .detail
                    .or_else(|| self.non_field_errors.into_iter().next())
                    .unwrap_or_else(|| "Unable to log in with provided credentials.".to_string());
                Err(ClientError::LoginRejected(detail))
            }
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    server: Arc<ServerConfig>,
    session: SessionContext,
}

impl ApiClient {
    pub fn new(server: ServerConfig, session: SessionContext) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: Arc::new(server),
            session,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// `POST /auth-token/`. On success the identity is installed in the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let url = self.server.api_url(&["auth-token"])?;
        let resp = self
            .http
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = resp.status();
        // Rejected credentials come back as 400 with a `detail`/`non_field_errors` body
        let body: LoginResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(ClientError::from_reqwest(e)),
            Err(_) => return Err(ClientError::Status(status.as_u16())),
        };

        let identity = body.into_identity(username)?;
        self.session.set_identity(identity.clone())?;
        Ok(identity)
    }

    /// `GET /api/users/all/`
    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.get_json(&["api", "users", "all"], &[]).await
    }

    /// `GET /api/conversations/`
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.get_json(&["api", "conversations"], &[]).await
    }

    /// `GET /api/conversations/{id}/`
    pub async fn conversation(&self, id: &ConversationId) -> Result<ConversationSummary> {
        self.get_json(&["api", "conversations", id.as_str()], &[])
            .await
    }

    /// `GET /api/messages/?conversation=<id>&page=<n>`
    pub async fn messages(&self, id: &ConversationId, page: u32) -> Result<MessagePage> {
        let page = page.to_string();
        self.get_json(
            &["api", "messages"],
            &[("conversation", id.as_str()), ("page", page.as_str())],
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T> {
        let identity = self.session.require()?;
        let mut url = self.server.api_url(segments)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        debug!(path = %url.path(), "GET");
        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, identity.authorization())
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(user = %identity.username, "Token rejected, logging out");
            // Only clear the session if it still holds the rejected token
            if self.session.current().as_ref() == Some(&identity) {
                self.session.logout();
            }
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        resp.json::<T>().await.map_err(ClientError::from_reqwest)
    }
}

impl HistorySource for ApiClient {
    fn fetch_page(
        &self,
        conversation: &ConversationId,
        page: u32,
    ) -> BoxFuture<'static, Result<MessagePage>> {
        let api = self.clone();
        let conversation = conversation.clone();
        async move { api.messages(&conversation, page).await }.boxed()
    }
}
