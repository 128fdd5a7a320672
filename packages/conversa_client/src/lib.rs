//! Conversa client - real-time core of a one-to-one chat client
//!
//! Opens one WebSocket per conversation plus one for notifications, and turns
//! their event streams into state a view can render: a reconciled message
//! timeline with history backfill, presence, typing indicators and the
//! unread counter. Rendering is left to the caller.
//!
//! # Example
//!
//! ```no_run
//! use conversa_client::{ChatClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new(None)?;
//!     let mut client = ChatClient::new(config)?;
//!     client.login("alice", "secret").await?;
//!
//!     let conversation = client.open_conversation("bob").await?;
//!     let mut snapshots = conversation.subscribe();
//!     conversation.submit("hello").await?;
//!
//!     while snapshots.changed().await.is_ok() {
//!         let snap = snapshots.borrow_and_update().clone();
//!         println!("{} messages, bob typing: {}", snap.messages.len(), snap.remote_typing);
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversation;
mod error;
pub mod models;
pub mod notifications;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod timeline;
pub mod typing;

pub use api::{ApiClient, HistorySource};
pub use client::ChatClient;
pub use config::{ChatConfig, ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use conversation::{ConversationSession, ConversationSnapshot, validate_outgoing};
pub use error::{ClientError, MessageRejected, Result};
pub use models::{ConversationId, MessagePage, MessageRecord, UserSummary};
pub use notifications::{NotificationSession, NotificationSnapshot, UnreadCounter};
pub use session::{Identity, SessionContext};
