//! Notification channel: the process-wide unread counter.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ChatConfig, ServerConfig};
use crate::connection::{Connection, ConnectionEvent, ConnectionState};
use crate::error::Result;
use crate::protocol::{NotificationEvent, decode_inbound};
use crate::session::{Identity, SessionContext};

/// `unread_count` sets the counter absolutely; each
/// `new_message_notification` adds exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadCounter {
    count: u64,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the count changed.
    pub fn apply(&mut self, event: &NotificationEvent) -> bool {
        let before = self.count;
        match event {
            NotificationEvent::UnreadCount { unread_count } => self.count = *unread_count,
            NotificationEvent::NewMessageNotification {} => {
                self.count = self.count.saturating_add(1)
            }
            NotificationEvent::Unknown => {}
        }
        before != self.count
    }

    pub fn get(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationSnapshot {
    pub connection_state: ConnectionState,
    pub unread_count: u64,
}

/// Handle to the running notification socket. Dropping it closes the socket.
pub struct NotificationSession {
    token: String,
    snapshot: watch::Receiver<NotificationSnapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NotificationSession {
    pub fn open(session: &SessionContext, server: &ServerConfig, chat: &ChatConfig) -> Result<Self> {
        let identity = session.require()?;
        let url = server.notification_socket_url(&identity.token)?;
        info!(user = %identity.username, "Opening notification channel");
        let conn = Connection::open(url, chat.channel_capacity);
        Ok(Self::start(identity, session.subscribe(), conn))
    }

    pub(crate) fn start(
        identity: Identity,
        mut identity_rx: watch::Receiver<Option<Identity>>,
        mut conn: Connection,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(NotificationSnapshot::default());
        let cancel = CancellationToken::new();
        let token = identity.token;

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let token = token.clone();
            async move {
                let mut counter = UnreadCounter::new();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,

                        changed = identity_rx.changed() => {
                            let still_current = changed.is_ok()
                                && identity_rx
                                    .borrow_and_update()
                                    .as_ref()
                                    .is_some_and(|i| i.token == token);
                            if !still_current {
                                info!("Identity changed, closing notification channel");
                                break;
                            }
                        }

                        event = conn.next_event() => match event {
                            Some(ConnectionEvent::Text(text)) => {
                                if let Some(event) = decode_inbound::<NotificationEvent>("notifications", &text) {
                                    if counter.apply(&event) {
                                        debug!(unread = counter.get(), "Unread count");
                                    }
                                }
                            }
                            Some(ConnectionEvent::State(_)) => {}
                            None => break,
                        },
                    }
                    snapshot_tx.send_if_modified(|s| {
                        let next = NotificationSnapshot {
                            connection_state: conn.state(),
                            unread_count: counter.get(),
                        };
                        let changed = *s != next;
                        *s = next;
                        changed
                    });
                }

                conn.close();
                if conn.state() != ConnectionState::Closed {
                    while let Some(event) = conn.next_event().await {
                        if event == ConnectionEvent::State(ConnectionState::Closed) {
                            break;
                        }
                    }
                }
                snapshot_tx.send_modify(|s| s.connection_state = ConnectionState::Closed);
                info!("Notification channel closed");
            }
        });

        Self {
            token,
            snapshot: snapshot_rx,
            cancel,
            task: Some(task),
        }
    }

    /// Whether this channel was opened with `identity`'s token.
    pub fn belongs_to(&self, identity: &Identity) -> bool {
        self.token == identity.token
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.snapshot.clone()
    }

    pub fn unread_count(&self) -> u64 {
        self.snapshot.borrow().unread_count
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.snapshot.borrow().connection_state
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::RemoteEnd;
    use std::time::Duration;

    #[test]
    fn test_increments_then_absolute_reset() {
        let mut counter = UnreadCounter::new();
        for _ in 0..3 {
            assert!(counter.apply(&NotificationEvent::NewMessageNotification {}));
        }
        assert_eq!(counter.get(), 3);

        assert!(counter.apply(&NotificationEvent::UnreadCount { unread_count: 1 }));
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_unknown_and_same_count_do_not_change() {
        let mut counter = UnreadCounter::new();
        counter.apply(&NotificationEvent::UnreadCount { unread_count: 5 });
        assert!(!counter.apply(&NotificationEvent::UnreadCount { unread_count: 5 }));
        assert!(!counter.apply(&NotificationEvent::Unknown));
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_increment_saturates() {
        let mut counter = UnreadCounter::new();
        counter.apply(&NotificationEvent::UnreadCount {
            unread_count: u64::MAX,
        });
        assert!(!counter.apply(&NotificationEvent::NewMessageNotification {}));
        assert_eq!(counter.get(), u64::MAX);
    }

    async fn started() -> (NotificationSession, RemoteEnd, SessionContext) {
        let identity = SessionContext::new();
        identity.set_identity(Identity::new("alice", "tok")).unwrap();
        let (conn, remote) = Connection::detached(16);
        let session = NotificationSession::start(
            identity.require().unwrap(),
            identity.subscribe(),
            conn,
        );
        remote.set_state(ConnectionState::Open).await;
        (session, remote, identity)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<NotificationSnapshot>,
        pred: impl Fn(&NotificationSnapshot) -> bool,
    ) -> NotificationSnapshot {
        *tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("channel ended")
    }

    #[tokio::test]
    async fn test_session_counts_notifications() {
        let (session, remote, _identity) = started().await;
        let mut rx = session.subscribe();

        for _ in 0..3 {
            remote
                .push(&NotificationEvent::NewMessageNotification {})
                .await;
        }
        wait_for(&mut rx, |s| s.unread_count == 3).await;

        remote
            .push(&NotificationEvent::UnreadCount { unread_count: 1 })
            .await;
        let snap = wait_for(&mut rx, |s| s.unread_count == 1).await;
        assert_eq!(snap.connection_state, ConnectionState::Open);
        assert_eq!(session.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_session_ignores_unknown_frames() {
        let (session, remote, _identity) = started().await;
        let mut rx = session.subscribe();

        remote.push_raw(r#"{"type":"something_else"}"#).await;
        remote
            .push_raw(r#"{"type":"unread_count","unread_count":-3}"#)
            .await;
        remote
            .push(&NotificationEvent::UnreadCount { unread_count: 7 })
            .await;
        wait_for(&mut rx, |s| s.unread_count == 7).await;
    }

    #[tokio::test]
    async fn test_logout_closes_channel() {
        let (session, remote, identity) = started().await;
        let mut rx = session.subscribe();
        wait_for(&mut rx, |s| s.connection_state == ConnectionState::Open).await;

        identity.logout();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !remote.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        remote.set_state(ConnectionState::Closed).await;
        wait_for(&mut rx, |s| s.connection_state == ConnectionState::Closed).await;
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_prompt_when_socket_gone() {
        let (session, remote, _identity) = started().await;
        drop(remote);
        tokio::time::timeout(Duration::from_secs(5), session.close())
            .await
            .unwrap();
    }
}
