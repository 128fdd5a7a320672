//! Conversation session
//!
//! One session per open conversation view. `ConversationState` is the pure
//! reducer over inbound envelopes; `ConversationSession` owns the socket and
//! runs the event loop that feeds it: inbound frames, user commands, the
//! typing timer and the (single) outstanding history fetch are all handled
//! sequentially on one task. Observers read `ConversationSnapshot`s through
//! a `watch` channel.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::HistorySource;
use crate::config::{ChatConfig, ServerConfig};
use crate::connection::{Connection, ConnectionEvent, ConnectionState};
use crate::error::{ClientError, MessageRejected, Result};
use crate::models::{ConversationId, MessagePage, MessageRecord};
use crate::presence::Presence;
use crate::protocol::{ConversationEvent, OutboundEnvelope, decode_inbound};
use crate::session::{Identity, SessionContext};
use crate::timeline::Timeline;
use crate::typing::TypingCoordinator;

/// Refuse empty or over-long messages. Length is counted in characters.
pub fn validate_outgoing(text: &str, max_len: usize) -> Result<(), MessageRejected> {
    if text.is_empty() {
        return Err(MessageRejected::Empty);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(MessageRejected::TooLong { len, max: max_len });
    }
    Ok(())
}

/// What the view layer renders for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    pub connection_state: ConnectionState,
    /// Newest first
    pub messages: Vec<MessageRecord>,
    pub has_more_history: bool,
    pub page_cursor: u32,
    pub backfill_in_flight: bool,
    pub participants: Vec<String>,
    /// Whether the other participant is connected to this conversation
    pub other_online: bool,
    /// Whether the other participant is currently typing
    pub remote_typing: bool,
}

/// Derived state of one conversation, driven by inbound envelopes.
#[derive(Debug)]
pub struct ConversationState {
    id: ConversationId,
    me: String,
    connection: ConnectionState,
    timeline: Timeline,
    presence: Presence,
    typing: TypingCoordinator,
}

impl ConversationState {
    pub fn new(id: ConversationId, me: impl Into<String>, chat: &ChatConfig) -> Self {
        let me = me.into();
        Self {
            id,
            typing: TypingCoordinator::new(me.clone(), chat.typing_timeout),
            me,
            connection: ConnectionState::Uninstantiated,
            timeline: Timeline::new(),
            presence: Presence::new(),
        }
    }

    pub fn apply(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::Last50Messages { messages, has_more } => {
                debug!(conversation = %self.id, count = messages.len(), has_more, "Initial messages");
                self.timeline.replace(messages, has_more);
            }
            ConversationEvent::ChatMessageEcho { message } => {
                self.timeline.prepend(message);
            }
            ConversationEvent::UserJoin { user } => {
                self.presence.join(user);
            }
            ConversationEvent::UserLeave { user } => {
                self.presence.leave(&user);
            }
            ConversationEvent::OnlineUserList { users } => {
                self.presence.replace(users);
            }
            ConversationEvent::Typing { user, typing } => {
                self.typing.on_remote(&user, typing);
            }
            ConversationEvent::Unknown => {
                warn!(conversation = %self.id, "Unknown message type, discarding");
            }
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            debug!(conversation = %self.id, state = %state, "Connection state");
            self.connection = state;
        }
    }

    pub fn other_participant(&self) -> Option<&str> {
        self.id.other_participant(&self.me)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.id.clone(),
            connection_state: self.connection,
            messages: self.timeline.to_vec(),
            has_more_history: self.timeline.has_more(),
            page_cursor: self.timeline.page_cursor(),
            backfill_in_flight: self.timeline.is_backfilling(),
            participants: self.presence.iter().map(str::to_string).collect(),
            other_online: self
                .other_participant()
                .is_some_and(|other| self.presence.is_online(other)),
            remote_typing: self.typing.remote_typing(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    pub fn typing_mut(&mut self) -> &mut TypingCoordinator {
        &mut self.typing
    }
}

enum Command {
    Input,
    Submit {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    LoadOlder,
}

type PendingPage = BoxFuture<'static, (u32, Result<MessagePage>)>;

/// Handle to a running conversation session. Dropping it closes the socket.
pub struct ConversationSession {
    id: ConversationId,
    me: String,
    token: String,
    max_message_len: usize,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ConversationSnapshot>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConversationSession {
    /// Open the conversation with `other` as the current identity.
    pub fn open(
        session: &SessionContext,
        other: &str,
        server: &ServerConfig,
        chat: &ChatConfig,
        history: Arc<dyn HistorySource>,
    ) -> Result<Self> {
        let identity = session.require()?;
        let id = ConversationId::between(&identity.username, other);
        let url = server.conversation_socket_url(&id, &identity.token)?;
        let conn = Connection::open(url, chat.channel_capacity);
        info!(conversation = %id, "Opening conversation");
        Ok(Self::start(
            id,
            identity,
            session.subscribe(),
            conn,
            chat,
            history,
        ))
    }

    pub(crate) fn start(
        id: ConversationId,
        identity: Identity,
        identity_rx: watch::Receiver<Option<Identity>>,
        conn: Connection,
        chat: &ChatConfig,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        let state = ConversationState::new(id.clone(), identity.username.clone(), chat);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (command_tx, command_rx) = mpsc::channel(chat.channel_capacity);
        let cancel = CancellationToken::new();

        let runner = Runner {
            state,
            conn,
            token: identity.token.clone(),
            identity: identity_rx,
            commands: command_rx,
            snapshot: snapshot_tx,
            history,
            pending_page: None,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run());

        Self {
            id,
            me: identity.username,
            token: identity.token,
            max_message_len: chat.max_message_len,
            commands: command_tx,
            snapshot: snapshot_rx,
            cancel,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Username of the other participant.
    pub fn other(&self) -> Option<&str> {
        self.id.other_participant(&self.me)
    }

    /// Whether this session was opened with `identity`'s token.
    pub fn belongs_to(&self, identity: &Identity) -> bool {
        self.token == identity.token
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshot.clone()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// The message input changed.
    pub async fn input(&self) {
        let _ = self.commands.send(Command::Input).await;
    }

    /// Send a chat message. Invalid text is refused before anything is sent.
    /// The message becomes visible only once the server echoes it.
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        validate_outgoing(&text, self.max_message_len)?;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit { text, reply })
            .await
            .map_err(|_| ClientError::NotConnected)?;
        rx.await.map_err(|_| ClientError::NotConnected)?
    }

    /// Request the next page of older history. Ignored while a fetch is
    /// outstanding or when the server reported no more pages.
    pub async fn load_older(&self) {
        let _ = self.commands.send(Command::LoadOlder).await;
    }

    /// Close the socket and wait for the loop to finish. Pending history
    /// fetches and the typing timer are discarded.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Runner {
    state: ConversationState,
    conn: Connection,
    token: String,
    identity: watch::Receiver<Option<Identity>>,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<ConversationSnapshot>,
    history: Arc<dyn HistorySource>,
    pending_page: Option<PendingPage>,
    cancel: CancellationToken,
}

/// Resolves with the outstanding page fetch, or never if there is none.
async fn next_page(pending: &mut Option<PendingPage>) -> (u32, Result<MessagePage>) {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

impl Runner {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                changed = self.identity.changed() => {
                    let current = changed.ok().and_then(|_| {
                        self.identity.borrow_and_update().as_ref().map(|i| i.token.clone())
                    });
                    if current.as_deref() != Some(self.token.as_str()) {
                        info!(conversation = %self.state.id(), "Identity changed, closing conversation");
                        break;
                    }
                }

                event = self.conn.next_event() => match event {
                    Some(ConnectionEvent::State(state)) => self.state.set_connection(state),
                    Some(ConnectionEvent::Text(text)) => {
                        if let Some(event) = decode_inbound::<ConversationEvent>("conversation", &text) {
                            self.state.apply(event);
                        }
                    }
                    None => {
                        self.state.set_connection(ConnectionState::Closed);
                        self.publish();
                        break;
                    }
                },

                Some(command) = self.commands.recv() => self.handle_command(command),

                _ = self.state.typing().timer().expired(), if self.state.typing().timer().is_armed() => {
                    if let Some(envelope) = self.state.typing_mut().on_timer_expired() {
                        self.send(&envelope);
                    }
                }

                (page, result) = next_page(&mut self.pending_page), if self.pending_page.is_some() => {
                    self.pending_page = None;
                    self.finish_backfill(page, result);
                }
            }
            self.publish();
        }

        self.shutdown().await;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Input => {
                if let Some(envelope) = self.state.typing_mut().on_input() {
                    if !self.send(&envelope) {
                        self.state.typing_mut().start_refused();
                    }
                }
            }
            Command::Submit { text, reply } => {
                if let Some(envelope) = self.state.typing_mut().on_submit() {
                    self.send(&envelope);
                }
                let result = self.conn.send(&OutboundEnvelope::ChatMessage { message: text });
                let _ = reply.send(result);
            }
            Command::LoadOlder => self.begin_backfill(),
        }
    }

    fn begin_backfill(&mut self) {
        let Some(page) = self.state.timeline_mut().begin_backfill() else {
            debug!(conversation = %self.state.id(), "Backfill not needed or already in flight");
            return;
        };
        debug!(conversation = %self.state.id(), page, "Fetching history page");
        let fetch = self.history.fetch_page(self.state.id(), page);
        self.pending_page = Some(Box::pin(async move { (page, fetch.await) }));
    }

    fn finish_backfill(&mut self, page: u32, result: Result<MessagePage>) {
        match result {
            Ok(messages) => {
                let added = self.state.timeline_mut().complete_backfill(page, messages);
                debug!(conversation = %self.state.id(), page, added, "History page applied");
            }
            Err(e) => {
                warn!(conversation = %self.state.id(), page, "History fetch failed: {}", e);
                self.state.timeline_mut().abandon_backfill(page);
            }
        }
    }

    /// Whether the envelope was handed to the socket.
    fn send(&self, envelope: &OutboundEnvelope) -> bool {
        match self.conn.send(envelope) {
            Ok(()) => true,
            Err(e) => {
                debug!(conversation = %self.state.id(), "Dropped outbound envelope: {}", e);
                false
            }
        }
    }

    fn publish(&self) {
        let next = self.state.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn shutdown(mut self) {
        self.pending_page = None;
        self.state.typing_mut().reset();
        self.conn.close();

        if self.conn.state() != ConnectionState::Closed {
            // Drain until the socket task reports it is done
            self.state.set_connection(ConnectionState::Closing);
            self.publish();
            while let Some(event) = self.conn.next_event().await {
                if event == ConnectionEvent::State(ConnectionState::Closed) {
                    break;
                }
            }
        }
        self.state.set_connection(ConnectionState::Closed);
        self.publish();
        info!(conversation = %self.state.id(), "Conversation closed");
    }
}
