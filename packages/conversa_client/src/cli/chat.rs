use anyhow::{Context, Result};
use std::collections::HashSet;
use tokio::io::{AsyncBufReadExt, BufReader};

use conversa_client::{
    ChatClient, ClientConfig, ClientError, ConnectionState, ConversationSnapshot, MessageRecord,
};

/// A line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput {
    Quit,
    More,
    Typing,
    Message(String),
}

pub fn parse_input(line: &str) -> ChatInput {
    match line.trim_end_matches(['\r', '\n']) {
        "/quit" => ChatInput::Quit,
        "/more" => ChatInput::More,
        "/typing" => ChatInput::Typing,
        text => ChatInput::Message(text.to_string()),
    }
}

/// Turns successive snapshots into the lines to print since the last one.
pub struct ChatView {
    other: String,
    seen: HashSet<String>,
    last: Option<ConversationSnapshot>,
}

impl ChatView {
    pub fn new(other: impl Into<String>) -> Self {
        Self {
            other: other.into(),
            seen: HashSet::new(),
            last: None,
        }
    }

    pub fn render(&mut self, snap: &ConversationSnapshot) -> Vec<String> {
        let mut out = Vec::new();
        let last = self.last.take();

        if last.as_ref().map(|l| l.connection_state) != Some(snap.connection_state) {
            out.push(format!(
                "[The WebSocket is currently {}]",
                snap.connection_state.label()
            ));
        }

        // Unseen messages ahead of the first known one are new arrivals;
        // unseen ones behind it came from history.
        let first_known = snap
            .messages
            .iter()
            .position(|m| self.seen.contains(&m.id))
            .unwrap_or(snap.messages.len());
        let older = snap.messages[first_known..]
            .iter()
            .filter(|m| !self.seen.contains(&m.id))
            .count();
        if older > 0 {
            out.push(format!("[loaded {} older messages]", older));
        }
        for message in snap.messages[..first_known].iter().rev() {
            out.push(format_message(message));
        }
        self.seen.extend(snap.messages.iter().map(|m| m.id.clone()));

        let was_online = last.as_ref().is_some_and(|l| l.other_online);
        if snap.other_online != was_online {
            let status = if snap.other_online { "online" } else { "offline" };
            out.push(format!("[{} is {}]", self.other, status));
        }

        let was_typing = last.as_ref().is_some_and(|l| l.remote_typing);
        if snap.remote_typing && !was_typing {
            out.push(format!("[{} is typing...]", self.other));
        }

        let had_more = last.as_ref().is_some_and(|l| l.has_more_history);
        if snap.has_more_history && !had_more {
            out.push("[older messages available, /more to load]".to_string());
        }

        self.last = Some(snap.clone());
        out
    }
}

fn format_message(message: &MessageRecord) -> String {
    format!(
        "{} {}: {}",
        message.timestamp.format("%H:%M"),
        message.from_user.username,
        message.content
    )
}

pub async fn chat_command(config: ClientConfig, other: &str) -> Result<()> {
    let mut client = ChatClient::new(config)?;
    let me = client
        .session()
        .require()
        .context("Not logged in, run `conversa login <username>` first")?;

    let mut unread = client.ensure_notifications()?.subscribe();
    let conversation = client.open_conversation(other).await?;
    let mut snapshots = conversation.subscribe();
    let mut view = ChatView::new(other);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "[chatting with {} as {}; /more loads history, /typing, /quit leaves]",
        other, me.username
    );

    loop {
        tokio::select! {
            Ok(()) = snapshots.changed() => {
                let snap = snapshots.borrow_and_update().clone();
                for line in view.render(&snap) {
                    println!("{}", line);
                }
                if snap.connection_state == ConnectionState::Closed {
                    break;
                }
            }

            Ok(()) = unread.changed() => {
                let count = unread.borrow_and_update().unread_count;
                println!("[unread: {}]", count);
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    ChatInput::Quit => break,
                    ChatInput::More => conversation.load_older().await,
                    ChatInput::Typing => conversation.input().await,
                    ChatInput::Message(text) => match conversation.submit(text).await {
                        Ok(()) => {}
                        Err(ClientError::Validation(reason)) => eprintln!("[not sent: {}]", reason),
                        Err(e) => eprintln!("[not sent: {}]", e),
                    },
                }
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
