//! Typing coordinator
//!
//! Local side: a two-state debounce. The first keystroke after `Idle` sends
//! `typing:true` and arms the quiet-period timer; later keystrokes only push
//! the deadline out. Expiry (or a submit) sends `typing:false`.
//!
//! Remote side: the other participant's flag is taken as-is from inbound
//! `typing` frames. Its expiry is the sender's responsibility.

use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::OutboundEnvelope;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LocalTyping {
    #[default]
    Idle,
    Typing,
}

/// A single cancellable deadline. Arming replaces any previous deadline.
#[derive(Debug, Default)]
pub struct TypingTimer {
    deadline: Option<Instant>,
}

impl TypingTimer {
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the deadline; never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug)]
pub struct TypingCoordinator {
    me: String,
    timeout: Duration,
    local: LocalTyping,
    timer: TypingTimer,
    remote_typing: bool,
}

impl TypingCoordinator {
    pub fn new(me: impl Into<String>, timeout: Duration) -> Self {
        Self {
            me: me.into(),
            timeout,
            local: LocalTyping::Idle,
            timer: TypingTimer::default(),
            remote_typing: false,
        }
    }

    /// A change in the message input.
    pub fn on_input(&mut self) -> Option<OutboundEnvelope> {
        self.timer.cancel();
        self.timer.arm(self.timeout);
        match self.local {
            LocalTyping::Idle => {
                self.local = LocalTyping::Typing;
                Some(OutboundEnvelope::Typing { typing: true })
            }
            LocalTyping::Typing => None,
        }
    }

    /// The quiet period elapsed.
    pub fn on_timer_expired(&mut self) -> Option<OutboundEnvelope> {
        self.timer.cancel();
        self.stop()
    }

    /// A message is about to be sent; stop typing first.
    pub fn on_submit(&mut self) -> Option<OutboundEnvelope> {
        self.timer.cancel();
        self.stop()
    }

    fn stop(&mut self) -> Option<OutboundEnvelope> {
        match self.local {
            LocalTyping::Typing => {
                self.local = LocalTyping::Idle;
                Some(OutboundEnvelope::Typing { typing: false })
            }
            LocalTyping::Idle => None,
        }
    }

    /// Inbound `typing` frame. Our own echo is ignored. Returns whether the
    /// displayed flag changed.
    pub fn on_remote(&mut self, user: &str, typing: bool) -> bool {
        if user == self.me {
            return false;
        }
        let changed = self.remote_typing != typing;
        self.remote_typing = typing;
        changed
    }

    /// The `typing:true` from [`on_input`](Self::on_input) never went out.
    /// Back to `Idle` so the next keystroke tries again.
    pub fn start_refused(&mut self) {
        self.timer.cancel();
        self.local = LocalTyping::Idle;
    }

    /// Drop the pending timer without emitting anything (teardown).
    pub fn reset(&mut self) {
        self.timer.cancel();
        self.local = LocalTyping::Idle;
        self.remote_typing = false;
    }

    pub fn local(&self) -> LocalTyping {
        self.local
    }

    pub fn remote_typing(&self) -> bool {
        self.remote_typing
    }

    pub fn timer(&self) -> &TypingTimer {
        &self.timer
    }
}
