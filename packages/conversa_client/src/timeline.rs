//! Timeline reconciler
//!
//! Merges the live snapshot (`last_50_messages`), live echoes and paginated
//! history into one newest-first sequence. Echoes go on the head, history
//! pages on the tail, so the two never contend for the same end.

use std::collections::{HashSet, VecDeque};
use tracing::debug;

use crate::models::{MessagePage, MessageRecord};

/// Page 1 of history is the live snapshot, so backfill starts at page 2.
pub const FIRST_BACKFILL_PAGE: u32 = 2;

#[derive(Debug, Clone)]
pub struct Timeline {
    /// Newest first
    messages: VecDeque<MessageRecord>,
    ids: HashSet<String>,
    page_cursor: u32,
    has_more: bool,
    /// Page currently being fetched; at most one at a time
    in_flight: Option<u32>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            ids: HashSet::new(),
            page_cursor: FIRST_BACKFILL_PAGE,
            has_more: false,
            in_flight: None,
        }
    }

    /// `last_50_messages`: the payload becomes the whole timeline, in order.
    pub fn replace(&mut self, messages: Vec<MessageRecord>, has_more: bool) {
        self.ids = messages.iter().map(|m| m.id.clone()).collect();
        self.messages = messages.into();
        self.has_more = has_more;
    }

    /// `chat_message_echo`: newest message goes on the head.
    /// Returns false when the id is already present.
    pub fn prepend(&mut self, message: MessageRecord) -> bool {
        if !self.ids.insert(message.id.clone()) {
            debug!(id = %message.id, "Ignoring duplicate echo");
            return false;
        }
        self.messages.push_front(message);
        true
    }

    /// Claim the next history page. `None` when there is nothing more to
    /// fetch or a fetch is already outstanding.
    pub fn begin_backfill(&mut self) -> Option<u32> {
        if !self.has_more || self.in_flight.is_some() {
            return None;
        }
        self.in_flight = Some(self.page_cursor);
        Some(self.page_cursor)
    }

    /// Apply a fetched page to the tail. Returns how many messages were added.
    /// A page that was not the outstanding request is ignored.
    pub fn complete_backfill(&mut self, page: u32, result: MessagePage) -> usize {
        if self.in_flight != Some(page) {
            debug!(page, "Ignoring stale history page");
            return 0;
        }
        self.in_flight = None;

        let mut added = 0;
        for message in result.results {
            if self.ids.insert(message.id.clone()) {
                self.messages.push_back(message);
                added += 1;
            }
        }
        self.has_more = result.next.is_some();
        self.page_cursor += 1;
        added
    }

    /// A fetch failed: release the slot, leave everything else untouched.
    pub fn abandon_backfill(&mut self, page: u32) {
        if self.in_flight == Some(page) {
            self.in_flight = None;
        }
    }

    pub fn messages(&self) -> impl ExactSizeIterator<Item = &MessageRecord> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<MessageRecord> {
        self.messages.iter().cloned().collect()
    }

    pub fn newest(&self) -> Option<&MessageRecord> {
        self.messages.front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn page_cursor(&self) -> u32 {
        self.page_cursor
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_backfilling(&self) -> bool {
        self.in_flight.is_some()
    }
}
