//! Presence tracker: who is connected to the conversation channel right now.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    participants: BTreeSet<String>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// `online_user_list`: replace wholesale.
    pub fn replace<I>(&mut self, users: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.participants = users.into_iter().collect();
    }

    /// `user_join`. Returns whether the set changed.
    pub fn join(&mut self, user: String) -> bool {
        self.participants.insert(user)
    }

    /// `user_leave`. Returns whether the set changed.
    pub fn leave(&mut self, user: &str) -> bool {
        self.participants.remove(user)
    }

    pub fn is_online(&self, user: &str) -> bool {
        self.participants.contains(user)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
