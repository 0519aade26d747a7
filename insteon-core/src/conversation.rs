//! Per-node conversation state.
//!
//! A node is either idle or engaged in one named conversation. While a
//! conversation is active only messages queued under its label may be sent;
//! when idle only the default lane drains. A conversation nobody touches for
//! the configured timeout is abandoned.

use crate::queue::OutboundQueue;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, Instant};

/// Name of a conversation. The default label means idle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(Cow<'static, str>);

impl Label {
    pub const DEFAULT: Label = Label(Cow::Borrowed("default"));
    pub const QUERY_ALDB: Label = Label(Cow::Borrowed("query_aldb"));
    pub const ALL_LINK_SEND: Label = Label(Cow::Borrowed("all_link_send"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A conversation that timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub label: Label,
    pub idle_for: Duration,
}

#[derive(Debug)]
pub struct ConversationState {
    active: Label,
    touched: Option<Instant>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            active: Label::DEFAULT,
            touched: None,
        }
    }

    /// Label as last resolved, without evaluating the timeout.
    pub fn active(&self) -> &Label {
        &self.active
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_default()
    }

    /// Re-evaluates the state at `now`.
    ///
    /// An expired conversation reverts to idle and is returned. When idle,
    /// the pending label with the oldest head message becomes active.
    pub fn resolve(
        &mut self,
        now: Instant,
        timeout: Duration,
        queue: &OutboundQueue,
    ) -> Option<Expired> {
        let mut expired = None;

        if !self.active.is_default() {
            let idle_for = self
                .touched
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::MAX);
            if idle_for <= timeout {
                return None;
            }
            let label = std::mem::replace(&mut self.active, Label::DEFAULT);
            self.touched = None;
            expired = Some(Expired { label, idle_for });
        }

        if let Some(next) = queue.oldest_pending_label() {
            self.active = next;
            self.touched = Some(now);
        }

        expired
    }

    /// Keeps `label` alive if it is the active conversation.
    pub fn refresh(&mut self, label: &Label, now: Instant) {
        if !label.is_default() && self.active == *label {
            self.touched = Some(now);
        }
    }

    /// Ends `label` if it is the active conversation. Returns whether it was.
    pub fn release(&mut self, label: &Label) -> bool {
        if label.is_default() || self.active != *label {
            return false;
        }
        self.active = Label::DEFAULT;
        self.touched = None;
        true
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Delivery, MessageToken, Outbound};
    use insteon_protocol::{PlmCommand, PlmMessage};

    const TIMEOUT: Duration = Duration::from_secs(8);

    fn queue_with(label: Label, created: Instant) -> OutboundQueue {
        let mut queue = OutboundQueue::new();
        let message = PlmMessage::outbound(PlmCommand::PlmInfo, false).unwrap();
        queue.push_back(Outbound::new(
            MessageToken(1),
            message,
            label,
            Delivery::gateway_only(),
            created,
        ));
        queue
    }

    #[test]
    fn test_idle_picks_pending_label() {
        let now = Instant::now();
        let mut state = ConversationState::new();
        let queue = queue_with(Label::QUERY_ALDB, now);

        assert!(state.resolve(now, TIMEOUT, &queue).is_none());
        assert_eq!(state.active(), &Label::QUERY_ALDB);
    }

    #[test]
    fn test_refresh_keeps_conversation_alive() {
        let start = Instant::now();
        let mut state = ConversationState::new();
        let mut queue = queue_with(Label::QUERY_ALDB, start);
        state.resolve(start, TIMEOUT, &queue);
        queue.pop(&Label::QUERY_ALDB);

        for step in 1..=20u64 {
            let now = start + Duration::from_secs(step * 5);
            state.refresh(&Label::QUERY_ALDB, now);
            assert!(state.resolve(now, TIMEOUT, &queue).is_none());
            assert_eq!(state.active(), &Label::QUERY_ALDB);
        }
    }

    #[test]
    fn test_untouched_conversation_expires_once() {
        let start = Instant::now();
        let mut state = ConversationState::new();
        let mut queue = queue_with(Label::QUERY_ALDB, start);
        state.resolve(start, TIMEOUT, &queue);
        queue.pop(&Label::QUERY_ALDB);

        let later = start + Duration::from_secs(9);
        let expired = state.resolve(later, TIMEOUT, &queue).unwrap();
        assert_eq!(expired.label, Label::QUERY_ALDB);
        assert!(state.is_idle());

        assert!(state.resolve(later, TIMEOUT, &queue).is_none());
        assert!(state.resolve(later + TIMEOUT * 3, TIMEOUT, &queue).is_none());
        assert!(state.is_idle());
    }

    #[test]
    fn test_release_only_applies_to_active() {
        let now = Instant::now();
        let mut state = ConversationState::new();
        let queue = queue_with(Label::QUERY_ALDB, now);
        state.resolve(now, TIMEOUT, &queue);

        assert!(!state.release(&Label::ALL_LINK_SEND));
        assert_eq!(state.active(), &Label::QUERY_ALDB);
        assert!(state.release(&Label::QUERY_ALDB));
        assert!(state.is_idle());
    }

    #[test]
    fn test_refresh_does_not_change_state() {
        let now = Instant::now();
        let mut state = ConversationState::new();
        state.refresh(&Label::QUERY_ALDB, now);
        assert!(state.is_idle());
    }
}
