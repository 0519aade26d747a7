//! Per-node outbound queues, one FIFO lane per conversation label.

use crate::conversation::Label;
use insteon_protocol::PlmMessage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Correlation token attached to a message when it is queued. Acks are
/// matched against the token of the in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageToken(pub u64);

impl fmt::Display for MessageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What must happen before a sent message counts as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Device command name, for device-directed sends.
    pub command: Option<&'static str>,
    /// Whether the end device must ack after the PLM echo.
    pub expects_device_ack: bool,
    /// Keeps the send slot busy this long after the echo.
    pub seq_lock: Option<Duration>,
}

impl Delivery {
    /// The PLM echo alone resolves the message.
    pub fn gateway_only() -> Self {
        Self {
            command: None,
            expects_device_ack: false,
            seq_lock: None,
        }
    }

    pub fn device(command: &'static str) -> Self {
        Self {
            command: Some(command),
            expects_device_ack: true,
            seq_lock: None,
        }
    }
}

/// A message waiting for transmission.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub token: MessageToken,
    pub message: PlmMessage,
    pub created: Instant,
    pub label: Label,
    pub delivery: Delivery,
    pub gateway_retries: u8,
    pub device_retries: u8,
}

impl Outbound {
    pub fn new(
        token: MessageToken,
        message: PlmMessage,
        label: Label,
        delivery: Delivery,
        created: Instant,
    ) -> Self {
        Self {
            token,
            message,
            created,
            label,
            delivery,
            gateway_retries: 0,
            device_retries: 0,
        }
    }
}

/// Outbound messages of one node.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    lanes: Vec<(Label, VecDeque<Outbound>)>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the lane of the message's label.
    pub fn push_back(&mut self, outbound: Outbound) {
        let lane = self.lane_mut(&outbound.label);
        lane.push_back(outbound);
    }

    /// Puts a message back at the head of its lane.
    pub fn push_front(&mut self, outbound: Outbound) {
        let lane = self.lane_mut(&outbound.label);
        lane.push_front(outbound);
    }

    pub fn head(&self, label: &Label) -> Option<&Outbound> {
        self.lane(label).and_then(VecDeque::front)
    }

    pub fn pop(&mut self, label: &Label) -> Option<Outbound> {
        self.lanes
            .iter_mut()
            .find(|(l, _)| l == label)
            .and_then(|(_, lane)| lane.pop_front())
    }

    /// Non-default label whose head message is oldest. Ties go to the lane
    /// created first.
    pub fn oldest_pending_label(&self) -> Option<Label> {
        let mut best: Option<(&Label, Instant)> = None;
        for (label, lane) in &self.lanes {
            if label.is_default() {
                continue;
            }
            if let Some(head) = lane.front() {
                if best.map_or(true, |(_, created)| head.created < created) {
                    best = Some((label, head.created));
                }
            }
        }
        best.map(|(label, _)| label.clone())
    }

    pub fn pending(&self, label: &Label) -> impl Iterator<Item = &Outbound> {
        self.lane(label).into_iter().flat_map(|lane| lane.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.lanes.iter().flat_map(|(_, lane)| lane.iter())
    }

    /// Keeps only messages for which `keep` returns true. Returns how many
    /// were removed.
    pub fn retain<F: FnMut(&Outbound) -> bool>(&mut self, mut keep: F) -> usize {
        let mut removed = 0;
        for (_, lane) in &mut self.lanes {
            let before = lane.len();
            lane.retain(|o| keep(o));
            removed += before - lane.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|(_, lane)| lane.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lane(&self, label: &Label) -> Option<&VecDeque<Outbound>> {
        self.lanes.iter().find(|(l, _)| l == label).map(|(_, lane)| lane)
    }

    fn lane_mut(&mut self, label: &Label) -> &mut VecDeque<Outbound> {
        let pos = match self.lanes.iter().position(|(l, _)| l == label) {
            Some(pos) => pos,
            None => {
                self.lanes.push((label.clone(), VecDeque::new()));
                self.lanes.len() - 1
            }
        };
        &mut self.lanes[pos].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insteon_protocol::PlmCommand;

    fn outbound(token: u64, label: Label, created: Instant) -> Outbound {
        let message = PlmMessage::outbound(PlmCommand::PlmInfo, false).unwrap();
        Outbound::new(MessageToken(token), message, label, Delivery::gateway_only(), created)
    }

    #[test]
    fn test_fifo_within_label() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new();
        queue.push_back(outbound(1, Label::DEFAULT, now));
        queue.push_back(outbound(2, Label::DEFAULT, now));
        queue.push_front(outbound(3, Label::DEFAULT, now));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop(&Label::DEFAULT))
            .map(|o| o.token.0)
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_oldest_pending_label_skips_default() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new();
        queue.push_back(outbound(1, Label::DEFAULT, now));
        assert_eq!(queue.oldest_pending_label(), None);

        queue.push_back(outbound(2, Label::new("b"), now + Duration::from_millis(5)));
        queue.push_back(outbound(3, Label::new("a"), now + Duration::from_millis(1)));
        assert_eq!(queue.oldest_pending_label(), Some(Label::new("a")));
    }

    #[test]
    fn test_retain_counts_removed() {
        let now = Instant::now();
        let mut queue = OutboundQueue::new();
        for token in 0..4 {
            queue.push_back(outbound(token, Label::DEFAULT, now));
        }
        assert_eq!(queue.retain(|o| o.token.0 % 2 == 0), 2);
        assert_eq!(queue.len(), 2);
    }
}
