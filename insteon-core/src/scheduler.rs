//! Gateway send slot and acknowledgement timeouts.
//!
//! At most one message is in flight to the PLM. It is resolved in two tiers:
//! first the PLM echo (gateway ack), then, for device-directed sends, the
//! device's direct ack. Either tier times out independently and is retried a
//! bounded number of times before the message fails. Group sends instead hold
//! the slot under a sequence lock that ends without success or failure.

use crate::config::EngineConfig;
use crate::node::NodeId;
use crate::queue::Outbound;
use insteon_protocol::{MessageFlags, NackReason};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Acknowledgement tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckTier {
    Gateway,
    Device,
}

/// Why a message was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    GatewayAckTimeout,
    DeviceAckTimeout,
    GatewayNack,
    BadCommand,
    DeviceNack { reason: NackReason },
}

/// The message occupying the send slot.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub outbound: Outbound,
    pub origin: NodeId,
    pub sent_at: Instant,
    pub gateway_ack: bool,
    pub device_ack: bool,
}

impl InFlight {
    pub fn new(outbound: Outbound, origin: NodeId, sent_at: Instant) -> Self {
        Self {
            outbound,
            origin,
            sent_at,
            gateway_ack: false,
            device_ack: false,
        }
    }

    /// Whether every required acknowledgement has arrived.
    pub fn is_resolved(&self) -> bool {
        self.gateway_ack
            && self.outbound.delivery.seq_lock.is_none()
            && (!self.outbound.delivery.expects_device_ack || self.device_ack)
    }
}

/// Outcome of an unacked check.
#[derive(Debug)]
pub enum UnackedAction {
    None,
    /// The message timed out and must be queued again at the head of its
    /// node's lane.
    Resend {
        origin: NodeId,
        outbound: Outbound,
        tier: AckTier,
    },
    Failed {
        origin: NodeId,
        outbound: Outbound,
        reason: FailureReason,
    },
    /// A sequence lock ran out; the message is neither acked nor failed.
    LockReleased { origin: NodeId, outbound: Outbound },
}

/// Single transmit slot of one gateway.
#[derive(Debug, Default)]
pub struct SendSlot {
    current: Option<InFlight>,
    hold_until: Option<Instant>,
}

impl SendSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }

    /// Whether a new message may be transmitted at `now`.
    pub fn can_send(&self, now: Instant) -> bool {
        self.current.is_none() && self.hold_until.map_or(true, |until| now >= until)
    }

    /// Extends the transmit hold by `delay`. Holds accumulate onto a deadline
    /// that is still in the future.
    pub fn hold_for(&mut self, now: Instant, delay: Duration) {
        let base = match self.hold_until {
            Some(until) if until > now => until,
            _ => now,
        };
        self.hold_until = Some(base + delay);
    }

    pub fn hold_until(&self) -> Option<Instant> {
        self.hold_until
    }

    pub fn occupy(&mut self, in_flight: InFlight) {
        self.current = Some(in_flight);
    }

    pub fn current(&self) -> Option<&InFlight> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut InFlight> {
        self.current.as_mut()
    }

    /// Vacates the slot.
    pub fn take(&mut self) -> Option<InFlight> {
        self.current.take()
    }

    /// Vacates the slot if every acknowledgement arrived.
    pub fn take_if_resolved(&mut self) -> Option<InFlight> {
        if self.current.as_ref().is_some_and(InFlight::is_resolved) {
            self.current.take()
        } else {
            None
        }
    }

    /// Applies the gateway and device ack timeouts to the in-flight message.
    pub fn check_unacked(&mut self, now: Instant, config: &EngineConfig) -> UnackedAction {
        let Some(current) = self.current.as_ref() else {
            return UnackedAction::None;
        };
        let elapsed = now.saturating_duration_since(current.sent_at);

        if !current.gateway_ack {
            if elapsed <= config.gateway_ack_timeout() {
                return UnackedAction::None;
            }
            return self.expire(AckTier::Gateway, config);
        }

        if let Some(lock) = current.outbound.delivery.seq_lock {
            if elapsed < lock {
                return UnackedAction::None;
            }
            return match self.current.take() {
                Some(InFlight {
                    outbound, origin, ..
                }) => UnackedAction::LockReleased { origin, outbound },
                None => UnackedAction::None,
            };
        }

        if current.outbound.delivery.expects_device_ack && !current.device_ack {
            let flags = current
                .outbound
                .message
                .insteon()
                .map(|m| m.flags())
                .unwrap_or(MessageFlags::from_byte(0));
            let timeout = config.device_ack_timeout(
                flags.extended,
                flags.max_hops,
                current.outbound.device_retries,
            );
            if elapsed <= timeout {
                return UnackedAction::None;
            }
            return self.expire(AckTier::Device, config);
        }

        UnackedAction::None
    }

    fn expire(&mut self, tier: AckTier, config: &EngineConfig) -> UnackedAction {
        let Some(InFlight {
            mut outbound, origin, ..
        }) = self.current.take()
        else {
            return UnackedAction::None;
        };

        let (retries, limit) = match tier {
            AckTier::Gateway => (&mut outbound.gateway_retries, config.max_gateway_retries),
            AckTier::Device => (&mut outbound.device_retries, config.max_device_retries),
        };
        if *retries >= limit {
            let reason = match tier {
                AckTier::Gateway => FailureReason::GatewayAckTimeout,
                AckTier::Device => FailureReason::DeviceAckTimeout,
            };
            return UnackedAction::Failed {
                origin,
                outbound,
                reason,
            };
        }
        *retries += 1;
        if tier == AckTier::Device {
            widen_hops(&mut outbound);
        }
        UnackedAction::Resend {
            origin,
            outbound,
            tier,
        }
    }
}

/// Adds one hop to both hop counters of a device send, up to the maximum.
pub fn widen_hops(outbound: &mut Outbound) {
    let Some(mut flags) = outbound.message.insteon().map(|m| m.flags()) else {
        return;
    };
    flags.max_hops = (flags.max_hops + 1).min(MessageFlags::MAX_HOPS);
    flags.hops_left = (flags.hops_left + 1).min(MessageFlags::MAX_HOPS);
    if let Err(e) = outbound.message.set_flags(flags) {
        tracing::warn!("Failed to widen hops of {}: {}", outbound.token, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Label;
    use crate::queue::{Delivery, MessageToken};
    use insteon_protocol::{Address, Field, MessageType, PlmCommand, PlmMessage};

    fn gateway_message(now: Instant) -> Outbound {
        let message = PlmMessage::outbound(PlmCommand::PlmInfo, false).unwrap();
        Outbound::new(MessageToken(1), message, Label::DEFAULT, Delivery::gateway_only(), now)
    }

    fn device_message(now: Instant, hops: u8) -> Outbound {
        let mut message = PlmMessage::outbound(PlmCommand::InsteonSend, false).unwrap();
        message.set_flags(MessageFlags::new(MessageType::Direct, false, hops)).unwrap();
        message.set(Field::Cmd1, 0x11).unwrap();
        Outbound::new(MessageToken(2), message, Label::DEFAULT, Delivery::device("on"), now)
    }

    fn device() -> NodeId {
        NodeId::Device(Address::new(0x11, 0x22, 0x33))
    }

    #[test]
    fn test_hold_accumulates() {
        let now = Instant::now();
        let mut slot = SendSlot::new();
        assert!(slot.can_send(now));
        slot.hold_for(now, Duration::from_millis(20));
        slot.hold_for(now, Duration::from_millis(500));
        assert!(!slot.can_send(now + Duration::from_millis(519)));
        assert!(slot.can_send(now + Duration::from_millis(520)));

        // a stale hold restarts from now
        let later = now + Duration::from_secs(5);
        slot.hold_for(later, Duration::from_millis(20));
        assert_eq!(slot.hold_until(), Some(later + Duration::from_millis(20)));
    }

    #[test]
    fn test_pending_slot_blocks_send() {
        let now = Instant::now();
        let mut slot = SendSlot::new();
        slot.occupy(InFlight::new(gateway_message(now), NodeId::Gateway, now));
        assert!(slot.is_pending());
        assert!(!slot.can_send(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_gateway_retry_bound() {
        let config = EngineConfig::default();
        let mut now = Instant::now();
        let mut slot = SendSlot::new();
        let mut outbound = gateway_message(now);
        let mut resends = 0;

        loop {
            slot.occupy(InFlight::new(outbound, NodeId::Gateway, now));
            assert!(matches!(
                slot.check_unacked(now + Duration::from_millis(75), &config),
                UnackedAction::None
            ));
            now += Duration::from_millis(76);
            match slot.check_unacked(now, &config) {
                UnackedAction::Resend { outbound: o, tier, .. } => {
                    assert_eq!(tier, AckTier::Gateway);
                    resends += 1;
                    outbound = o;
                }
                UnackedAction::Failed { outbound: o, reason, .. } => {
                    assert_eq!(reason, FailureReason::GatewayAckTimeout);
                    assert_eq!(o.gateway_retries, 3);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(resends, 3);
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_device_retry_widens_hops() {
        let config = EngineConfig::default();
        let now = Instant::now();
        let mut slot = SendSlot::new();
        let mut in_flight = InFlight::new(device_message(now, 1), device(), now);
        in_flight.gateway_ack = true;
        slot.occupy(in_flight);

        let timeout = config.device_ack_timeout(false, 1, 0);
        assert!(matches!(slot.check_unacked(now + timeout, &config), UnackedAction::None));
        match slot.check_unacked(now + timeout + Duration::from_millis(1), &config) {
            UnackedAction::Resend { outbound, tier, .. } => {
                assert_eq!(tier, AckTier::Device);
                assert_eq!(outbound.device_retries, 1);
                let flags = outbound.message.insteon().unwrap().flags();
                assert_eq!((flags.max_hops, flags.hops_left), (2, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_device_ack_resolves() {
        let now = Instant::now();
        let mut slot = SendSlot::new();
        let mut in_flight = InFlight::new(device_message(now, 3), device(), now);
        in_flight.gateway_ack = true;
        slot.occupy(in_flight);
        assert!(slot.take_if_resolved().is_none());

        slot.current_mut().unwrap().device_ack = true;
        assert!(slot.take_if_resolved().is_some());
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_sequence_lock_releases_without_outcome() {
        let config = EngineConfig::default();
        let now = Instant::now();
        let mut outbound = gateway_message(now);
        outbound.delivery.seq_lock = Some(Duration::from_secs(5));

        let mut slot = SendSlot::new();
        let mut in_flight = InFlight::new(outbound, NodeId::Gateway, now);
        in_flight.gateway_ack = true;
        slot.occupy(in_flight);

        assert!(slot.take_if_resolved().is_none());
        assert!(matches!(
            slot.check_unacked(now + Duration::from_millis(4999), &config),
            UnackedAction::None
        ));
        assert!(matches!(
            slot.check_unacked(now + Duration::from_secs(5), &config),
            UnackedAction::LockReleased { .. }
        ));
        assert!(!slot.is_pending());
    }
}
