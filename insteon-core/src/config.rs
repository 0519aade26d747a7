//! Protocol engine tuning.
//!
//! Defaults come from real world PLM behaviour: 75 ms for the modem to echo
//! a frame, 87 ms (standard) or 183 ms (extended) per hop across the mesh.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and retry parameters of one protocol engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long the PLM may take to echo a frame.
    pub gateway_ack_timeout_ms: u64,
    /// Resends after a missing PLM echo before the message fails.
    pub max_gateway_retries: u8,
    /// Resends after a missing device ack before the message fails.
    pub max_device_retries: u8,
    pub standard_hop_delay_ms: u64,
    pub extended_hop_delay_ms: u64,
    /// Time a device needs to process a message before acking.
    pub device_overhead_ms: u64,
    /// Idle time after which a conversation is abandoned.
    pub conversation_timeout_ms: u64,
    /// Transmit hold after the PLM busy sentinel.
    pub busy_backoff_ms: u64,
    /// Transmit hold after a NACK or bad-command echo.
    pub nack_backoff_ms: u64,
    /// Transmit hold added by every received frame.
    pub inbound_hold_ms: u64,
    /// Sequence lock of an all-link group send.
    pub group_send_lock_ms: u64,
    /// Transmit hold after the PLM acks an X10 frame.
    pub x10_send_hold_ms: u64,
    /// Lifetime of engine-registered triggers; `None` keeps them until matched.
    pub trigger_ttl_ms: Option<u64>,
    pub hops: HopConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_ack_timeout_ms: 75,
            max_gateway_retries: 3,
            max_device_retries: 3,
            standard_hop_delay_ms: 87,
            extended_hop_delay_ms: 183,
            device_overhead_ms: 100,
            conversation_timeout_ms: 8_000,
            busy_backoff_ms: 500,
            nack_backoff_ms: 500,
            inbound_hold_ms: 20,
            group_send_lock_ms: 5_000,
            x10_send_hold_ms: 500,
            trigger_ttl_ms: Some(30_000),
            hops: HopConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn gateway_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_ack_timeout_ms)
    }

    /// Per-hop delay for standard or extended messages.
    pub fn hop_delay(&self, extended: bool) -> Duration {
        Duration::from_millis(if extended {
            self.extended_hop_delay_ms
        } else {
            self.standard_hop_delay_ms
        })
    }

    pub fn device_overhead(&self) -> Duration {
        Duration::from_millis(self.device_overhead_ms)
    }

    pub fn conversation_timeout(&self) -> Duration {
        Duration::from_millis(self.conversation_timeout_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn nack_backoff(&self) -> Duration {
        Duration::from_millis(self.nack_backoff_ms)
    }

    pub fn inbound_hold(&self) -> Duration {
        Duration::from_millis(self.inbound_hold_ms)
    }

    pub fn group_send_lock(&self) -> Duration {
        Duration::from_millis(self.group_send_lock_ms)
    }

    pub fn x10_send_hold(&self) -> Duration {
        Duration::from_millis(self.x10_send_hold_ms)
    }

    pub fn trigger_ttl(&self) -> Option<Duration> {
        self.trigger_ttl_ms.map(Duration::from_millis)
    }

    /// Device ack deadline measured from the send time:
    /// `(retries + 1) * 2 * max_hops * hop_delay + overhead`.
    pub fn device_ack_timeout(&self, extended: bool, max_hops: u8, device_retries: u8) -> Duration {
        let multiplier = u32::from(device_retries) + 1;
        self.hop_delay(extended) * (multiplier * 2 * u32::from(max_hops)) + self.device_overhead()
    }
}

/// Constants of the hop-count heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HopConfig {
    /// Number of recent observations averaged.
    pub window: usize,
    /// Hop count used before anything was observed.
    pub default_hops: u8,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            window: 10,
            default_hops: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.gateway_ack_timeout(), Duration::from_millis(75));
        assert_eq!(config.conversation_timeout(), Duration::from_secs(8));
        assert_eq!(config.hop_delay(false), Duration::from_millis(87));
        assert_eq!(config.hop_delay(true), Duration::from_millis(183));
        assert_eq!(config.x10_send_hold(), Duration::from_millis(500));
        assert_eq!(config.hops.window, 10);
        assert_eq!(config.hops.default_hops, 3);
    }

    #[test]
    fn test_device_ack_timeout_grows_with_retries() {
        let config = EngineConfig::default();
        assert_eq!(
            config.device_ack_timeout(false, 3, 0),
            Duration::from_millis(2 * 3 * 87 + 100)
        );
        assert_eq!(
            config.device_ack_timeout(true, 2, 1),
            Duration::from_millis(2 * 2 * 2 * 183 + 100)
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_gateway_retries": 5, "hops": {"window": 4}}"#).unwrap();
        assert_eq!(config.max_gateway_retries, 5);
        assert_eq!(config.hops.window, 4);
        assert_eq!(config.hops.default_hops, 3);
        assert_eq!(config.gateway_ack_timeout_ms, 75);
    }
}
