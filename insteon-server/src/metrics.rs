//! Prometheus counters fed from drained engine events.

use insteon_core::NetworkEvent;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub events_total: CounterVec,
    pub snapshots_saved_total: CounterVec,
    pub snapshot_errors_total: CounterVec,
    pub transport_errors_total: CounterVec,
    pub devices: GaugeVec,
    pub queued_messages: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_total = CounterVec::new(
            Opts::new("insteon_events_total", "Engine events by gateway and kind"),
            &["gateway", "event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let snapshots_saved_total = CounterVec::new(
            Opts::new("insteon_snapshots_saved_total", "Snapshots written by gateway"),
            &["gateway"],
        )?;
        registry.register(Box::new(snapshots_saved_total.clone()))?;

        let snapshot_errors_total = CounterVec::new(
            Opts::new("insteon_snapshot_errors_total", "Failed snapshot writes by gateway"),
            &["gateway"],
        )?;
        registry.register(Box::new(snapshot_errors_total.clone()))?;

        let transport_errors_total = CounterVec::new(
            Opts::new("insteon_transport_errors_total", "Link read or write failures by gateway"),
            &["gateway"],
        )?;
        registry.register(Box::new(transport_errors_total.clone()))?;

        let devices = GaugeVec::new(
            Opts::new("insteon_devices", "Known devices by gateway"),
            &["gateway"],
        )?;
        registry.register(Box::new(devices.clone()))?;

        let queued_messages = GaugeVec::new(
            Opts::new("insteon_queued_messages", "Outbound messages waiting by gateway"),
            &["gateway"],
        )?;
        registry.register(Box::new(queued_messages.clone()))?;

        Ok(Self {
            registry,
            events_total,
            snapshots_saved_total,
            snapshot_errors_total,
            transport_errors_total,
            devices,
            queued_messages,
        })
    }

    pub fn record_event(&self, gateway: &str, event: &NetworkEvent) {
        self.events_total.with_label_values(&[gateway, event.kind()]).inc();
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.record_event("home", &NetworkEvent::GatewayBusy);
        metrics.record_event("home", &NetworkEvent::GatewayBusy);
        metrics.record_event("home", &NetworkEvent::UserReset);
        metrics.snapshots_saved_total.with_label_values(&["home"]).inc();
        metrics.devices.with_label_values(&["home"]).set(12.0);

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        let sample = |event: &str| {
            encoded
                .lines()
                .find(|line| line.starts_with("insteon_events_total{") && line.contains(event))
                .map(|line| line.rsplit(' ').next().unwrap_or_default().to_string())
        };
        assert_eq!(sample(r#"event="gateway_busy""#).as_deref(), Some("2"));
        assert_eq!(sample(r#"event="user_reset""#).as_deref(), Some("1"));
        assert!(encoded.contains(r#"insteon_snapshots_saved_total{gateway="home"} 1"#));
        assert!(encoded.contains(r#"insteon_devices{gateway="home"} 12"#));
    }
}
