//! Per-gateway polling loop with periodic snapshot saves.

use crate::error::ServerError;
use crate::metrics::Metrics;
use insteon_core::{EngineConfig, Node, Plm, Transport};
use insteon_storage::{SnapshotMeta, SnapshotStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// An engine shared between its runner and the status endpoint.
pub type SharedPlm = Arc<Mutex<Plm>>;

/// Engines by gateway name. Fixed once the daemon has started.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Arc<BTreeMap<String, SharedPlm>>,
}

impl GatewayRegistry {
    pub fn new(gateways: BTreeMap<String, SharedPlm>) -> Self {
        Self {
            gateways: Arc::new(gateways),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SharedPlm> {
        self.gateways.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SharedPlm)> {
        self.gateways.iter()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

/// Builds the engine of `name` from its stored snapshot, or empty when there
/// is none or it cannot be used.
pub fn restore(name: &str, engine: &EngineConfig, store: &SnapshotStore) -> Plm {
    match store.load(name) {
        Ok(Some(snapshot)) => match Plm::from_snapshot(name, engine.clone(), &snapshot) {
            Ok(plm) => {
                tracing::info!(
                    "[{}] Restored {} devices and {} X10 devices from snapshot",
                    name,
                    plm.devices().count(),
                    plm.x10_devices().count()
                );
                plm
            }
            Err(e) => {
                tracing::warn!("[{}] Ignoring unusable snapshot: {}", name, e);
                Plm::new(name, engine.clone())
            }
        },
        Ok(None) => {
            tracing::info!("[{}] No snapshot, starting empty", name);
            Plm::new(name, engine.clone())
        }
        Err(e) => {
            tracing::warn!("[{}] Failed to load snapshot: {}", name, e);
            Plm::new(name, engine.clone())
        }
    }
}

/// Drives one engine over its transport.
pub struct GatewayRunner {
    name: String,
    plm: SharedPlm,
    transport: Box<dyn Transport + Send>,
    store: Arc<SnapshotStore>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
    save_interval: Duration,
}

impl GatewayRunner {
    pub fn new(
        plm: SharedPlm,
        transport: Box<dyn Transport + Send>,
        store: Arc<SnapshotStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let name = plm.lock().name().to_string();
        Self {
            name,
            plm,
            transport,
            store,
            metrics,
            poll_interval: Duration::from_millis(5),
            save_interval: Duration::from_secs(300),
        }
    }

    pub fn with_intervals(mut self, poll: Duration, save: Duration) -> Self {
        self.poll_interval = poll;
        self.save_interval = save;
        self
    }

    /// Queues the startup queries: gateway identity and configuration, and
    /// the gateway link table when nothing is cached.
    pub fn start(&self, now: Instant) -> Result<(), ServerError> {
        let mut plm = self.plm.lock();
        plm.query_plm_info(now)?;
        plm.query_plm_config(now)?;
        if plm.gateway().aldb().is_empty() {
            plm.query_gateway_aldb(now)?;
        }
        Ok(())
    }

    /// Runs the engine until no frame is written, then publishes its events.
    pub fn tick(&mut self, now: Instant) -> Result<(), ServerError> {
        let mut plm = self.plm.lock();
        let result = loop {
            match plm.poll(self.transport.as_mut(), now) {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        for event in plm.drain_events() {
            self.metrics.record_event(&self.name, &event);
        }
        let status = plm.status();
        drop(plm);

        self.metrics
            .devices
            .with_label_values(&[&self.name])
            .set((status.devices.len() + status.x10_devices.len()) as f64);
        let queued = status.queued
            + status.devices.iter().map(|d| d.queued).sum::<usize>()
            + status.x10_devices.iter().map(|d| d.queued).sum::<usize>();
        self.metrics
            .queued_messages
            .with_label_values(&[&self.name])
            .set(queued as f64);

        if result.is_err() {
            self.metrics.transport_errors_total.with_label_values(&[&self.name]).inc();
        }
        result.map_err(ServerError::from)
    }

    /// Writes the current snapshot. The engine is only locked while the
    /// snapshot is taken.
    pub fn save(&self) -> Result<SnapshotMeta, ServerError> {
        let snapshot = self.plm.lock().snapshot();
        match self.store.save(&self.name, &snapshot) {
            Ok(meta) => {
                self.metrics.snapshots_saved_total.with_label_values(&[&self.name]).inc();
                Ok(meta)
            }
            Err(e) => {
                self.metrics.snapshot_errors_total.with_label_values(&[&self.name]).inc();
                Err(e.into())
            }
        }
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            tracing::error!("[{}] Failed to save snapshot: {}", self.name, e);
        }
    }

    /// Polls until `shutdown` fires, saving periodically and once more on
    /// the way out.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if let Err(e) = self.start(Instant::now()) {
            tracing::error!("[{}] Failed to queue startup queries: {}", self.name, e);
        }
        tracing::info!(
            "[{}] Gateway loop started (poll={:?}, save={:?})",
            self.name,
            self.poll_interval,
            self.save_interval
        );

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut save = tokio::time::interval_at(
            tokio::time::Instant::now() + self.save_interval,
            self.save_interval,
        );
        save.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.tick(Instant::now()) {
                        tracing::warn!("[{}] Poll failed: {}", self.name, e);
                    }
                }
                _ = save.tick() => self.save_logged(),
                _ = shutdown.recv() => break,
            }
        }

        self.save_logged();
        tracing::info!("[{}] Gateway loop stopped", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insteon_core::{MemoryTransport, NodeSnapshot};
    use insteon_protocol::Address;
    use std::io;
    use tempfile::TempDir;

    /// Memory transport behind a shared handle so tests can feed it while
    /// the runner owns it.
    #[derive(Clone, Default)]
    struct SharedTransport(Arc<Mutex<MemoryTransport>>);

    impl Transport for SharedTransport {
        fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.lock().read_available(buf)
        }

        fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.0.lock().write_frame(frame)
        }
    }

    fn runner(dir: &TempDir) -> (GatewayRunner, SharedTransport, Arc<Metrics>) {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        let plm = Arc::new(Mutex::new(Plm::new("home", EngineConfig::default())));
        let transport = SharedTransport::default();
        let metrics = Arc::new(Metrics::new().unwrap());
        let runner = GatewayRunner::new(plm, Box::new(transport.clone()), store, metrics.clone());
        (runner, transport, metrics)
    }

    #[test]
    fn test_restore_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let plm = restore("home", &EngineConfig::default(), &store);
        assert_eq!(plm.name(), "home");
        assert_eq!(plm.devices().count(), 0);
    }

    #[test]
    fn test_restore_from_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut snapshot = NodeSnapshot::default();
        snapshot.devices.insert("112233".to_string(), NodeSnapshot::default());
        store.save("home", &snapshot).unwrap();

        let plm = restore("home", &EngineConfig::default(), &store);
        assert!(plm.device(Address::new(0x11, 0x22, 0x33)).is_some());
    }

    #[test]
    fn test_restore_ignores_bad_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let mut snapshot = NodeSnapshot::default();
        snapshot.devices.insert("not-an-address".to_string(), NodeSnapshot::default());
        store.save("home", &snapshot).unwrap();

        let plm = restore("home", &EngineConfig::default(), &store);
        assert_eq!(plm.devices().count(), 0);
    }

    #[test]
    fn test_start_and_tick_writes_one_frame() {
        let dir = TempDir::new().unwrap();
        let (mut runner, transport, _) = runner(&dir);
        let now = Instant::now();
        runner.start(now).unwrap();
        runner.tick(now).unwrap();

        // Only the first query goes out until the PLM echoes it.
        let written = transport.0.lock().take_written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].as_ref(), &[0x02, 0x60]);

        transport
            .0
            .lock()
            .push_inbound(&[0x02, 0x60, 0x44, 0x85, 0x11, 0x03, 0x15, 0x9B, 0x06]);
        runner.tick(now).unwrap();
        assert!(transport.0.lock().take_written().is_empty());

        // The received frame holds the next send back briefly.
        runner.tick(now + Duration::from_millis(50)).unwrap();
        assert_eq!(
            runner.plm.lock().gateway().address(),
            Some(Address::new(0x44, 0x85, 0x11))
        );
        let written = transport.0.lock().take_written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].as_ref(), &[0x02, 0x73]);
    }

    #[test]
    fn test_tick_records_events() {
        let dir = TempDir::new().unwrap();
        let (mut runner, transport, metrics) = runner(&dir);
        transport.0.lock().push_inbound(&[0x02, 0x55]);
        runner.tick(Instant::now()).unwrap();

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded
            .lines()
            .any(|line| line.starts_with("insteon_events_total{") && line.contains("user_reset")));
        assert_eq!(runner.plm.lock().events().count(), 0);
    }

    #[test]
    fn test_save_writes_snapshot() {
        let dir = TempDir::new().unwrap();
        let (runner, _, _) = runner(&dir);
        runner
            .plm
            .lock()
            .add_device(Address::new(0x11, 0x22, 0x33))
            .unwrap();

        let meta = runner.save().unwrap();
        assert_eq!(meta.gateway, "home");
        let store = SnapshotStore::open(dir.path()).unwrap();
        let snapshot = store.load("home").unwrap().unwrap();
        assert!(snapshot.devices.contains_key("112233"));
    }

    #[tokio::test]
    async fn test_run_saves_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (runner, _, _) = runner(&dir);
        let runner = runner.with_intervals(Duration::from_millis(1), Duration::from_secs(3600));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(runner.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.load("home").unwrap().is_some());
    }
}
