//! Simulated sensor driver.
//!
//! Emits a synthetic sample on a fixed interval, publishes it as a Data
//! event and, when bound to a record store module, persists it there. Stands
//! in for hardware drivers in tests and demos: it exercises the full module
//! contract (background task, cancellation, retryable start, commands)
//! without touching real transports.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hubkit::command::CommandTracker;
use hubkit::contracts::{CommandRequest, Module, RecordStore};
use hubkit::context::ModuleCtx;
use hubkit::events::EventKind;
use hubkit::registry::ModuleTypeDescriptor;

fn default_interval_ms() -> u64 {
    1_000
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct SimSensorParams {
    /// Logical output channel name, embedded in every sample.
    pub channel: String,
    #[serde(default = "default_interval_ms")]
    pub sample_interval_ms: u64,
    /// Id of a record-store module to persist samples into.
    #[serde(default)]
    pub storage: Option<String>,
}

#[derive(Default)]
pub struct SimSensorModule {
    params: RwLock<Option<SimSensorParams>>,
    ctx: RwLock<Option<ModuleCtx>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    interval_ms: Arc<AtomicU64>,
    samples: Arc<AtomicU64>,
    /// Live background tasks; the lifecycle tests assert this drops to zero.
    active_tasks: Arc<AtomicUsize>,
}

impl SimSensorModule {
    pub fn samples_emitted(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Module for SimSensorModule {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let params: SimSensorParams = ctx.params_required()?;
        anyhow::ensure!(!params.channel.trim().is_empty(), "channel must not be empty");
        anyhow::ensure!(params.sample_interval_ms > 0, "sample_interval_ms must be positive");

        self.interval_ms.store(params.sample_interval_ms, Ordering::Relaxed);
        *self.params.write() = Some(params);
        *self.ctx.write() = Some(ctx.clone());
        Ok(())
    }

    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let (params, ctx) = {
            let params = self.params.read();
            let ctx = self.ctx.read();
            match (params.clone(), ctx.clone()) {
                (Some(p), Some(c)) => (p, c),
                _ => anyhow::bail!("sensor is not initialized"),
            }
        };

        // Bind storage now: it is a start-time resource, so a missing store
        // fails the start and stays retryable once the store comes up.
        let store: Option<Arc<dyn RecordStore>> = match &params.storage {
            Some(storage_id) => Some(
                ctx.service_hub()
                    .get::<dyn RecordStore>(storage_id)
                    .map_err(|e| anyhow::anyhow!("storage '{storage_id}' unavailable: {e}"))?,
            ),
            None => None,
        };

        let channel = params.channel.clone();
        let interval_ms = self.interval_ms.clone();
        let samples = self.samples.clone();
        let active = self.active_tasks.clone();

        active.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            loop {
                let period = Duration::from_millis(interval_ms.load(Ordering::Relaxed).max(1));
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(period) => {}
                }

                let n = samples.fetch_add(1, Ordering::Relaxed) + 1;
                let sample = serde_json::json!({
                    "channel": channel,
                    "seq": n,
                    "value": synthetic_value(n),
                });
                ctx.publish(EventKind::Data, sample.clone());

                if let Some(store) = &store {
                    let key = format!("{channel}/{n}");
                    if let Err(error) = store.put(&key, sample).await {
                        tracing::warn!(%error, key, "Failed to persist sample");
                    }
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            // The loop exits on the next select arm; a second is plenty.
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                anyhow::bail!("sampling task ignored cancellation");
            }
        }
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        *self.params.write() = None;
        *self.ctx.write() = None;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        request: CommandRequest,
        tracker: &CommandTracker,
    ) -> anyhow::Result<()> {
        let action = request.payload.get("action").and_then(|a| a.as_str());
        match action {
            Some("set_rate") => {
                let Some(interval) = request
                    .payload
                    .get("sample_interval_ms")
                    .and_then(serde_json::Value::as_u64)
                    .filter(|ms| *ms > 0)
                else {
                    tracker.reject(
                        request.id,
                        Some("set_rate requires a positive sample_interval_ms".to_owned()),
                    )?;
                    return Ok(());
                };
                tracker.accept(request.id)?;
                self.interval_ms.store(interval, Ordering::Relaxed);
                tracker.complete(request.id, Some(format!("interval set to {interval}ms")))?;
            }
            other => {
                tracker.reject(request.id, Some(format!("unsupported action {other:?}")))?;
            }
        }
        Ok(())
    }

    fn snapshot_state(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "samples_emitted": self.samples.load(Ordering::Relaxed),
            "sample_interval_ms": self.interval_ms.load(Ordering::Relaxed),
        }))
    }
}

/// Deterministic pseudo-measurement, good enough for demos and tests.
fn synthetic_value(seq: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let phase = (seq % 360) as f64;
    20.0 + phase.to_radians().sin() * 5.0
}

inventory::submit! {
    ModuleTypeDescriptor {
        type_name: "Simulated sensor",
        impl_id: "sim-sensor",
        config_kind: "sim-sensor/config@1",
        factory: || Arc::new(SimSensorModule::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubkit::command::CommandState;
    use hubkit::context::ModuleContextBuilder;
    use hubkit::events::{Event, EventBus, EventListener};
    use hubkit::repository::{ConfigRecord, ModuleConfig};
    use hubkit::service_hub::ServiceHub;
    use serde_json::json;

    struct DataCounter(Arc<AtomicUsize>);

    impl EventListener for DataCounter {
        fn on_event(&self, event: &Event) {
            if event.kind == EventKind::Data {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn ctx_with(params: serde_json::Value, bus: Arc<EventBus>, hub: Arc<ServiceHub>) -> ModuleCtx {
        let record = ConfigRecord::new(
            "sim-sensor/config@1",
            ModuleConfig::new("sensor1", "Sensor", "sim-sensor").params(params),
        );
        ModuleContextBuilder::new(
            hub,
            bus,
            Arc::new(CommandTracker::new()),
            CancellationToken::new(),
        )
        .for_module(record)
    }

    #[tokio::test]
    async fn init_rejects_missing_channel() {
        let module = SimSensorModule::default();
        let ctx = ctx_with(json!({"channel": ""}), Arc::new(EventBus::new()), Arc::new(ServiceHub::new()));
        assert!(module.init(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn emits_data_events_until_stopped() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(DataCounter(seen.clone())));

        let module = SimSensorModule::default();
        let ctx = ctx_with(
            json!({"channel": "temp", "sample_interval_ms": 5}),
            bus,
            Arc::new(ServiceHub::new()),
        );
        module.init(&ctx).await.unwrap();

        let cancel = CancellationToken::new();
        module.start(cancel.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        module.stop(cancel).await.unwrap();

        assert!(seen.load(Ordering::SeqCst) > 0);
        assert_eq!(module.active_tasks(), 0);
    }

    #[tokio::test]
    async fn restart_after_stop_behaves_like_first_start() {
        let module = SimSensorModule::default();
        let ctx = ctx_with(
            json!({"channel": "temp", "sample_interval_ms": 5}),
            Arc::new(EventBus::new()),
            Arc::new(ServiceHub::new()),
        );
        module.init(&ctx).await.unwrap();

        for _ in 0..2 {
            let cancel = CancellationToken::new();
            module.start(cancel.clone()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            module.stop(cancel).await.unwrap();
            assert_eq!(module.active_tasks(), 0);
        }
        assert!(module.samples_emitted() > 0);
    }

    #[tokio::test]
    async fn start_fails_without_configured_storage() {
        let module = SimSensorModule::default();
        let ctx = ctx_with(
            json!({"channel": "temp", "storage": "storage1"}),
            Arc::new(EventBus::new()),
            Arc::new(ServiceHub::new()),
        );
        module.init(&ctx).await.unwrap();

        let err = module.start(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("storage1"));
        assert_eq!(module.active_tasks(), 0);
    }

    #[tokio::test]
    async fn samples_land_in_bound_store() {
        use record_store::MemoryRecordStore;

        let hub = Arc::new(ServiceHub::new());
        let store = Arc::new(MemoryRecordStore::default());
        hub.register::<dyn RecordStore>("storage1", store.clone() as Arc<dyn RecordStore>);

        let module = SimSensorModule::default();
        let ctx = ctx_with(
            json!({"channel": "temp", "sample_interval_ms": 5, "storage": "storage1"}),
            Arc::new(EventBus::new()),
            hub,
        );
        module.init(&ctx).await.unwrap();

        let cancel = CancellationToken::new();
        module.start(cancel.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        module.stop(cancel).await.unwrap();

        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn set_rate_command_updates_interval() {
        let module = SimSensorModule::default();
        let ctx = ctx_with(
            json!({"channel": "temp"}),
            Arc::new(EventBus::new()),
            Arc::new(ServiceHub::new()),
        );
        module.init(&ctx).await.unwrap();

        let tracker = CommandTracker::new();
        let payload = json!({"action": "set_rate", "sample_interval_ms": 42});
        let id = tracker.submit("sensor1", payload.clone());
        module
            .handle_command(CommandRequest { id, payload }, &tracker)
            .await
            .unwrap();

        assert_eq!(tracker.status(id).unwrap().state, CommandState::Completed);
        assert_eq!(module.interval_ms.load(Ordering::Relaxed), 42);

        let bad = json!({"action": "set_rate"});
        let id = tracker.submit("sensor1", bad.clone());
        module
            .handle_command(CommandRequest { id, payload: bad }, &tracker)
            .await
            .unwrap();
        assert_eq!(tracker.status(id).unwrap().state, CommandState::Rejected);
    }
}
