//! In-memory record store module.
//!
//! Exposes the [`RecordStore`] key/record contract through the service hub so
//! other modules (sensor drivers, processing chains) can bind to it by module
//! id. Records live in memory; the module's state snapshot dumps them for
//! persistence across host restarts.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use hubkit::command::CommandTracker;
use hubkit::contracts::{CommandRequest, Module, RecordStore};
use hubkit::context::ModuleCtx;
use hubkit::registry::ModuleTypeDescriptor;

/// Params are optional; the store works with defaults.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct RecordStoreParams {
    /// Soft cap on record count; `put` evicts nothing but logs once crossed.
    #[serde(default)]
    pub capacity_hint: Option<usize>,
}

/// The engine behind the contract. Kept separate from the module shell so
/// tests (and embedders) can use it directly.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, serde_json::Value>,
    capacity_hint: Option<usize>,
}

impl MemoryRecordStore {
    pub fn new(capacity_hint: Option<usize>) -> Self {
        Self {
            records: DashMap::new(),
            capacity_hint,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn dump(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, key: &str, record: serde_json::Value) -> anyhow::Result<()> {
        self.records.insert(key.to_owned(), record);
        if let Some(cap) = self.capacity_hint {
            if self.records.len() > cap {
                tracing::warn!(len = self.records.len(), cap, "Record store over capacity hint");
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.records.get(key).map(|e| e.value().clone()))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

/// Module shell: wires a [`MemoryRecordStore`] into the hub on `init`,
/// drops it on `cleanup`.
#[derive(Default)]
pub struct RecordStoreModule {
    store: RwLock<Option<Arc<MemoryRecordStore>>>,
}

impl RecordStoreModule {
    fn active_store(&self) -> anyhow::Result<Arc<MemoryRecordStore>> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("record store is not initialized"))
    }
}

#[async_trait]
impl Module for RecordStoreModule {
    async fn init(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let params: RecordStoreParams = ctx.params()?;
        let store = Arc::new(MemoryRecordStore::new(params.capacity_hint));

        ctx.service_hub()
            .register::<dyn RecordStore>(ctx.module_id(), store.clone() as Arc<dyn RecordStore>);
        *self.store.write() = Some(store);

        tracing::info!(module = ctx.module_id(), "Record store initialized");
        Ok(())
    }

    async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        // Purely in-memory: nothing to acquire.
        self.active_store().map(|_| ())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        *self.store.write() = None;
        Ok(())
    }

    async fn handle_command(
        &self,
        request: CommandRequest,
        tracker: &CommandTracker,
    ) -> anyhow::Result<()> {
        let action = request.payload.get("action").and_then(|a| a.as_str());
        match action {
            Some("clear") => {
                tracker.accept(request.id)?;
                let store = self.active_store()?;
                let removed = store.len();
                store.records.clear();
                tracker.complete(request.id, Some(format!("cleared {removed} records")))?;
            }
            other => {
                tracker.reject(
                    request.id,
                    Some(format!("unsupported action {other:?}")),
                )?;
            }
        }
        Ok(())
    }

    fn snapshot_state(&self) -> Option<serde_json::Value> {
        self.store.read().as_ref().map(|s| s.dump())
    }
}

inventory::submit! {
    ModuleTypeDescriptor {
        type_name: "In-memory record store",
        impl_id: "record-store",
        config_kind: "record-store/config@1",
        factory: || Arc::new(RecordStoreModule::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubkit::command::CommandState;
    use hubkit::context::ModuleContextBuilder;
    use hubkit::events::EventBus;
    use hubkit::repository::{ConfigRecord, ModuleConfig};
    use hubkit::service_hub::ServiceHub;
    use serde_json::json;

    fn ctx(hub: Arc<ServiceHub>) -> ModuleCtx {
        let record = ConfigRecord::new(
            "record-store/config@1",
            ModuleConfig::new("store1", "Store", "record-store"),
        );
        ModuleContextBuilder::new(
            hub,
            Arc::new(EventBus::new()),
            Arc::new(CommandTracker::new()),
            CancellationToken::new(),
        )
        .for_module(record)
    }

    #[tokio::test]
    async fn store_contract_roundtrip() {
        let store = MemoryRecordStore::default();
        store.put("obs/1", json!({"t": 21.5})).await.unwrap();
        assert_eq!(store.get("obs/1").await.unwrap(), Some(json!({"t": 21.5})));
        assert!(store.delete("obs/1").await.unwrap());
        assert!(!store.delete("obs/1").await.unwrap());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_registers_store_in_hub() {
        let hub = Arc::new(ServiceHub::new());
        let module = RecordStoreModule::default();
        module.init(&ctx(hub.clone())).await.unwrap();

        let resolved = hub.get::<dyn RecordStore>("store1").unwrap();
        resolved.put("k", json!(1)).await.unwrap();
        assert_eq!(resolved.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn cleanup_then_init_again_works() {
        let hub = Arc::new(ServiceHub::new());
        let module = RecordStoreModule::default();
        module.init(&ctx(hub.clone())).await.unwrap();
        module.cleanup().await.unwrap();
        assert!(module.snapshot_state().is_none());
        module.init(&ctx(hub)).await.unwrap();
        assert!(module.snapshot_state().is_some());
    }

    #[tokio::test]
    async fn clear_command_completes() {
        let hub = Arc::new(ServiceHub::new());
        let module = RecordStoreModule::default();
        module.init(&ctx(hub)).await.unwrap();
        module
            .active_store()
            .unwrap()
            .put("k", json!(1))
            .await
            .unwrap();

        let tracker = CommandTracker::new();
        let id = tracker.submit("store1", json!({"action": "clear"}));
        module
            .handle_command(CommandRequest { id, payload: json!({"action": "clear"}) }, &tracker)
            .await
            .unwrap();

        assert_eq!(tracker.status(id).unwrap().state, CommandState::Completed);
        assert!(module.active_store().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let hub = Arc::new(ServiceHub::new());
        let module = RecordStoreModule::default();
        module.init(&ctx(hub)).await.unwrap();

        let tracker = CommandTracker::new();
        let id = tracker.submit("store1", json!({"action": "fly"}));
        module
            .handle_command(CommandRequest { id, payload: json!({"action": "fly"}) }, &tracker)
            .await
            .unwrap();

        assert_eq!(tracker.status(id).unwrap().state, CommandState::Rejected);
    }
}
