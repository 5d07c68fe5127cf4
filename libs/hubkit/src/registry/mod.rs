//! Module lifecycle orchestration.
//!
//! The registry owns the config repository, discovers available module
//! types, instantiates modules from configuration, sequences lifecycle
//! transitions respecting declared dependencies, and isolates per-module
//! failures: one module failing to load, start or stop never blocks its
//! siblings.
//!
//! Concurrency model: the record table is a `DashMap` and each record guards
//! its transitions with its own async mutex, so operations on independent
//! modules proceed in parallel and no registry-wide lock is held across
//! module code. The table is the single source of truth for "is a module
//! running under this id" - claiming an id and transitioning it happen under
//! the same per-record guard.

mod graph;
mod types;

pub use types::{ModuleType, ModuleTypeDescriptor, ModuleTypeRegistry};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandError, CommandId, CommandStatus, CommandTracker};
use crate::context::{ModuleContextBuilder, ModuleCtx};
use crate::contracts::{CommandRequest, Module, ModuleState, StatusSnapshot};
use crate::events::{Event, EventBus, EventKind};
use crate::repository::{ConfigRecord, ConfigRepository, RepositoryError};
use crate::service_hub::ServiceHub;

const EVENT_SOURCE: &str = "registry";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("module '{module}' configuration invalid: {source}")]
    Configuration {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load module '{module}': {source}")]
    Load {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' failed to start: {source}")]
    Startup {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("dependency cycle among modules: {}", ids.join(", "))]
    DependencyCycle { ids: Vec<String> },

    #[error("module '{id}' is already loaded")]
    AlreadyLoaded { id: String },

    #[error("module '{id}' is not loaded")]
    NotLoaded { id: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// One lifecycle failure inside a bulk operation.
#[derive(Debug)]
pub struct ModuleFailure {
    pub id: String,
    pub error: String,
}

/// Aggregate result of `load_all`: what loaded, what was skipped, what
/// failed, and which ids sit on a dependency cycle.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids loaded, in load order.
    pub loaded: Vec<String>,
    /// Configured-but-disabled ids (record kept, no live instance).
    pub disabled: Vec<String>,
    pub failures: Vec<ModuleFailure>,
    /// Ids rejected wholesale because of a dependency cycle.
    pub cyclic: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cyclic.is_empty()
    }
}

/// Aggregate result of `shutdown`: stop order plus every error encountered.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Ids processed, in stop order.
    pub stopped: Vec<String>,
    pub failures: Vec<ModuleFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Lifecycle state + orthogonal error flag, swapped atomically so status
/// reads never block a transition in flight.
struct StatusCell {
    state: ModuleState,
    error: Option<String>,
}

/// In-memory pairing of a config record with its live instance (if any) and
/// lifecycle state. Exactly one exists per configured id.
struct ModuleRecord {
    config: parking_lot::RwLock<ConfigRecord>,
    instance: parking_lot::RwLock<Option<Arc<dyn Module>>>,
    status: ArcSwap<StatusCell>,
    /// Serializes lifecycle transitions for this record only.
    transition: Arc<tokio::sync::Mutex<()>>,
    /// Token handed to the current `start`, cancelled by `stop`.
    run_token: parking_lot::Mutex<Option<CancellationToken>>,
    /// Token carried by the module's context, cancelled at unload.
    ctx_token: parking_lot::Mutex<Option<CancellationToken>>,
}

impl ModuleRecord {
    fn new(config: ConfigRecord) -> Self {
        Self {
            config: parking_lot::RwLock::new(config),
            instance: parking_lot::RwLock::new(None),
            status: ArcSwap::from_pointee(StatusCell {
                state: ModuleState::Unloaded,
                error: None,
            }),
            transition: Arc::new(tokio::sync::Mutex::new(())),
            run_token: parking_lot::Mutex::new(None),
            ctx_token: parking_lot::Mutex::new(None),
        }
    }

    fn state(&self) -> ModuleState {
        self.status.load().state
    }

    fn set_status(&self, state: ModuleState, error: Option<String>) {
        self.status.store(Arc::new(StatusCell { state, error }));
    }

    fn instance(&self) -> Option<Arc<dyn Module>> {
        self.instance.read().clone()
    }
}

/// Top-level orchestrator. Explicitly constructed and passed to whoever
/// needs it - there is no process-wide singleton.
pub struct ModuleRegistry {
    repository: Arc<dyn ConfigRepository>,
    types: ModuleTypeRegistry,
    records: DashMap<String, Arc<ModuleRecord>>,
    service_hub: Arc<ServiceHub>,
    events: Arc<EventBus>,
    commands: Arc<CommandTracker>,
    root_token: CancellationToken,
    start_timeout: Duration,
    state_dir: Option<PathBuf>,
}

impl ModuleRegistry {
    pub fn new(repository: Arc<dyn ConfigRepository>, types: ModuleTypeRegistry) -> Self {
        Self {
            repository,
            types,
            records: DashMap::new(),
            service_hub: Arc::new(ServiceHub::new()),
            events: Arc::new(EventBus::new()),
            commands: Arc::new(CommandTracker::new()),
            root_token: CancellationToken::new(),
            start_timeout: Duration::from_secs(30),
            state_dir: None,
        }
    }

    /// Upper bound on a single module's `start` (covers connect/reconnect
    /// waits inside the module).
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Directory for module state snapshots written by
    /// `shutdown(_, save_state = true)`.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Parent token for every module-scoped token the registry mints.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.root_token = token;
        self
    }

    pub fn repository(&self) -> &Arc<dyn ConfigRepository> {
        &self.repository
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn service_hub(&self) -> &Arc<ServiceHub> {
        &self.service_hub
    }

    pub fn commands(&self) -> &Arc<CommandTracker> {
        &self.commands
    }

    /// Installable module types (descriptor triples), without instantiation.
    pub fn available_types(&self) -> Vec<ModuleType> {
        self.types.available()
    }

    // ---- queries ----

    pub fn get_module(&self, id: &str) -> Option<Arc<dyn Module>> {
        self.records.get(id).and_then(|r| r.instance())
    }

    /// Ids with a live instance, sorted for determinism.
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.value().instance.read().is_some())
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Non-blocking status read, safe from any thread concurrently with
    /// lifecycle transitions.
    pub fn status(&self, id: &str) -> Option<StatusSnapshot> {
        self.records.get(id).map(|r| {
            let cell = r.status.load();
            StatusSnapshot {
                id: id.to_owned(),
                state: cell.state,
                error: cell.error.clone(),
            }
        })
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        let mut all: Vec<StatusSnapshot> = self
            .records
            .iter()
            .map(|e| {
                let cell = e.value().status.load();
                StatusSnapshot {
                    id: e.key().clone(),
                    state: cell.state,
                    error: cell.error.clone(),
                }
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn config(&self, id: &str) -> Option<ConfigRecord> {
        self.records.get(id).map(|r| r.config.read().clone())
    }

    // ---- lifecycle ----

    /// Register (or update) `record` in the repository, instantiate the
    /// module, `init` it and - if `auto_start` is set - `start` it.
    ///
    /// # Errors
    /// `Configuration` for invalid base fields or a rejected `init`, `Load`
    /// for an unresolvable type, `Startup` for a failed auto-start,
    /// `AlreadyLoaded` when a live instance already owns the id. Failures are
    /// recorded in the module's status and never affect sibling modules.
    pub async fn load_module(
        &self,
        record: ConfigRecord,
    ) -> Result<Arc<dyn Module>, RegistryError> {
        validate_base(&record)?;
        self.repository.update(&record)?;
        self.load_inner(record).await
    }

    async fn load_inner(&self, record: ConfigRecord) -> Result<Arc<dyn Module>, RegistryError> {
        let id = record.id().to_owned();

        let module_type = self.types.resolve(&record.config.module_type).ok_or_else(|| {
            self.record_error(&record, format!("unknown module type '{}'", record.config.module_type));
            RegistryError::Load {
                module: id.clone(),
                source: anyhow::anyhow!(
                    "no factory registered for module type '{}'",
                    record.config.module_type
                ),
            }
        })?;

        // Claim the id. The claim and the transition are covered by the same
        // per-record mutex; if the record was unloaded while we waited for
        // the lock, retry with a fresh claim.
        let (entry, _guard) = loop {
            let entry = self
                .records
                .entry(id.clone())
                .or_insert_with(|| Arc::new(ModuleRecord::new(record.clone())))
                .clone();
            let guard = entry.transition.clone().lock_owned().await;
            match self.records.get(&id) {
                Some(current) if Arc::ptr_eq(current.value(), &entry) => break (entry, guard),
                _ => continue,
            }
        };

        if entry.instance.read().is_some() {
            return Err(RegistryError::AlreadyLoaded { id });
        }
        *entry.config.write() = record.clone();

        let instance = module_type.instantiate();
        let ctx = self.context_for(record.clone());
        *entry.ctx_token.lock() = Some(ctx.cancellation_token().clone());

        if let Err(source) = instance.init(&ctx).await {
            entry.set_status(ModuleState::Unloaded, Some(source.to_string()));
            self.publish_registry_event(EventKind::Error, &id, json!({"error": source.to_string()}));
            return Err(if source.downcast_ref::<crate::config::ConfigError>().is_some() {
                RegistryError::Configuration { module: id, source }
            } else {
                RegistryError::Load { module: id, source }
            });
        }

        *entry.instance.write() = Some(instance.clone());
        entry.set_status(ModuleState::Initialized, None);
        self.publish_registry_event(EventKind::ModuleAdded, &id, json!({}));
        self.publish_state(&id, ModuleState::Initialized);

        if record.config.auto_start {
            self.start_locked(&id, &entry).await?;
        }

        Ok(instance)
    }

    /// Start a loaded module. Starting an already-started module is a no-op.
    ///
    /// # Errors
    /// `NotLoaded` when no live instance owns the id, `Startup` when the
    /// module's `start` fails or exceeds the configured timeout; the module
    /// is left Initialized (retryable) with the error recorded.
    pub async fn start_module(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self.claimed(id)?;
        let _guard = entry.transition.lock().await;
        if entry.instance.read().is_none() {
            return Err(RegistryError::NotLoaded { id: id.to_owned() });
        }
        self.start_locked(id, &entry).await
    }

    async fn start_locked(
        &self,
        id: &str,
        entry: &Arc<ModuleRecord>,
    ) -> Result<(), RegistryError> {
        match entry.state() {
            ModuleState::Started => return Ok(()),
            ModuleState::Initialized | ModuleState::Stopped => {}
            ModuleState::Unloaded => {
                return Err(RegistryError::NotLoaded { id: id.to_owned() });
            }
        }

        let instance = entry
            .instance()
            .ok_or_else(|| RegistryError::NotLoaded { id: id.to_owned() })?;

        let token = self.root_token.child_token();
        *entry.run_token.lock() = Some(token.clone());

        let outcome = tokio::time::timeout(self.start_timeout, instance.start(token.clone())).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(source),
            Err(_) => {
                token.cancel();
                Some(anyhow::anyhow!(
                    "start exceeded timeout of {:?}",
                    self.start_timeout
                ))
            }
        };

        if let Some(source) = failure {
            // Failed start leaves the module as if it never started.
            entry.set_status(ModuleState::Initialized, Some(source.to_string()));
            *entry.run_token.lock() = None;
            self.publish_registry_event(EventKind::Error, id, json!({"error": source.to_string()}));
            return Err(RegistryError::Startup {
                module: id.to_owned(),
                source,
            });
        }

        entry.set_status(ModuleState::Started, None);
        self.publish_state(id, ModuleState::Started);
        tracing::info!(module = id, "Started module");
        Ok(())
    }

    /// Stop a started module. Idempotent: stopping a module that is not
    /// started returns quietly.
    pub async fn stop_module(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self.claimed(id)?;
        let _guard = entry.transition.lock().await;
        if let Err(source) = self.stop_locked(id, &entry).await {
            tracing::warn!(module = id, error = %source, "Module failed to stop cleanly");
            entry.set_status(entry.state(), Some(source.to_string()));
        }
        Ok(())
    }

    async fn stop_locked(&self, id: &str, entry: &Arc<ModuleRecord>) -> anyhow::Result<()> {
        if entry.state() != ModuleState::Started {
            return Ok(());
        }
        let Some(instance) = entry.instance() else {
            return Ok(());
        };

        // Always cancel first: any blocking wait inside the module's start
        // must unblock within bounded time.
        let token = entry
            .run_token
            .lock()
            .take()
            .unwrap_or_else(CancellationToken::new);
        token.cancel();

        let result = instance.stop(token).await;
        entry.set_status(ModuleState::Stopped, None);
        self.publish_state(id, ModuleState::Stopped);
        tracing::info!(module = id, "Stopped module");
        result
    }

    /// Reverse of `load_module`: stop, clean up, drop the in-memory record.
    /// Already-unloaded ids are logged and ignored.
    pub async fn unload_module(&self, id: &str) {
        let Some(entry) = self.records.get(id).map(|e| e.value().clone()) else {
            tracing::debug!(module = id, "Unload requested for module that is not loaded");
            return;
        };
        let _guard = entry.transition.lock().await;

        if let Err(error) = self.stop_locked(id, &entry).await {
            tracing::warn!(module = id, %error, "Ignoring stop failure during unload");
        }

        let instance = entry.instance.write().take();
        if let Some(instance) = instance {
            if let Err(error) = instance.cleanup().await {
                tracing::warn!(module = id, %error, "Ignoring cleanup failure during unload");
            }
        }
        if let Some(token) = entry.ctx_token.lock().take() {
            token.cancel();
        }
        self.service_hub.remove_provider(id);
        entry.set_status(ModuleState::Unloaded, None);
        self.records.remove(id);
        self.publish_registry_event(EventKind::ModuleRemoved, id, json!({}));
    }

    /// Read every persisted config, compute the dependency order and load
    /// enabled modules in that order. Per-module failures are isolated and
    /// collected; a dependency cycle rejects exactly the cyclic set.
    ///
    /// # Errors
    /// Only structural repository failures abort the bulk operation.
    pub async fn load_all(&self) -> Result<LoadReport, RegistryError> {
        let records = self.repository.get_all()?;
        let known: HashSet<&str> = records.iter().map(ConfigRecord::id).collect();
        let plan = graph::dependency_order(&records);

        let mut report = LoadReport {
            cyclic: plan.cyclic.clone(),
            ..LoadReport::default()
        };
        if !report.cyclic.is_empty() {
            let err = RegistryError::DependencyCycle {
                ids: report.cyclic.clone(),
            };
            tracing::error!(%err, "Rejecting cyclic configuration subset");
        }

        for &idx in &plan.order {
            let record = &records[idx];
            let id = record.id().to_owned();

            if let Some(missing) = record
                .config
                .depends_on
                .iter()
                .find(|d| !known.contains(d.as_str()))
            {
                let error = format!("depends on unknown module id '{missing}'");
                self.record_error(record, error.clone());
                report.failures.push(ModuleFailure { id, error });
                continue;
            }

            if !record.config.auto_start {
                // Keep the record visible, but no live instance.
                self.records
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(ModuleRecord::new(record.clone())));
                report.disabled.push(id);
                continue;
            }

            match self.load_inner(record.clone()).await {
                Ok(_) => report.loaded.push(id),
                Err(error) => {
                    tracing::warn!(module = %id, %error, "Module failed during bulk load");
                    report.failures.push(ModuleFailure {
                        id,
                        error: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            disabled = report.disabled.len(),
            failed = report.failures.len(),
            "Bulk load finished"
        );
        Ok(report)
    }

    /// Stop and clean up all loaded modules in reverse dependency order,
    /// optionally persisting configuration and/or state snapshots first.
    /// Continues past every individual failure and reports them together.
    pub async fn shutdown(&self, save_config: bool, save_state: bool) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        // Reverse dependency order, derived from the repository's
        // deterministic iteration order over the currently loaded set.
        let mut ordered: Vec<ConfigRecord> = match self.repository.get_all() {
            Ok(records) => records
                .into_iter()
                .filter(|r| self.records.contains_key(r.id()))
                .collect(),
            Err(error) => {
                tracing::warn!(%error, "Repository unreadable at shutdown, using unordered records");
                self.records.iter().map(|e| e.value().config.read().clone()).collect()
            }
        };
        // Records loaded but never persisted still need tearing down.
        let planned: HashSet<String> = ordered.iter().map(|r| r.id().to_owned()).collect();
        for entry in &self.records {
            if !planned.contains(entry.key()) {
                ordered.push(entry.value().config.read().clone());
            }
        }

        let plan = graph::dependency_order(&ordered);
        let mut stop_order: Vec<String> = plan
            .order
            .iter()
            .map(|&i| ordered[i].id().to_owned())
            .collect();
        // Cycle members cannot be ordered; append them so they still get
        // stopped rather than leaked.
        stop_order.extend(plan.cyclic);
        stop_order.reverse();

        for id in stop_order {
            let Some(entry) = self.records.get(&id).map(|e| e.value().clone()) else {
                continue;
            };
            let _guard = entry.transition.lock().await;

            if save_state {
                if let Err(error) = self.persist_state_snapshot(&id, &entry) {
                    report.failures.push(ModuleFailure {
                        id: id.clone(),
                        error: format!("state snapshot: {error}"),
                    });
                }
            }
            if save_config {
                if let Err(error) = self.repository.update(&entry.config.read().clone()) {
                    report.failures.push(ModuleFailure {
                        id: id.clone(),
                        error: format!("config save: {error}"),
                    });
                }
            }

            if let Err(error) = self.stop_locked(&id, &entry).await {
                report.failures.push(ModuleFailure {
                    id: id.clone(),
                    error: format!("stop: {error}"),
                });
            }
            let instance = entry.instance.write().take();
            if let Some(instance) = instance {
                if let Err(error) = instance.cleanup().await {
                    report.failures.push(ModuleFailure {
                        id: id.clone(),
                        error: format!("cleanup: {error}"),
                    });
                }
            }
            if let Some(token) = entry.ctx_token.lock().take() {
                token.cancel();
            }
            self.service_hub.remove_provider(&id);
            entry.set_status(ModuleState::Unloaded, None);
            self.records.remove(&id);
            self.publish_registry_event(EventKind::ModuleRemoved, &id, json!({}));
            report.stopped.push(id);
        }

        if report.is_clean() {
            tracing::info!(stopped = report.stopped.len(), "Shutdown complete");
        } else {
            tracing::warn!(
                stopped = report.stopped.len(),
                failures = report.failures.len(),
                "Shutdown finished with failures"
            );
        }
        report
    }

    // ---- commands ----

    /// Submit a command to a loaded module. The command is tracked from
    /// Pending; the module drives it through its remaining states on a
    /// background task.
    ///
    /// # Errors
    /// `NotLoaded` when the target has no live instance.
    pub fn submit_command(
        &self,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<CommandId, RegistryError> {
        let instance = self
            .get_module(target)
            .ok_or_else(|| RegistryError::NotLoaded {
                id: target.to_owned(),
            })?;

        let command_id = self.commands.submit(target, payload.clone());
        self.publish_registry_event(
            EventKind::Command,
            target,
            json!({"command_id": command_id.to_string(), "state": "pending"}),
        );

        let tracker = self.commands.clone();
        let target = target.to_owned();
        tokio::spawn(async move {
            let request = CommandRequest {
                id: command_id,
                payload,
            };
            if let Err(error) = instance.handle_command(request, &tracker).await {
                tracing::warn!(module = %target, command = %command_id, %error, "Command handler failed");
                // Close the record out if the handler left it open.
                let open = tracker.status(command_id).is_some_and(|s| !s.state.is_terminal());
                if open {
                    let msg = Some(error.to_string());
                    if tracker.fail(command_id, None, msg.clone()).is_err() {
                        let _ = tracker.reject(command_id, msg);
                    }
                }
            }
        });

        Ok(command_id)
    }

    pub fn command_status(&self, id: CommandId) -> Option<Arc<CommandStatus>> {
        self.commands.status(id)
    }

    pub fn command_history(&self, id: CommandId) -> Vec<Arc<CommandStatus>> {
        self.commands.history(id)
    }

    // ---- internals ----

    fn context_for(&self, record: ConfigRecord) -> ModuleCtx {
        ModuleContextBuilder::new(
            self.service_hub.clone(),
            self.events.clone(),
            self.commands.clone(),
            self.root_token.clone(),
        )
        .for_module(record)
    }

    fn claimed(&self, id: &str) -> Result<Arc<ModuleRecord>, RegistryError> {
        self.records
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotLoaded { id: id.to_owned() })
    }

    /// Keep a failed module visible in ERROR state without a live instance.
    fn record_error(&self, record: &ConfigRecord, error: String) {
        let entry = self
            .records
            .entry(record.id().to_owned())
            .or_insert_with(|| Arc::new(ModuleRecord::new(record.clone())))
            .clone();
        let state = entry.state();
        entry.set_status(state, Some(error.clone()));
        self.publish_registry_event(EventKind::Error, record.id(), json!({"error": error}));
    }

    fn persist_state_snapshot(
        &self,
        id: &str,
        entry: &Arc<ModuleRecord>,
    ) -> anyhow::Result<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let Some(snapshot) = entry.instance().and_then(|m| m.snapshot_state()) else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.state.json", crate::repository::sanitize_file_stem(id)));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &serde_json::to_vec_pretty(&snapshot)?)?;
        tmp.persist(&path)?;
        tracing::debug!(module = id, path = %path.display(), "Persisted state snapshot");
        Ok(())
    }

    fn publish_state(&self, id: &str, state: ModuleState) {
        self.events.publish(&Event::new(
            id,
            EventKind::Status,
            json!({"state": state.to_string()}),
        ));
    }

    fn publish_registry_event(&self, kind: EventKind, id: &str, mut payload: serde_json::Value) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("module".to_owned(), json!(id));
        }
        self.events.publish(&Event::new(EVENT_SOURCE, kind, payload));
    }
}

fn validate_base(record: &ConfigRecord) -> Result<(), RegistryError> {
    let config = &record.config;
    let fail = |what: &str| RegistryError::Configuration {
        module: config.id.clone(),
        source: anyhow::anyhow!("{what} must not be empty"),
    };
    if config.id.trim().is_empty() {
        return Err(fail("module id"));
    }
    if config.module_type.trim().is_empty() {
        return Err(fail("module_type"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryConfigRepository, ModuleConfig};
    use async_trait::async_trait;

    struct Inert;

    #[async_trait]
    impl Module for Inert {
        async fn init(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            Ok(())
        }
        async fn start(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
        async fn cleanup(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry_with_inert() -> ModuleRegistry {
        let types = ModuleTypeRegistry::new();
        types.register(ModuleType::new("Inert", "inert", "inert/config@1", || {
            Arc::new(Inert) as Arc<dyn Module>
        }));
        ModuleRegistry::new(Arc::new(MemoryConfigRepository::new()), types)
    }

    fn record(id: &str) -> ConfigRecord {
        ConfigRecord::new("inert/config@1", ModuleConfig::new(id, id, "inert"))
    }

    #[tokio::test]
    async fn load_registers_config_and_initializes() {
        let registry = registry_with_inert();
        registry.load_module(record("m1")).await.unwrap();

        assert_eq!(registry.status("m1").unwrap().state, ModuleState::Initialized);
        assert!(registry.repository().get("m1").unwrap().is_some());
        assert_eq!(registry.loaded_modules(), ["m1"]);
    }

    #[tokio::test]
    async fn second_load_of_same_id_is_rejected() {
        let registry = registry_with_inert();
        registry.load_module(record("m1")).await.unwrap();
        let err = registry.load_module(record("m1")).await.err().unwrap();
        assert!(matches!(err, RegistryError::AlreadyLoaded { id } if id == "m1"));
    }

    #[tokio::test]
    async fn unknown_type_is_recorded_as_error() {
        let registry = registry_with_inert();
        let bad = ConfigRecord::new("ghost/config@1", ModuleConfig::new("g1", "g", "ghost"));
        let err = registry.load_module(bad).await.err().unwrap();
        assert!(matches!(err, RegistryError::Load { .. }));

        let status = registry.status("g1").unwrap();
        assert_eq!(status.state, ModuleState::Unloaded);
        assert!(status.error.unwrap().contains("unknown module type"));
    }

    #[tokio::test]
    async fn empty_id_is_a_configuration_error() {
        let registry = registry_with_inert();
        let err = registry.load_module(record("  ")).await.err().unwrap();
        assert!(matches!(err, RegistryError::Configuration { .. }));
    }

    #[tokio::test]
    async fn unload_is_quiet_for_unknown_id() {
        let registry = registry_with_inert();
        registry.unload_module("never-loaded").await;
        assert!(registry.status("never-loaded").is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let registry = registry_with_inert();
        registry.load_module(record("m1")).await.unwrap();
        registry.start_module("m1").await.unwrap();
        registry.stop_module("m1").await.unwrap();
        registry.stop_module("m1").await.unwrap();
        assert_eq!(registry.status("m1").unwrap().state, ModuleState::Stopped);
    }

    #[tokio::test]
    async fn submit_command_requires_loaded_target() {
        let registry = registry_with_inert();
        let err = registry.submit_command("nope", json!({})).unwrap_err();
        assert!(matches!(err, RegistryError::NotLoaded { .. }));
    }
}
