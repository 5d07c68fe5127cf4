use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle states a managed module moves through.
///
/// `Unloaded -> Initialized -> Started -> Stopped -> Unloaded` (after
/// cleanup). An error is orthogonal: it is recorded next to the state in the
/// registry's status cell and does not replace it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Unloaded,
    Initialized,
    Started,
    Stopped,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Initialized => "initialized",
            ModuleState::Started => "started",
            ModuleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a module's status, readable from any thread
/// concurrently with lifecycle transitions.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub state: ModuleState,
    pub error: Option<String>,
}

/// A command routed to a module, paired with the tracker record created at
/// submission time.
#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub id: Uuid,
    pub payload: serde_json::Value,
}

/// The unit managed by the registry.
///
/// Implementations must be cheap to construct (the factory runs before any
/// configuration is known) and must keep `init` idempotent-safe after
/// `cleanup`: a module instance that went through the full cycle can be
/// re-initialized with fresh configuration.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Validate and store configuration. No external resources are acquired
    /// here; resource acquisition belongs to `start`.
    async fn init(&self, ctx: &crate::context::ModuleCtx) -> anyhow::Result<()>;

    /// Acquire resources and begin producing events/data. A failed start must
    /// leave the module as if it had never started (retryable). Long blocking
    /// waits (connects, reconnect loops) must select against `cancel`.
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Release what `start` acquired and cancel background activity. Called
    /// with the same token `start` received, already cancelled. Idempotent:
    /// stopping an already-stopped module is not an error.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Release everything permanently. After cleanup only a fresh `init` is
    /// valid.
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// Handle a submitted command, driving its tracker record through
    /// accept/complete (or reject). Modules without controllable actions keep
    /// the default, which rejects every command.
    async fn handle_command(
        &self,
        request: CommandRequest,
        tracker: &crate::command::CommandTracker,
    ) -> anyhow::Result<()> {
        tracker.reject(request.id, Some("module exposes no commands".to_owned()))?;
        Ok(())
    }

    /// Optional module-internal state snapshot, persisted by
    /// `ModuleRegistry::shutdown` when state saving is requested.
    fn snapshot_state(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Key/record interface storage modules expose to the rest of the hub.
///
/// The engine behind it (in-memory, on-disk, remote) is the storage module's
/// business; consumers resolve this contract through the
/// [`ServiceHub`](crate::service_hub::ServiceHub) scoped by the providing
/// module's id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, record: serde_json::Value) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
}
