use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::command::CommandTracker;
use crate::config::{ConfigError, module_params_or_default, module_params_required};
use crate::events::{Event, EventBus, EventKind};
use crate::repository::ConfigRecord;
use crate::service_hub::ServiceHub;

/// Module execution context - the primary interface for modules to access
/// runtime resources.
///
/// Passed to `Module::init` and carrying:
/// - **Configuration**: typed params loading via `params()` / `params_required()`
/// - **Service discovery**: [`ServiceHub`] for registering/consuming other
///   modules' interfaces
/// - **Events**: the bus shared with the registry and the other modules
/// - **Lifecycle**: a module-scoped cancellation token, cancelled when the
///   module is unloaded
#[derive(Clone)]
pub struct ModuleCtx {
    record: ConfigRecord,
    service_hub: Arc<ServiceHub>,
    events: Arc<EventBus>,
    commands: Arc<CommandTracker>,
    cancellation_token: CancellationToken,
}

/// Factory for per-module execution contexts, owned by the registry.
///
/// Holds the process-wide singletons and mints a module-scoped view (child
/// cancellation token, the module's own config record) per lifecycle call.
pub struct ModuleContextBuilder {
    service_hub: Arc<ServiceHub>,
    events: Arc<EventBus>,
    commands: Arc<CommandTracker>,
    root_token: CancellationToken,
}

impl ModuleContextBuilder {
    pub fn new(
        service_hub: Arc<ServiceHub>,
        events: Arc<EventBus>,
        commands: Arc<CommandTracker>,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            service_hub,
            events,
            commands,
            root_token,
        }
    }

    /// Resolve a module-scoped context for the given config record.
    pub fn for_module(&self, record: ConfigRecord) -> ModuleCtx {
        ModuleCtx {
            record,
            service_hub: self.service_hub.clone(),
            events: self.events.clone(),
            commands: self.commands.clone(),
            cancellation_token: self.root_token.child_token(),
        }
    }
}

impl ModuleCtx {
    #[inline]
    pub fn module_id(&self) -> &str {
        self.record.id()
    }

    #[inline]
    pub fn config(&self) -> &ConfigRecord {
        &self.record
    }

    /// Deserialize the module's params section into `T`, or use defaults if
    /// the section is absent.
    ///
    /// # Errors
    /// `ConfigError::InvalidParams` if the section exists but does not match `T`.
    pub fn params<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        module_params_or_default(&self.record.config)
    }

    /// Deserialize the module's params section into `T`, requiring presence.
    ///
    /// # Errors
    /// `ConfigError::MissingParams` / `ConfigError::InvalidParams`.
    pub fn params_required<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        module_params_required(&self.record.config)
    }

    /// Access the service registry for inter-module communication.
    ///
    /// **Register** your module's public interface during `init()`:
    /// ```ignore
    /// ctx.service_hub().register::<dyn RecordStore>(ctx.module_id(), store);
    /// ```
    ///
    /// **Consume** another module's interface by its id:
    /// ```ignore
    /// let store = ctx.service_hub().get::<dyn RecordStore>("storage1")?;
    /// ```
    #[inline]
    pub fn service_hub(&self) -> &ServiceHub {
        &self.service_hub
    }

    #[inline]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Publish an event sourced from this module.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        self.events
            .publish(&Event::new(self.module_id(), kind, payload));
    }

    #[inline]
    pub fn commands(&self) -> &Arc<CommandTracker> {
        &self.commands
    }

    /// Module-scoped cancellation token; cancelled when the module is
    /// unloaded or the host shuts down.
    #[inline]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}
