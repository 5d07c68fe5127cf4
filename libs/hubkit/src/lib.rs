//! HubKit - the module lifecycle core of SensorHub.
//!
//! SensorHub hosts independently developed components (sensor drivers,
//! storage engines, processing chains, network services) as *modules*. Each
//! module declares a configuration record; the [`registry::ModuleRegistry`]
//! instantiates, starts, stops and tears modules down in dependency-safe
//! order, while the [`events::EventBus`] lets modules observe each other's
//! lifecycle and data events without direct coupling.
//!
//! The crate is organized around five pieces:
//! - [`contracts`] - the `Module` capability contract and the `RecordStore`
//!   key/record interface storage modules expose.
//! - [`registry`] - the orchestrator: type discovery, dependency ordering,
//!   failure isolation, status queries.
//! - [`repository`] - durable, per-record-atomic storage of module
//!   configuration.
//! - [`events`] / [`command`] - in-process status and asynchronous command
//!   reporting.
//! - [`bootstrap`] - the host entry point: layered config, signal wiring,
//!   bulk load and ordered shutdown.

pub mod bootstrap;
pub mod command;
pub mod config;
pub mod context;
pub mod contracts;
pub mod events;
pub mod registry;
pub mod repository;
pub mod service_hub;
pub mod telemetry;

pub use command::{CommandId, CommandState, CommandStatus, CommandTracker};
pub use config::{ConfigError, module_params_or_default, module_params_required};
pub use context::{ModuleContextBuilder, ModuleCtx};
pub use contracts::{CommandRequest, Module, ModuleState, RecordStore, StatusSnapshot};
pub use events::{Event, EventBus, EventKind, EventListener, ListenerId};
pub use registry::{
    LoadReport, ModuleRegistry, ModuleType, ModuleTypeDescriptor, ModuleTypeRegistry,
    RegistryError, ShutdownReport,
};
pub use repository::{ConfigRecord, ConfigRepository, ModuleConfig, RepositoryError};
pub use service_hub::ServiceHub;
