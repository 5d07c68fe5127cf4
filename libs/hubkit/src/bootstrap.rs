//! Host bootstrap.
//!
//! Layered configuration (defaults -> YAML file -> environment), a root
//! cancellation token wired to OS signals or an external owner, and the full
//! host cycle: open store -> build registry -> bulk load -> wait -> ordered
//! shutdown.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::registry::{ModuleRegistry, ModuleTypeRegistry};
use crate::repository::JsonConfigRepository;

/// Environment variable prefix for config overrides (`SENSORHUB__DATA_DIR`...).
const ENV_PREFIX: &str = "SENSORHUB__";

/// Host-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory of persisted module config records.
    pub store_dir: PathBuf,
    /// Base directory for module data and state snapshots.
    pub data_dir: PathBuf,
    /// Upper bound for a single module's `start`, in seconds.
    pub start_timeout_secs: u64,
    /// Persist configuration records again during shutdown.
    pub save_config_on_shutdown: bool,
    /// Persist module state snapshots during shutdown.
    pub save_state_on_shutdown: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("config"),
            data_dir: PathBuf::from("data"),
            start_timeout_secs: 30,
            save_config_on_shutdown: false,
            save_state_on_shutdown: true,
        }
    }
}

impl HostConfig {
    /// Layered load: defaults -> YAML (if provided) -> env (`SENSORHUB__*`).
    ///
    /// # Errors
    /// Fails when the file or environment carry values that do not fit the
    /// config shape.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Ok(figment.extract()?)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// How the host decides when to stop.
pub enum ShutdownTrigger {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
}

/// Options for running the host cycle.
pub struct RunOptions {
    pub config: HostConfig,
    /// Installable module types (usually `ModuleTypeRegistry::discover()`).
    pub types: ModuleTypeRegistry,
    pub shutdown: ShutdownTrigger,
}

/// Full host cycle: open store -> bulk load -> wait -> ordered shutdown.
///
/// Per-module load/start failures are warnings; only structural failures
/// (unreadable store, corrupt records) abort the bootstrap with an error.
///
/// # Errors
/// Returns an error on fatal bootstrap failure - the caller maps this to the
/// reserved process exit status.
pub async fn run(opts: RunOptions) -> anyhow::Result<()> {
    let cancel = match &opts.shutdown {
        ShutdownTrigger::Token(t) => t.clone(),
        ShutdownTrigger::Signals => CancellationToken::new(),
    };

    if matches!(opts.shutdown, ShutdownTrigger::Signals) {
        let c = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            tracing::info!("shutdown: signal received");
            c.cancel();
        });
    } else {
        tracing::info!("shutdown: external token will control lifecycle");
    }

    let repository = Arc::new(JsonConfigRepository::open(&opts.config.store_dir)?);
    tracing::info!(
        store = %opts.config.store_dir.display(),
        data = %opts.config.data_dir.display(),
        "Config store opened"
    );

    let registry = ModuleRegistry::new(repository, opts.types)
        .with_start_timeout(opts.config.start_timeout())
        .with_state_dir(opts.config.data_dir.join("state"))
        .with_cancellation_token(cancel.clone());

    let report = registry.load_all().await?;
    for failure in &report.failures {
        tracing::warn!(module = %failure.id, error = %failure.error, "Module failed to load");
    }
    if !report.cyclic.is_empty() {
        tracing::error!(ids = ?report.cyclic, "Modules rejected: dependency cycle");
    }
    tracing::info!(
        loaded = report.loaded.len(),
        disabled = report.disabled.len(),
        "SensorHub up"
    );

    cancel.cancelled().await;

    let shutdown = registry
        .shutdown(
            opts.config.save_config_on_shutdown,
            opts.config.save_state_on_shutdown,
        )
        .await;
    for failure in &shutdown.failures {
        tracing::warn!(module = %failure.id, error = %failure.error, "Module failed during shutdown");
    }
    Ok(())
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(error) => {
                tracing::warn!(%error, "SIGTERM handler unavailable, falling back to ctrl_c");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
