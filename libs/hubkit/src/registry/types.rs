//! Module-type discovery.
//!
//! Each installable module type exposes a descriptor triple - human-readable
//! type name, implementation identifier (what configs reference as
//! `module_type`) and config-shape identifier - plus a factory. Descriptors
//! are submitted at link time via `inventory` and collected once at startup;
//! tests and embedders can also register types explicitly, including
//! closure-backed factories.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::contracts::Module;

/// Link-time descriptor submitted by module crates:
///
/// ```ignore
/// inventory::submit! {
///     hubkit::ModuleTypeDescriptor {
///         type_name: "Simulated sensor",
///         impl_id: "sim-sensor",
///         config_kind: "sim-sensor/config@1",
///         factory: || Arc::new(SimSensorModule::default()),
///     }
/// }
/// ```
pub struct ModuleTypeDescriptor {
    pub type_name: &'static str,
    pub impl_id: &'static str,
    pub config_kind: &'static str,
    pub factory: fn() -> Arc<dyn Module>,
}

inventory::collect!(ModuleTypeDescriptor);

type DynFactory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Owned, runtime view of an installable module type.
#[derive(Clone)]
pub struct ModuleType {
    pub type_name: String,
    pub impl_id: String,
    pub config_kind: String,
    factory: DynFactory,
}

impl ModuleType {
    pub fn new(
        type_name: impl Into<String>,
        impl_id: impl Into<String>,
        config_kind: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Module> + Send + Sync + 'static,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            impl_id: impl_id.into(),
            config_kind: config_kind.into(),
            factory: Arc::new(factory),
        }
    }

    /// Construct a fresh, unconfigured module instance.
    pub fn instantiate(&self) -> Arc<dyn Module> {
        (self.factory)()
    }
}

impl std::fmt::Debug for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleType")
            .field("type_name", &self.type_name)
            .field("impl_id", &self.impl_id)
            .field("config_kind", &self.config_kind)
            .finish()
    }
}

impl From<&'static ModuleTypeDescriptor> for ModuleType {
    fn from(d: &'static ModuleTypeDescriptor) -> Self {
        Self {
            type_name: d.type_name.to_owned(),
            impl_id: d.impl_id.to_owned(),
            config_kind: d.config_kind.to_owned(),
            factory: Arc::new(d.factory),
        }
    }
}

/// Maps `module_type` identifiers to factories. Populated once from the
/// link-time inventory, extendable at runtime.
#[derive(Default)]
pub struct ModuleTypeRegistry {
    types: RwLock<HashMap<String, ModuleType>>,
}

impl ModuleTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every descriptor submitted via `inventory`.
    pub fn discover() -> Self {
        let registry = Self::new();
        for descriptor in inventory::iter::<ModuleTypeDescriptor> {
            registry.register(ModuleType::from(descriptor));
        }
        registry
    }

    /// Register (or replace) a module type.
    pub fn register(&self, module_type: ModuleType) {
        let mut types = self.types.write();
        if let Some(previous) = types.insert(module_type.impl_id.clone(), module_type) {
            tracing::warn!(impl_id = %previous.impl_id, "Module type re-registered, replacing previous factory");
        }
    }

    pub fn resolve(&self, impl_id: &str) -> Option<ModuleType> {
        self.types.read().get(impl_id).cloned()
    }

    /// All installable types, sorted by implementation id.
    pub fn available(&self) -> Vec<ModuleType> {
        let mut all: Vec<ModuleType> = self.types.read().values().cloned().collect();
        all.sort_by(|a, b| a.impl_id.cmp(&b.impl_id));
        all
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}
