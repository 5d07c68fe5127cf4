//! Type-safe registry of inter-module services.
//!
//! Providers register an implementation during `init`; consumers fetch by
//! *interface type* (trait object) plus the providing module's id, without
//! knowing the implementation. This is how a sensor module binds to "the
//! record store configured as `storage1`" while staying decoupled from the
//! storage engine behind it.
//!
//! Key = (type name, provider module id). Value = `Arc<T>` stored as
//! `Box<dyn Any + Send + Sync>` and downcast on read. Re-registering
//! overwrites atomically; `Arc`s already held by consumers remain valid.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Stable type key for trait objects - uses fully-qualified `type_name::<T>()`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceHubError {
    #[error("service not found: type={type_key:?}, provider='{provider}'")]
    NotFound { type_key: TypeKey, provider: String },

    #[error("type mismatch in hub for type={type_key:?}, provider='{provider}'")]
    TypeMismatch { type_key: TypeKey, provider: String },
}

type Boxed = Box<dyn Any + Send + Sync>;

type ServiceMap = HashMap<(TypeKey, Arc<str>), Boxed>;

/// Registry of services keyed by (interface type, providing module id).
pub struct ServiceHub {
    map: RwLock<ServiceMap>,
}

impl ServiceHub {
    #[inline]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service under the interface type `T` for `provider`.
    /// `T` can be a trait object like `dyn hubkit::contracts::RecordStore`.
    pub fn register<T>(&self, provider: impl Into<Arc<str>>, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeKey::of::<T>(), provider.into());
        self.map.write().insert(key, Box::new(service));
    }

    /// Fetch the service `provider` exposes under interface type `T`.
    ///
    /// # Errors
    /// `NotFound` when nothing is registered under the key, `TypeMismatch`
    /// when the stored value is not an `Arc<T>`.
    pub fn get<T>(&self, provider: &str) -> Result<Arc<T>, ServiceHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let map = self.map.read();

        let boxed = map
            .get(&(type_key.clone(), Arc::from(provider)))
            .ok_or_else(|| ServiceHubError::NotFound {
                type_key: type_key.clone(),
                provider: provider.to_owned(),
            })?;

        if let Some(arc_t) = boxed.downcast_ref::<Arc<T>>() {
            return Ok(arc_t.clone());
        }
        Err(ServiceHubError::TypeMismatch {
            type_key,
            provider: provider.to_owned(),
        })
    }

    /// Remove a registration; returns the service if it was present.
    pub fn remove<T>(&self, provider: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeKey::of::<T>(), Arc::from(provider));
        let boxed = self.map.write().remove(&key)?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    /// Drop every registration owned by `provider` (any interface type).
    pub fn remove_provider(&self, provider: &str) {
        self.map.write().retain(|(_, p), _| p.as_ref() != provider);
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Default for ServiceHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Echo: Send + Sync {
        fn echo(&self) -> usize;
    }

    struct EchoImpl(usize);

    impl Echo for EchoImpl {
        fn echo(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn register_and_resolve_by_provider() {
        let hub = ServiceHub::new();
        hub.register::<dyn Echo>("store-a", Arc::new(EchoImpl(1)));
        hub.register::<dyn Echo>("store-b", Arc::new(EchoImpl(2)));

        assert_eq!(hub.get::<dyn Echo>("store-a").unwrap().echo(), 1);
        assert_eq!(hub.get::<dyn Echo>("store-b").unwrap().echo(), 2);
    }

    #[test]
    fn missing_provider_is_not_found() {
        let hub = ServiceHub::new();
        let err = hub.get::<dyn Echo>("nowhere").err().unwrap();
        assert!(matches!(err, ServiceHubError::NotFound { .. }));
    }

    #[test]
    fn reregistration_overwrites() {
        let hub = ServiceHub::new();
        hub.register::<dyn Echo>("s", Arc::new(EchoImpl(1)));
        let held = hub.get::<dyn Echo>("s").unwrap();

        hub.register::<dyn Echo>("s", Arc::new(EchoImpl(9)));
        assert_eq!(hub.get::<dyn Echo>("s").unwrap().echo(), 9);
        // Previously resolved Arc stays valid.
        assert_eq!(held.echo(), 1);
    }

    #[test]
    fn remove_provider_clears_all_registrations() {
        let hub = ServiceHub::new();
        hub.register::<dyn Echo>("s", Arc::new(EchoImpl(1)));
        assert_eq!(hub.len(), 1);
        hub.remove_provider("s");
        assert!(hub.is_empty());
    }
}
