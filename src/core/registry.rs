//! Application-wide attribute map and service registry.
//!
//! Both are shared by every event-loop and worker thread, so all access goes
//! through an `RwLock`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type Shared = Arc<dyn Any + Send + Sync>;

/// Named, typed application attributes.
#[derive(Default)]
pub struct Attributes {
    values: RwLock<HashMap<String, Shared>>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, returning true when it replaced an older value.
    pub fn set<T: Send + Sync + 'static>(&self, name: impl Into<String>, value: T) -> bool {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(value))
            .is_some()
    }

    /// Get an attribute of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.get(name).cloned().and_then(|v| v.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy entries of `other` whose names we do not hold yet.
    pub(crate) fn absorb(&self, other: &Attributes) {
        let theirs = other.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut ours = self.values.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in theirs.iter() {
            ours.entry(name.clone()).or_insert_with(|| Arc::clone(value));
        }
    }
}

/// Services keyed by type and optional name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<(TypeId, Option<String>), Shared>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the default instance of `T`.
    pub fn put<T: Send + Sync + 'static>(&self, service: T) -> Option<Arc<T>> {
        self.insert(None, Arc::new(service))
    }

    /// Register a named instance of `T`.
    pub fn put_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        service: T,
    ) -> Option<Arc<T>> {
        self.insert(Some(name.into()), Arc::new(service))
    }

    /// Register an already shared instance of `T`.
    pub fn put_arc<T: Send + Sync + 'static>(&self, service: Arc<T>) -> Option<Arc<T>> {
        self.insert(None, service)
    }

    fn insert<T: Send + Sync + 'static>(
        &self,
        name: Option<String>,
        service: Arc<T>,
    ) -> Option<Arc<T>> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((TypeId::of::<T>(), name), service)
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.lookup(None)
    }

    pub fn get_named<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.lookup(Some(name.to_string()))
    }

    /// Copy services of `other` whose type and name we do not hold yet.
    pub(crate) fn absorb(&self, other: &ServiceRegistry) {
        let theirs = other.services.read().unwrap_or_else(PoisonError::into_inner);
        let mut ours = self.services.write().unwrap_or_else(PoisonError::into_inner);
        for (key, service) in theirs.iter() {
            ours.entry(key.clone()).or_insert_with(|| Arc::clone(service));
        }
    }

    fn lookup<T: Send + Sync + 'static>(&self, name: Option<String>) -> Option<Arc<T>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        services
            .get(&(TypeId::of::<T>(), name))
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_attributes() {
        let attributes = Attributes::new();
        assert!(!attributes.set("greeting", String::from("hi")));
        assert!(attributes.set("greeting", String::from("hello")));

        assert_eq!(
            attributes.get::<String>("greeting").as_deref().map(String::as_str),
            Some("hello")
        );
        assert!(attributes.get::<u32>("greeting").is_none());
        assert!(attributes.remove("greeting"));
        assert!(attributes.is_empty());
    }

    #[test]
    fn test_attributes_concurrent_writes() {
        let attributes = Arc::new(Attributes::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let attributes = Arc::clone(&attributes);
                thread::spawn(move || {
                    for j in 0..100 {
                        attributes.set(format!("{}-{}", i, j), j);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(attributes.len(), 800);
    }

    #[test]
    fn test_services() {
        struct Db(&'static str);

        let services = ServiceRegistry::new();
        assert!(services.put(Db("primary")).is_none());
        services.put_named("replica", Db("replica"));

        assert_eq!(services.get::<Db>().unwrap().0, "primary");
        assert_eq!(services.get_named::<Db>("replica").unwrap().0, "replica");
        assert!(services.get::<String>().is_none());

        let old = services.put(Db("new"));
        assert_eq!(old.unwrap().0, "primary");
    }
}
