//! Named store of shared resources.
//!
//! Every resource is identified by an id and created at most once, even
//! when several threads ask for it at the same time. The registry is owned
//! by whoever needs it (no process-wide state): callers pick distinguishing
//! ids, typically `{identity-hash}-{cache-type}`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

type Resource = Arc<dyn Any + Send + Sync>;

/// Registry of shared resources guarded by a single lock.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Mutex<HashMap<String, Resource>>,
}

impl ResourceRegistry {
    /// Create an empty [`ResourceRegistry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the resource stored under `id`, creating it with `factory`
    /// if there is none.
    ///
    /// The lock is held while `factory` runs, so it must be cheap and must
    /// not perform I/O. A resource of another type stored under `id` is
    /// replaced.
    pub fn get_or_create<T, F>(&self, id: &str, factory: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut resources = self.resources.lock();

        if let Some(resource) = resources.get(id) {
            match Arc::clone(resource).downcast::<T>() {
                Ok(resource) => return resource,
                Err(_) => {
                    tracing::warn!(%id, "resource type changed, replacing it")
                },
            }
        }

        let resource = Arc::new(factory());
        resources.insert(id.to_owned(), resource.clone() as Resource);
        resource
    }

    /// Return the resource stored under `id`, if any.
    pub fn get<T>(&self, id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let resource = Arc::clone(self.resources.lock().get(id)?);
        resource.downcast::<T>().ok()
    }

    /// Forcibly set the resource.
    pub fn set<T>(&self, id: &str, resource: T) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        let resource = Arc::new(resource);
        self.resources
            .lock()
            .insert(id.to_owned(), resource.clone() as Resource);
        resource
    }

    /// Remove the resource stored under `id`.
    pub fn remove(&self, id: &str) {
        self.resources.lock().remove(id);
    }

    /// Remove every resource whose id starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) {
        self.resources
            .lock()
            .retain(|id, _| !id.starts_with(prefix));
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
