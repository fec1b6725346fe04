//! CapabilityBroker - thread-safe directory of capability-typed services
//!
//! Plugins (and the host shell) publish service instances under their
//! capability type; consumers take duplicate-free snapshots or run async
//! queries across all providers. Volume is low and critical sections are
//! short, so one general-purpose lock guards the whole directory.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Entry {
    instance: Arc<dyn Any + Send + Sync>,
    /// Data-pointer identity of the registered Arc, used for dedup and removal
    key: usize,
}

/// Multi-value directory of capability providers keyed by type
#[derive(Default)]
pub struct CapabilityBroker {
    providers: Mutex<HashMap<TypeId, Vec<Entry>>>,
}

fn identity_key<T: 'static>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

impl CapabilityBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its capability type. Idempotent: a second
    /// registration of the same instance is a no-op.
    pub fn register<T: Any + Send + Sync>(&self, instance: Arc<T>) {
        self.register_erased(TypeId::of::<T>(), instance);
    }

    /// Type-erased registration, used when the capability type is only
    /// known as a `TypeId` (the per-plugin hub handle). Returns the
    /// instance's identity key.
    pub fn register_erased(
        &self,
        type_id: TypeId,
        instance: Arc<dyn Any + Send + Sync>,
    ) -> usize {
        let key = Arc::as_ptr(&instance) as *const () as usize;
        let mut providers = self.providers.lock();
        let list = providers.entry(type_id).or_default();
        if !list.iter().any(|e| e.key == key) {
            list.push(Entry { instance, key });
        }
        key
    }

    /// Remove a provider from the list for type `T`. Idempotent.
    pub fn unregister<T: Any + Send + Sync>(&self, instance: &Arc<T>) {
        self.unregister_erased(TypeId::of::<T>(), identity_key(instance));
    }

    pub(crate) fn unregister_erased(&self, type_id: TypeId, key: usize) {
        let mut providers = self.providers.lock();
        if let Some(list) = providers.get_mut(&type_id) {
            list.retain(|e| e.key != key);
            if list.is_empty() {
                providers.remove(&type_id);
            }
        }
    }

    /// Remove an instance from every capability list it appears in
    pub fn unregister_all<T: Any + Send + Sync>(&self, instance: &Arc<T>) {
        self.unregister_key(identity_key(instance));
    }

    pub(crate) fn unregister_key(&self, key: usize) {
        let mut providers = self.providers.lock();
        providers.retain(|_, list| {
            list.retain(|e| e.key != key);
            !list.is_empty()
        });
    }

    /// Duplicate-free snapshot of the current providers for type `T`,
    /// in registration order
    pub fn providers<T: Any + Send + Sync>(&self) -> Vec<Arc<T>> {
        self.providers_erased(TypeId::of::<T>())
            .into_iter()
            .filter_map(|p| p.downcast::<T>().ok())
            .collect()
    }

    pub(crate) fn providers_erased(&self, type_id: TypeId) -> Vec<Arc<dyn Any + Send + Sync>> {
        let providers = self.providers.lock();
        providers
            .get(&type_id)
            .map(|list| list.iter().map(|e| Arc::clone(&e.instance)).collect())
            .unwrap_or_default()
    }

    /// First provider whose selector-derived identifier matches,
    /// case-insensitively
    pub fn provider_by_id<T, F>(&self, identifier: &str, selector: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> &str,
    {
        self.providers::<T>()
            .into_iter()
            .find(|p| selector(p).eq_ignore_ascii_case(identifier))
    }

    /// Run an async query against every provider of `T` in registration
    /// order, aggregating results. Cancellation is honored between
    /// providers; an in-flight query runs to completion.
    pub async fn query_all<T, R, F, Fut>(&self, mut query: F, cancel: &CancellationToken) -> Vec<R>
    where
        T: Any + Send + Sync,
        F: FnMut(Arc<T>) -> Fut,
        Fut: Future<Output = Vec<R>>,
    {
        let snapshot = self.providers::<T>();
        let mut results = Vec::new();
        for provider in snapshot {
            if cancel.is_cancelled() {
                break;
            }
            results.extend(query(provider).await);
        }
        results
    }
}
