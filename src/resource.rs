// Resource identity and the weak resource registry
//
// Every renderer-owned object (models, textures, pipelines, render targets, ...)
// draws its id from ONE process-wide counter, so ids are unique across kinds.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique, never reused identity of a renderer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate the next id. Safe to call from any thread; a single atomic
    /// increment keeps ids strictly increasing in allocation order.
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub trait Resource: Send + Sync {
    fn id(&self) -> ResourceId;

    /// Short human readable kind, used in logs
    fn kind(&self) -> &'static str;
}

/// Non-owning bookkeeping of created resources.
///
/// Holds `Weak` handles only: registering never extends a lifetime, and entries
/// whose resource is already gone are skipped (and can be pruned).
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Mutex<Vec<Weak<dyn Resource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Weak<dyn Resource>) {
        self.entries.lock().push(resource);
    }

    /// Convenience over [`register`](Self::register) for a freshly created `Arc`
    pub fn track<T: Resource + 'static>(&self, resource: &Arc<T>) {
        let erased: Arc<dyn Resource> = resource.clone();
        self.register(Arc::downgrade(&erased));
    }

    /// Number of registered entries, dead ones included until pruned
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Resources that are still alive, in registration order
    pub fn live(&self) -> Vec<Arc<dyn Resource>> {
        self.entries
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Forget entries whose resource was dropped; returns how many were removed
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.strong_count() > 0);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(ResourceId);

    impl Dummy {
        fn new() -> Self {
            Self(ResourceId::next())
        }
    }

    impl Resource for Dummy {
        fn id(&self) -> ResourceId {
            self.0
        }

        fn kind(&self) -> &'static str {
            "dummy"
        }
    }

    #[test]
    fn ids_strictly_increase_in_creation_order() {
        let ids: Vec<_> = (0..64).map(|_| ResourceId::next()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn ids_stay_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| ResourceId::next()).collect::<Vec<_>>()))
            .collect();

        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }

    #[test]
    fn registry_does_not_keep_resources_alive() {
        let registry = ResourceRegistry::new();
        let kept = Arc::new(Dummy::new());
        let dropped = Arc::new(Dummy::new());

        registry.track(&kept);
        registry.track(&dropped);
        assert_eq!(Arc::strong_count(&dropped), 1);

        drop(dropped);

        let live = registry.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), kept.id());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.len(), 1);
    }
}
