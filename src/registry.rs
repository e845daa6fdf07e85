use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::destination::{DefaultDestinationFactory, Destination, DestinationFactory};
use crate::error::{Result, StompError};

/// Named destinations shared by every connection of a server.
///
/// Creation goes through the configured [`DestinationFactory`] and happens
/// at most once per name, even under concurrent first access. A refused
/// name is not remembered, so a later request asks the factory again.
pub struct DestinationRegistry {
    destinations: DashMap<String, Arc<dyn Destination>>,
    factory: Arc<dyn DestinationFactory>,
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::new(Arc::new(DefaultDestinationFactory))
    }
}

impl std::fmt::Debug for DestinationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationRegistry")
            .field("destinations", &self.names())
            .finish()
    }
}

impl DestinationRegistry {
    pub fn new(factory: Arc<dyn DestinationFactory>) -> Self {
        Self {
            destinations: DashMap::new(),
            factory,
        }
    }

    /// Existing destination `name`, or a fresh one from the factory.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<dyn Destination>> {
        if let Some(existing) = self.destinations.get(name) {
            return Ok(existing.value().clone());
        }
        // the entry guard holds the shard lock while the factory runs
        match self.destinations.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => match self.factory.create(name) {
                Some(destination) => {
                    tracing::debug!(destination = name, kind = ?destination.kind(), "destination created");
                    Ok(e.insert(destination).value().clone())
                }
                None => Err(StompError::DestinationRejected(name.to_string())),
            },
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Destination>> {
        self.destinations.get(name).map(|d| d.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Destination>> {
        self.destinations.remove(name).map(|(_, d)| d)
    }

    pub fn names(&self) -> Vec<String> {
        self.destinations.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{DestinationKind, Topic};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn creates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = move |name: &str| -> Option<Arc<dyn Destination>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(Topic::new(name)))
        };
        let registry = DestinationRegistry::new(Arc::new(factory));
        let a = registry.get_or_create("/topic/a").unwrap();
        let b = registry.get_or_create("/topic/a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_access_creates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = move |name: &str| -> Option<Arc<dyn Destination>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Arc::new(Topic::new(name)))
        };
        let registry = Arc::new(DestinationRegistry::new(Arc::new(factory)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("/topic/race").unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refusal_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory = move |_: &str| -> Option<Arc<dyn Destination>> {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        };
        let registry = DestinationRegistry::new(Arc::new(factory));
        assert!(matches!(
            registry.get_or_create("/x"),
            Err(StompError::DestinationRejected(_))
        ));
        assert!(registry.get_or_create("/x").is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn default_registry_and_remove() {
        let registry = DestinationRegistry::default();
        let q = registry.get_or_create("/queue/jobs").unwrap();
        assert_eq!(q.kind(), DestinationKind::Queue);
        assert_eq!(registry.names(), vec!["/queue/jobs".to_string()]);
        assert!(registry.remove("/queue/jobs").is_some());
        assert!(registry.get("/queue/jobs").is_none());
    }
}
