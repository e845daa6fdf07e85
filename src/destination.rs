use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::frame::Frame;
use crate::subscription::Subscription;

/// Routing semantics of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// Each message goes to exactly one subscriber, round-robin.
    Queue,
    /// Each message goes to every subscriber.
    Topic,
}

/// A named routing target.
///
/// Implementations keep their own subscriber set and must never route to a
/// subscription after `unsubscribe` returned for it.
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> DestinationKind;

    fn subscribe(&self, subscription: Arc<Subscription>);

    /// Remove subscription `subscription_id` of connection `connection_id`.
    /// Returns whether it was present.
    fn unsubscribe(&self, connection_id: u64, subscription_id: &str) -> bool;

    /// Remove every subscription owned by `connection_id`, returning how many
    /// were removed.
    fn unsubscribe_connection(&self, connection_id: u64) -> usize;

    /// Route a SEND frame. Returns the number of subscribers that received
    /// it.
    fn dispatch(&self, frame: &Frame) -> usize;

    fn subscription_count(&self) -> usize;
}

impl fmt::Debug for dyn Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Subscriber list shared by the built-in destinations.
#[derive(Debug, Default)]
struct Subscribers {
    entries: RwLock<Vec<Arc<Subscription>>>,
}

impl Subscribers {
    fn add(&self, subscription: Arc<Subscription>) {
        self.entries.write().push(subscription);
    }

    fn remove(&self, connection_id: u64, subscription_id: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| !(s.connection_id() == connection_id && s.id() == subscription_id));
        entries.len() != before
    }

    fn remove_connection(&self, connection_id: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|s| s.connection_id() != connection_id);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Publish/subscribe destination.
#[derive(Debug)]
pub struct Topic {
    name: String,
    subscribers: Subscribers,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Subscribers::default(),
        }
    }
}

impl Destination for Topic {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Topic
    }

    fn subscribe(&self, subscription: Arc<Subscription>) {
        self.subscribers.add(subscription);
    }

    fn unsubscribe(&self, connection_id: u64, subscription_id: &str) -> bool {
        self.subscribers.remove(connection_id, subscription_id)
    }

    fn unsubscribe_connection(&self, connection_id: u64) -> usize {
        self.subscribers.remove_connection(connection_id)
    }

    fn dispatch(&self, frame: &Frame) -> usize {
        let entries = self.subscribers.entries.read();
        entries.iter().filter(|s| s.deliver(frame)).count()
    }

    fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Point-to-point destination with round-robin delivery.
///
/// A subscriber whose connection is gone is skipped and the message goes to
/// the next one in line.
#[derive(Debug)]
pub struct Queue {
    name: String,
    subscribers: Subscribers,
    next: AtomicUsize,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Subscribers::default(),
            next: AtomicUsize::new(0),
        }
    }
}

impl Destination for Queue {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Queue
    }

    fn subscribe(&self, subscription: Arc<Subscription>) {
        self.subscribers.add(subscription);
    }

    fn unsubscribe(&self, connection_id: u64, subscription_id: &str) -> bool {
        self.subscribers.remove(connection_id, subscription_id)
    }

    fn unsubscribe_connection(&self, connection_id: u64) -> usize {
        self.subscribers.remove_connection(connection_id)
    }

    fn dispatch(&self, frame: &Frame) -> usize {
        let entries = self.subscribers.entries.read();
        let n = entries.len();
        if n == 0 {
            return 0;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..n {
            if entries[(start + offset) % n].deliver(frame) {
                return 1;
            }
        }
        0
    }

    fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Creates destinations on first use. Returning `None` refuses the name.
pub trait DestinationFactory: Send + Sync {
    fn create(&self, name: &str) -> Option<Arc<dyn Destination>>;
}

impl<F> DestinationFactory for F
where
    F: Fn(&str) -> Option<Arc<dyn Destination>> + Send + Sync,
{
    fn create(&self, name: &str) -> Option<Arc<dyn Destination>> {
        self(name)
    }
}

/// Names under `/queue/` become queues, everything else a topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDestinationFactory;

impl DestinationFactory for DefaultDestinationFactory {
    fn create(&self, name: &str) -> Option<Arc<dyn Destination>> {
        if name.starts_with("/queue/") {
            Some(Arc::new(Queue::new(name)))
        } else {
            Some(Arc::new(Topic::new(name)))
        }
    }
}
