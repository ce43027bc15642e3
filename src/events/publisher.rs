//! Topic-keyed subscriber registry.
//!
//! Every subscriber owns a bounded channel. Publishing never waits: when a
//! subscriber's buffer is full the new event is dropped for that subscriber
//! only and counted against it.

use super::types::{Event, Topic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Receiving side of a subscription.
///
/// Dropping the handle unsubscribes lazily: the publisher prunes the closed
/// channel on its next delivery attempt.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    receiver: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Waits for the next event. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Events discarded because this subscriber's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct EventPublisher {
    registry: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped_events: AtomicU64,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Publisher whose subscriptions buffer at most `capacity` events each.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "subscription capacity must be greater than zero");
        Self {
            registry: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a subscriber. Only events published afterwards are delivered.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        self.registry
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber {
                id,
                sender,
                dropped: dropped.clone(),
            });
        tracing::debug!(subscription = %id, %topic, "subscriber registered");

        Subscription {
            id,
            topic,
            receiver,
            dropped,
        }
    }

    /// Removes a subscriber and closes its channel. Returns `false` for an
    /// unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write();
        for subscribers in registry.values_mut() {
            if let Some(position) = subscribers.iter().position(|sub| sub.id == id) {
                subscribers.swap_remove(position);
                tracing::debug!(subscription = %id, "subscriber removed");
                return true;
            }
        }
        false
    }

    /// Delivers `event` to every subscriber of its topic and returns how many
    /// received it.
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let mut delivered = 0;
        let mut saw_closed = false;

        {
            let registry = self.registry.read();
            let Some(subscribers) = registry.get(&topic) else {
                return 0;
            };

            for subscriber in subscribers {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped_events.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            subscription = %subscriber.id,
                            %topic,
                            height = event.height(),
                            "subscriber buffer full; dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            self.prune_closed(topic);
        }

        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .read()
            .get(&topic)
            .map(|subscribers| subscribers.iter().filter(|sub| !sub.sender.is_closed()).count())
            .unwrap_or(0)
    }

    /// Events dropped across all subscribers since the publisher was created.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn prune_closed(&self, topic: Topic) {
        let mut registry = self.registry.write();
        if let Some(subscribers) = registry.get_mut(&topic) {
            let before = subscribers.len();
            subscribers.retain(|sub| !sub.sender.is_closed());
            let pruned = before - subscribers.len();
            if pruned > 0 {
                tracing::debug!(%topic, pruned, "pruned closed subscribers");
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("capacity", &self.capacity)
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}
