//! In-process fan-out of committed blocks and transactions to subscribers.

pub mod publisher;
pub mod types;

pub use publisher::{EventPublisher, Subscription, SubscriptionId, DEFAULT_SUBSCRIPTION_CAPACITY};
pub use types::{Event, EventPayload, Topic};
