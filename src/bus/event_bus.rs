use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::debounce::Debouncer;
use super::event_types::TopicPayload;

const TAP_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub seq: i64,
    pub topic: String,
    pub payload: serde_json::Value,
    pub published_at: String,
}

impl BusEvent {
    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, SubscriberError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| SubscriberError::InvalidPayload {
            topic: self.topic.clone(),
            message: e.to_string(),
        })
    }
}

/// Failure raised by a subscriber callback. Always caught by the bus.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("payload on '{topic}' did not match the expected shape: {message}")]
    InvalidPayload { topic: String, message: String },
    #[error("subscriber failed: {0}")]
    Failed(String),
    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

pub type Callback = Arc<dyn Fn(&BusEvent) -> Result<(), SubscriberError> + Send + Sync>;

/// Handle returned by `subscribe`, used to remove that one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Subscriber {
    id: u64,
    owner: Option<String>,
    once: bool,
    callback: Callback,
}

/// Topic based publish/subscribe.
///
/// Delivery is synchronous on the publishing thread, in subscription order.
/// Every published event is also mirrored onto a broadcast channel (see
/// [`EventBus::tap`]) for async observers.
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    seq: AtomicI64,
    tap: broadcast::Sender<BusEvent>,
    debouncers: DashMap<String, Debouncer>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            seq: AtomicI64::new(0),
            tap,
            debouncers: DashMap::new(),
        }
    }

    pub fn subscribe<F>(
        &self,
        topic: impl Into<String>,
        callback: F,
        owner: Option<&str>,
    ) -> SubscriptionHandle
    where
        F: Fn(&BusEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.insert(topic.into(), Arc::new(callback), owner, false)
    }

    /// Subscribe for a single delivery. The subscription is removed before the
    /// callback runs.
    pub fn subscribe_once<F>(
        &self,
        topic: impl Into<String>,
        callback: F,
        owner: Option<&str>,
    ) -> SubscriptionHandle
    where
        F: Fn(&BusEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.insert(topic.into(), Arc::new(callback), owner, true)
    }

    /// Subscribe to the topic declared by `T`, deserializing each payload.
    pub fn subscribe_typed<T, F>(&self, callback: F, owner: Option<&str>) -> SubscriptionHandle
    where
        T: TopicPayload,
        F: Fn(T) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe(
            T::TOPIC,
            move |event: &BusEvent| {
                let payload = event.payload_as::<T>()?;
                callback(payload)
            },
            owner,
        )
    }

    fn insert(
        &self,
        topic: String,
        callback: Callback,
        owner: Option<&str>,
        once: bool,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.topics.lock().expect("event bus mutex poisoned");
        guard.entry(topic.clone()).or_default().push(Subscriber {
            id,
            owner: owner.map(str::to_string),
            once,
            callback,
        });
        tracing::trace!(topic = %topic, id, owner = ?owner, "subscribed");
        SubscriptionHandle { topic, id }
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut guard = self.topics.lock().expect("event bus mutex poisoned");
        let Some(subscribers) = guard.get_mut(&handle.topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            guard.remove(&handle.topic);
        }
        removed
    }

    /// Remove every subscription registered with `owner`. Returns how many
    /// were removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut guard = self.topics.lock().expect("event bus mutex poisoned");
        let mut removed = 0;
        guard.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.owner.as_deref() != Some(owner));
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let guard = self.topics.lock().expect("event bus mutex poisoned");
        guard.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Publish `payload` on `topic` and return the delivered event.
    ///
    /// Callbacks registered at the time of the call are invoked in order.
    /// A callback that fails or panics is logged and skipped; it never stops
    /// delivery to the rest.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> BusEvent {
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            topic: topic.to_string(),
            payload,
            published_at: Utc::now().to_rfc3339(),
        };

        for (id, owner, callback) in self.snapshot(topic) {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&event)))
                .unwrap_or_else(|panic| Err(SubscriberError::Panicked(panic_message(&panic))));
            if let Err(e) = outcome {
                tracing::error!(
                    topic = %topic,
                    subscription = id,
                    owner = owner.as_deref().unwrap_or("-"),
                    "subscriber error: {e}"
                );
            }
        }

        // No tap receivers is the normal case.
        let _ = self.tap.send(event.clone());
        event
    }

    /// Publish a typed payload on its declared topic.
    pub fn publish_typed<T: TopicPayload>(&self, payload: &T) -> BusEvent {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(topic = T::TOPIC, "failed to serialize payload: {e}");
                serde_json::Value::Null
            }
        };
        self.publish(T::TOPIC, value)
    }

    /// Publish `payload` on `topic` once `delay` has passed without another
    /// debounced publish on the same topic. Only the last payload is sent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn publish_debounced(
        self: &Arc<Self>,
        topic: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) {
        let debouncer = self
            .debouncers
            .entry(topic.to_string())
            .or_insert_with(|| Debouncer::new(delay))
            .clone();
        let bus = Arc::downgrade(self);
        let topic = topic.to_string();
        debouncer.call(move || {
            if let Some(bus) = bus.upgrade() {
                bus.publish(&topic, payload);
            }
        });
    }

    /// Drop any pending debounced publish on `topic`.
    pub fn cancel_debounced(&self, topic: &str) {
        if let Some(debouncer) = self.debouncers.get(topic) {
            debouncer.cancel();
        }
    }

    /// Mirror of every published event, for async consumers.
    pub fn tap(&self) -> broadcast::Receiver<BusEvent> {
        self.tap.subscribe()
    }

    /// Remove all subscriptions and pending debounced publishes.
    pub fn clear(&self) {
        for entry in self.debouncers.iter() {
            entry.value().cancel();
        }
        self.debouncers.clear();
        self.topics.lock().expect("event bus mutex poisoned").clear();
    }

    fn snapshot(&self, topic: &str) -> Vec<(u64, Option<String>, Callback)> {
        let mut guard = self.topics.lock().expect("event bus mutex poisoned");
        let Some(subscribers) = guard.get_mut(topic) else {
            return Vec::new();
        };
        let snapshot = subscribers
            .iter()
            .map(|s| (s.id, s.owner.clone(), s.callback.clone()))
            .collect();
        subscribers.retain(|s| !s.once);
        if subscribers.is_empty() {
            guard.remove(topic);
        }
        snapshot
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
