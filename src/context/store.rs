use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bus::event_types::{
    ContextChange, TOPIC_CTX_REGISTER, TOPIC_CTX_UNREGISTER, TOPIC_CTX_UPDATE,
};
use crate::bus::{BusEvent, EventBus, SubscriberError, SubscriptionHandle};

use super::path;
use super::ContextError;

/// Key/value state shared between components.
///
/// Registration is strict: `register` only creates, `update` only replaces,
/// `register_or_update` does either. Values are always replaced whole. Every
/// mutation is announced on the bus after the entry lock is released, so
/// subscribers may read the store from their callbacks.
pub struct ContextStore {
    entries: DashMap<String, Value>,
    bus: Arc<EventBus>,
}

impl ContextStore {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            entries: DashMap::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Create `key`. An existing key is left untouched and reported as
    /// `ContextError::DuplicateKey`.
    pub fn register(&self, key: &str, value: Value) -> Result<(), ContextError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(key, "context key already registered, ignoring register");
                return Err(ContextError::DuplicateKey(key.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
            }
        }
        self.announce(TOPIC_CTX_REGISTER, key, None, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(key, "context value has unexpected shape: {e}");
                None
            }
        }
    }

    /// Look up a dotted path such as `"viewer.skipBeforeUnloadExecution"`.
    pub fn get_path(&self, dotted: &str) -> Option<Value> {
        let (key, segments) = path::split_key(dotted);
        let entry = self.entries.get(key)?;
        path::lookup(entry.value(), &segments).cloned()
    }

    /// Replace the value of an existing key.
    pub fn update(&self, key: &str, value: Value) -> Result<(), ContextError> {
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                tracing::warn!(key, "update on unregistered context key");
                return Err(ContextError::MissingKey(key.to_string()));
            };
            *entry = value.clone();
        }
        self.announce(TOPIC_CTX_UPDATE, key, None, value);
        Ok(())
    }

    pub fn register_or_update(&self, key: &str, value: Value) {
        let existed = self.entries.insert(key.to_string(), value.clone()).is_some();
        let topic = if existed {
            TOPIC_CTX_UPDATE
        } else {
            TOPIC_CTX_REGISTER
        };
        self.announce(topic, key, None, value);
    }

    /// Write `value` at a dotted path below a key, e.g.
    /// `update_partial("viewer.skipBeforeUnloadExecution", json!(true))`.
    ///
    /// The current value is copied, modified and stored back as a whole; the
    /// key is registered if absent.
    pub fn update_partial(&self, dotted: &str, value: Value) -> Result<(), ContextError> {
        let (key, segments) = path::split_key(dotted);
        if key.is_empty() {
            return Err(ContextError::MissingKey(dotted.to_string()));
        }

        let (existed, whole) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let mut next = slot.get().clone();
                path::assign(&mut next, dotted, &segments, value.clone())?;
                slot.insert(next.clone());
                (true, next)
            }
            Entry::Vacant(slot) => {
                let mut next = Value::Null;
                path::assign(&mut next, dotted, &segments, value.clone())?;
                slot.insert(next.clone());
                (false, next)
            }
        };

        let topic = if existed {
            TOPIC_CTX_UPDATE
        } else {
            TOPIC_CTX_REGISTER
        };
        let target = (!segments.is_empty()).then(|| dotted.to_string());
        match target {
            Some(target) => self.announce(topic, key, Some(target), value),
            None => self.announce(topic, key, None, whole),
        }
        Ok(())
    }

    pub fn unregister(&self, key: &str) -> Option<Value> {
        let (_, previous) = self.entries.remove(key)?;
        self.announce(TOPIC_CTX_UNREGISTER, key, None, Value::Null);
        Some(previous)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry without announcing. Used at teardown.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Subscribe to register/update/unregister announcements for one key.
    /// Returns one handle per underlying topic.
    pub fn watch<F>(&self, key: &str, callback: F, owner: Option<&str>) -> Vec<SubscriptionHandle>
    where
        F: Fn(&ContextChange) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        [TOPIC_CTX_REGISTER, TOPIC_CTX_UPDATE, TOPIC_CTX_UNREGISTER]
            .into_iter()
            .map(|topic| {
                let key = key.to_string();
                let callback = callback.clone();
                self.bus.subscribe(
                    topic,
                    move |event: &BusEvent| {
                        let change = event.payload_as::<ContextChange>()?;
                        if change.name == key {
                            callback(&change)
                        } else {
                            Ok(())
                        }
                    },
                    owner,
                )
            })
            .collect()
    }

    fn announce(&self, topic: &str, key: &str, target: Option<String>, value: Value) {
        let change = ContextChange {
            name: key.to_string(),
            target,
            value,
        };
        match serde_json::to_value(&change) {
            Ok(payload) => {
                self.bus.publish(topic, payload);
            }
            Err(e) => tracing::error!(key, "failed to serialize context change: {e}"),
        }
    }
}
