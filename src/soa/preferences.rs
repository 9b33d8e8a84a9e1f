use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};

use crate::bus::event_types::PreferencesLoaded;
use crate::context::ContextStore;

use super::{RequestService, SoaError};

pub const PREFERENCE_SERVICE: &str = "Administration-2012-09-PreferenceManagement";
pub const GET_PREFERENCES: &str = "getPreferences";
/// Context key holding every loaded preference as `name → [values]`.
pub const PREFERENCES_CTX_KEY: &str = "preferences";

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// First value of preference `name`, or `None` if it is unknown or not
    /// loaded yet.
    async fn get_string_value(&self, name: &str) -> Result<Option<String>, SoaError>;
}

/// Fixed preference values.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: DashMap<String, String>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.values.remove(name);
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn get_string_value(&self, name: &str) -> Result<Option<String>, SoaError> {
        Ok(self.values.get(name).map(|v| v.value().clone()))
    }
}

/// Preferences bulk-loaded from the server.
///
/// `load` fetches the requested names, caches them, mirrors them into the
/// `preferences` context entry and publishes `bulkPreferencesLoaded`. Until
/// then `get_string_value` answers `None` for anything not overridden.
pub struct SoaPreferenceStore {
    soa: Arc<dyn RequestService>,
    ctx: Arc<ContextStore>,
    cache: DashMap<String, Vec<String>>,
    overrides: HashMap<String, String>,
    loaded: AtomicBool,
}

impl SoaPreferenceStore {
    pub fn new(soa: Arc<dyn RequestService>, ctx: Arc<ContextStore>) -> Self {
        Self {
            soa,
            ctx,
            cache: DashMap::new(),
            overrides: HashMap::new(),
            loaded: AtomicBool::new(false),
        }
    }

    /// Values that win over anything loaded from the server.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Fetch `names` (`["*"]` for everything) and announce them. Returns the
    /// number of preferences received.
    pub async fn load(&self, names: &[&str]) -> Result<usize, SoaError> {
        let response = self
            .soa
            .post(
                PREFERENCE_SERVICE,
                GET_PREFERENCES,
                json!({
                    "preferenceNames": names,
                    "includePreferenceDescriptions": false,
                }),
            )
            .await?;

        let entries = parse_preferences(&response)?;
        let mut loaded_names = Vec::with_capacity(entries.len());
        for (name, values) in entries {
            loaded_names.push(name.clone());
            self.cache.insert(name, values);
        }
        self.loaded.store(true, Ordering::Release);

        let snapshot: Map<String, Value> = self
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), json!(entry.value())))
            .collect();
        self.ctx
            .register_or_update(PREFERENCES_CTX_KEY, Value::Object(snapshot));

        tracing::info!(count = loaded_names.len(), "preferences loaded");
        let count = loaded_names.len();
        self.ctx.bus().publish_typed(&PreferencesLoaded {
            names: loaded_names,
        });
        Ok(count)
    }
}

#[async_trait]
impl PreferenceStore for SoaPreferenceStore {
    async fn get_string_value(&self, name: &str) -> Result<Option<String>, SoaError> {
        if let Some(value) = self.overrides.get(name) {
            return Ok(Some(value.clone()));
        }
        Ok(self
            .cache
            .get(name)
            .and_then(|values| values.first().cloned()))
    }
}

/// Parse `response[].{definition.name, values.values}`.
fn parse_preferences(response: &Value) -> Result<Vec<(String, Vec<String>)>, SoaError> {
    let items = response
        .get("response")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SoaError::InvalidResponse("getPreferences response missing 'response' array".to_string())
        })?;

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item
            .get("definition")
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
        else {
            tracing::debug!("skipping preference without a name");
            continue;
        };
        let values = item
            .get("values")
            .and_then(|v| v.get("values"))
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        entries.push((name.to_string(), values));
    }
    Ok(entries)
}
