use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::event_types::TOPIC_PREFERENCES_LOADED;
use crate::bus::{EventBus, SubscriptionHandle};
use crate::context::ContextStore;
use crate::polling::{
    PollInterval, PollState, PollTask, PollTaskError, PollingCoordinator,
};
use crate::soa::{PreferenceStore, RequestService, SoaError};

/// Preference holding the polling interval in minutes.
pub const POLLING_INTERVAL_PREFERENCE: &str = "AWS_Notifications_Polling_Interval";
pub const UNREAD_COUNT_CTX_KEY: &str = "unreadMessageCount";
pub const MESSAGE_SERVICE: &str = "Internal-Notification-2015-10-MessageManagement";
pub const GET_UNREAD_MESSAGES: &str = "getUnreadMessages";
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 45_000;

const OWNER: &str = "notification.polling";

/// What `configure` found in the preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configured {
    /// Preference not available yet.
    Pending,
    Polling(PollInterval),
    /// Preference present but disabled or unparsable.
    Disabled,
}

/// Keeps `unreadMessageCount` in the context current by polling the message
/// service at the interval configured in preferences.
pub struct UnreadMessagePoller {
    ctx: Arc<ContextStore>,
    bus: Arc<EventBus>,
    soa: Arc<dyn RequestService>,
    preferences: Arc<dyn PreferenceStore>,
    coordinator: PollingCoordinator,
    initial_delay_ms: u64,
    waiting_for_preferences: Mutex<Option<SubscriptionHandle>>,
}

impl UnreadMessagePoller {
    pub fn new(
        ctx: Arc<ContextStore>,
        soa: Arc<dyn RequestService>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let bus = ctx.bus().clone();
        Self {
            ctx,
            bus,
            soa,
            preferences,
            coordinator: PollingCoordinator::new(OWNER),
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            waiting_for_preferences: Mutex::new(None),
        }
    }

    pub fn with_initial_delay_ms(mut self, initial_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    pub fn state(&self) -> PollState {
        self.coordinator.state()
    }

    pub fn coordinator(&self) -> &PollingCoordinator {
        &self.coordinator
    }

    /// Register the context entry and start polling, or wait for
    /// `bulkPreferencesLoaded` if the interval preference is not available.
    pub async fn init(self: &Arc<Self>) -> Configured {
        self.ctx.register_or_update(UNREAD_COUNT_CTX_KEY, json!(""));

        let configured = self.configure().await;
        if configured == Configured::Pending {
            self.wait_for_preferences();
        }
        configured
    }

    /// Read the interval preference and (re)start the coordinator accordingly.
    pub async fn configure(self: &Arc<Self>) -> Configured {
        let raw = match self
            .preferences
            .get_string_value(POLLING_INTERVAL_PREFERENCE)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("failed to read {POLLING_INTERVAL_PREFERENCE}: {e}");
                return Configured::Pending;
            }
        };

        let interval = match PollInterval::from_preference(POLLING_INTERVAL_PREFERENCE, raw.as_deref()) {
            Ok(Some(interval)) => interval,
            Ok(None) => return Configured::Pending,
            Err(e) => {
                tracing::warn!("{e}; unread message polling disabled");
                self.cancel_wait();
                self.coordinator.stop();
                return Configured::Disabled;
            }
        };

        self.cancel_wait();
        match interval {
            PollInterval::Enabled(_) => {
                self.coordinator
                    .start(interval.as_millis(), self.initial_delay_ms, self.clone());
                Configured::Polling(interval)
            }
            PollInterval::Disabled => {
                tracing::info!("unread message polling disabled by preference");
                self.coordinator.stop();
                Configured::Disabled
            }
        }
    }

    /// Fetch the unread count once and publish it to the context.
    pub async fn update_unread_messages(&self) {
        match self.fetch_count().await {
            Ok(count) => self.update_context(count),
            // Usually an idle session; the next tick retries.
            Err(e) => tracing::debug!("unread message request failed: {e}"),
        }
    }

    /// Empty string for zero, the count otherwise.
    pub fn update_context(&self, count: usize) {
        let value = if count == 0 {
            Value::String(String::new())
        } else {
            json!(count)
        };
        self.ctx.register_or_update(UNREAD_COUNT_CTX_KEY, value);
    }

    pub fn shutdown(&self) {
        self.coordinator.stop();
        self.cancel_wait();
        self.bus.unsubscribe_owner(OWNER);
    }

    async fn fetch_count(&self) -> Result<usize, SoaError> {
        let response = self
            .soa
            .post(MESSAGE_SERVICE, GET_UNREAD_MESSAGES, Value::Null)
            .await?;
        Ok(response
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0))
    }

    fn wait_for_preferences(self: &Arc<Self>) {
        let mut slot = self
            .waiting_for_preferences
            .lock()
            .expect("preference wait mutex poisoned");
        if slot.is_some() {
            return;
        }

        let poller = Arc::downgrade(self);
        let handle = self.bus.subscribe(
            TOPIC_PREFERENCES_LOADED,
            move |_| {
                if let Some(poller) = poller.upgrade() {
                    // Never await inside a bus callback.
                    tokio::spawn(async move {
                        poller.configure().await;
                    });
                }
                Ok(())
            },
            Some(OWNER),
        );
        tracing::debug!("waiting for preferences before starting unread message polling");
        *slot = Some(handle);
    }

    fn cancel_wait(&self) {
        let handle = self
            .waiting_for_preferences
            .lock()
            .expect("preference wait mutex poisoned")
            .take();
        if let Some(handle) = handle {
            self.bus.unsubscribe(&handle);
        }
    }
}

#[async_trait]
impl PollTask for UnreadMessagePoller {
    type Output = usize;

    async fn fetch(&self) -> Result<usize, PollTaskError> {
        Ok(self.fetch_count().await?)
    }

    fn apply(&self, count: usize) {
        self.update_context(count);
    }
}
