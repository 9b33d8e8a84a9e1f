//! Access to the SOA (JSON REST) service layer.
//!
//! Everything above this module talks to the backend through the
//! [`RequestService`] trait; `SoaClient` is the HTTP implementation.

mod client;
mod error;
mod preferences;

#[cfg(test)]
mod tests;

pub use client::SoaClient;
pub use error::SoaError;
pub use preferences::{
    MemoryPreferenceStore, PreferenceStore, SoaPreferenceStore, GET_PREFERENCES, PREFERENCES_CTX_KEY,
    PREFERENCE_SERVICE,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a backend object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelObject {
    pub uid: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl ModelObject {
    pub fn new(uid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            type_name: type_name.into(),
        }
    }
}

#[async_trait]
pub trait RequestService: Send + Sync {
    /// Post `input` to `service/operation` and return the raw response,
    /// partial errors included.
    async fn post_unchecked(
        &self,
        service: &str,
        operation: &str,
        input: Value,
    ) -> Result<Value, SoaError>;

    /// Like `post_unchecked`, but a response carrying partial errors is an
    /// error.
    async fn post(&self, service: &str, operation: &str, input: Value) -> Result<Value, SoaError> {
        let response = self.post_unchecked(service, operation, input).await?;
        let errors = partial_error_messages(&response);
        if errors.is_empty() {
            Ok(response)
        } else {
            Err(SoaError::PartialErrors(errors))
        }
    }
}

/// Collect `partialErrors[].errorValues[].message` from a response, looking at
/// both the top level and its `ServiceData`.
pub fn partial_error_messages(response: &Value) -> Vec<String> {
    let mut messages = Vec::new();
    let sources = [
        response.get("partialErrors"),
        response
            .get("ServiceData")
            .and_then(|data| data.get("partialErrors")),
    ];

    for errors in sources.into_iter().flatten().filter_map(Value::as_array) {
        for error in errors {
            let values = error
                .get("errorValues")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for value in values {
                if let Some(message) = value.get("message").and_then(Value::as_str) {
                    messages.push(message.to_string());
                }
            }
        }
    }
    messages
}
