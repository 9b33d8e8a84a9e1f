use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::SoaConfig;

use super::{RequestService, SoaError};

const JSON_REST_PATH: &str = "tc/JsonRestServices";

/// HTTP client for the JSON REST service endpoint.
pub struct SoaClient {
    base_url: String,
    timeout_ms: u64,
    client_id: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct Envelope<'a> {
    header: Header<'a>,
    body: &'a Value,
}

#[derive(Serialize)]
struct Header<'a> {
    state: State<'a>,
    policy: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct State<'a> {
    #[serde(rename = "clientID")]
    client_id: &'a str,
    stateless: bool,
    format_properties: bool,
}

impl SoaClient {
    pub fn new(config: &SoaConfig) -> Result<Self, SoaError> {
        if config.base_url.trim().is_empty() {
            return Err(SoaError::Config("soa base url cannot be empty".to_string()));
        }
        if config.timeout_ms == 0 {
            return Err(SoaError::Config(
                "soa timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            client_id: format!("ctxbus-{}", Uuid::new_v4()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .map_err(|error| SoaError::Config(error.to_string()))?,
        })
    }

    pub fn endpoint(&self, service: &str, operation: &str) -> String {
        format!("{}/{JSON_REST_PATH}/{service}/{operation}", self.base_url)
    }

    fn map_connectivity_error(&self, error: reqwest::Error) -> SoaError {
        if error.is_connect() {
            return SoaError::Request(format!(
                "could not reach SOA server at {}: {error}",
                self.base_url
            ));
        }
        if error.is_timeout() {
            return SoaError::Timeout(format!(
                "SOA request timed out after {} ms",
                self.timeout_ms
            ));
        }
        SoaError::Request(error.to_string())
    }
}

#[async_trait]
impl RequestService for SoaClient {
    async fn post_unchecked(
        &self,
        service: &str,
        operation: &str,
        input: Value,
    ) -> Result<Value, SoaError> {
        let endpoint = self.endpoint(service, operation);
        let envelope = Envelope {
            header: Header {
                state: State {
                    client_id: &self.client_id,
                    stateless: true,
                    format_properties: true,
                },
                policy: Value::Object(Default::default()),
            },
            body: &input,
        };

        tracing::debug!(service, operation, "soa request");
        let response = self
            .client
            .post(&endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|error| self.map_connectivity_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SoaError::Status {
                endpoint: format!("{service}/{operation}"),
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await.map_err(|error| {
            SoaError::InvalidResponse(format!(
                "failed to parse {service}/{operation} JSON: {error}"
            ))
        })?;

        if let Some(exception) = service_exception(&payload) {
            return Err(SoaError::Service(exception));
        }
        Ok(payload)
    }
}

/// Responses whose `.QName` names an exception carry the failure in their
/// `messages` list.
fn service_exception(payload: &Value) -> Option<String> {
    let qname = payload.get(".QName").and_then(Value::as_str)?;
    if !qname.contains("Exception") {
        return None;
    }
    let message = payload
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| messages.first())
        .and_then(|message| message.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(qname);
    Some(message.to_string())
}
