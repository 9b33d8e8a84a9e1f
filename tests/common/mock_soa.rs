//! Mock request service for integration testing.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use ctxbus::soa::{RequestService, SoaError};

/// A recorded request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: String,
    pub input: Value,
}

/// Answers requests from canned responses keyed by `service/operation`.
///
/// Responses queued for an endpoint are served in order; the last one keeps
/// being served once the queue is down to it.
#[derive(Default)]
pub struct MockRequestService {
    responses: Mutex<HashMap<String, Vec<Result<Value, String>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRequestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for an endpoint.
    pub fn with_response(self, endpoint: &str, response: Value) -> Self {
        self.queue(endpoint, Ok(response));
        self
    }

    /// Queue a service failure for an endpoint.
    pub fn with_failure(self, endpoint: &str, message: &str) -> Self {
        self.queue(endpoint, Err(message.to_string()));
        self
    }

    pub fn queue(&self, endpoint: &str, response: Result<Value, String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl RequestService for MockRequestService {
    async fn post_unchecked(
        &self,
        service: &str,
        operation: &str,
        input: Value,
    ) -> Result<Value, SoaError> {
        let endpoint = format!("{service}/{operation}");
        self.calls.lock().unwrap().push(RecordedCall {
            endpoint: endpoint.clone(),
            input,
        });

        let mut responses = self.responses.lock().unwrap();
        let response = match responses.get_mut(&endpoint) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue.first().cloned().unwrap_or_else(|| Ok(json!({}))),
            None => Ok(json!({})),
        };
        response.map_err(SoaError::Service)
    }
}
