//! Cross-component scenarios.



use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bus::EventBus;
use crate::soa::{RequestService, SoaError};

/// Request service answering from per-endpoint scripts.
///
/// Endpoints without a script answer `{}`. The last scripted response of an
/// endpoint repeats once the script is exhausted.
#[derive(Default)]
pub struct ScriptedService {
    scripts: Mutex<Vec<(String, VecDeque<Result<Value, String>>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, endpoint: &str, response: Value) {
        self.push(endpoint, Ok(response));
    }

    pub fn fail(&self, endpoint: &str, message: &str) {
        self.push(endpoint, Err(message.to_string()));
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == endpoint)
            .count()
    }

    fn push(&self, endpoint: &str, response: Result<Value, String>) {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.iter_mut().find(|(e, _)| e == endpoint) {
            Some((_, queue)) => queue.push_back(response),
            None => scripts.push((endpoint.to_string(), VecDeque::from([response]))),
        }
    }
}

#[async_trait]
impl RequestService for ScriptedService {
    async fn post_unchecked(
        &self,
        service: &str,
        operation: &str,
        _input: Value,
    ) -> Result<Value, SoaError> {
        let endpoint = format!("{service}/{operation}");
        self.calls.lock().unwrap().push(endpoint.clone());

        let mut scripts = self.scripts.lock().unwrap();
        let Some((_, queue)) = scripts.iter_mut().find(|(e, _)| *e == endpoint) else {
            return Ok(json!({}));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match response {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(SoaError::Service(message)),
            None => Ok(json!({})),
        }
    }
}

/// Record every payload published on `topic`.
pub fn record(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(
        topic,
        move |event| {
            sink.lock().unwrap().push(event.payload.clone());
            Ok(())
        },
        None,
    );
    seen
}

/// Let spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
