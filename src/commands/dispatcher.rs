use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};

use crate::bus::event_types::{
    command_completed_topic, command_failed_topic, CommandResult, Progress, RelatedModified,
    TOPIC_PROGRESS_END, TOPIC_PROGRESS_START,
};
use crate::bus::{EventBus, SubscriptionHandle};
use crate::soa::{partial_error_messages, RequestService};

use super::handler::{CommandHandler, CommandRequest};
use super::selection::{Selection, SelectionGlue};
use super::CommandError;

pub const DATA_MANAGEMENT_SERVICE: &str = "Core-2007-01-DataManagement";
pub const REFRESH_OBJECTS: &str = "refreshObjects";

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command_id: String,
    pub response: Value,
    pub partial_errors: Vec<String>,
}

impl CommandOutcome {
    pub fn is_clean(&self) -> bool {
        self.partial_errors.is_empty()
    }
}

/// Turns command invocations into backend requests and bus notifications.
///
/// For every execution:
/// - `progress.start` / `progress.end` bracket the request
/// - on success (or partial success) `cdm.relatedModified` is published for
///   the primary selection and the selection is refreshed
/// - `<command>.completed` or `<command>.failed` closes the sequence
pub struct CommandDispatcher {
    bus: Arc<EventBus>,
    soa: Arc<dyn RequestService>,
    selection: Arc<SelectionGlue>,
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<EventBus>, soa: Arc<dyn RequestService>, selection: Arc<SelectionGlue>) -> Self {
        Self {
            bus,
            soa,
            selection,
            handlers: DashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one with the same id.
    pub fn register(&self, handler: Arc<dyn CommandHandler>) -> Option<Arc<dyn CommandHandler>> {
        let id = handler.id().to_string();
        let previous = self.handlers.insert(id.clone(), handler);
        if previous.is_some() {
            tracing::debug!(command = %id, "replaced command handler");
        }
        previous
    }

    pub fn command_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.iter().map(|h| h.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_enabled(&self, command_id: &str) -> bool {
        let selection = self.selection.current();
        self.handlers
            .get(command_id)
            .is_some_and(|handler| handler.is_enabled(&selection))
    }

    pub async fn execute(&self, command_id: &str) -> Result<CommandOutcome, CommandError> {
        let handler = self
            .handlers
            .get(command_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CommandError::UnknownCommand(command_id.to_string()))?;

        let selection = self.selection.current();
        if !handler.is_enabled(&selection) {
            return Err(CommandError::NotEnabled(command_id.to_string()));
        }
        let request = handler.request(&selection)?;
        let endpoint = request.endpoint();

        tracing::info!(command = command_id, endpoint = %endpoint, "executing command");
        self.publish_progress(TOPIC_PROGRESS_START, &endpoint);
        let result = self
            .soa
            .post_unchecked(&request.service, &request.operation, request.input.clone())
            .await;
        self.publish_progress(TOPIC_PROGRESS_END, &endpoint);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(command = command_id, "command request failed: {e}");
                self.publish_result(
                    &command_failed_topic(command_id),
                    CommandResult {
                        command_id: command_id.to_string(),
                        partial_errors: Vec::new(),
                        error: Some(e.to_string()),
                    },
                );
                return Err(e.into());
            }
        };

        let partial_errors = partial_error_messages(&response);
        if modified_anything(&response, &partial_errors) {
            self.announce_modified(&selection);
            if handler.refresh_after() {
                self.refresh(&selection, &request).await;
            }
        }

        if partial_errors.is_empty() {
            self.publish_result(
                &command_completed_topic(command_id),
                CommandResult {
                    command_id: command_id.to_string(),
                    partial_errors: Vec::new(),
                    error: None,
                },
            );
        } else {
            tracing::warn!(
                command = command_id,
                count = partial_errors.len(),
                "command returned partial errors"
            );
            self.publish_result(
                &command_failed_topic(command_id),
                CommandResult {
                    command_id: command_id.to_string(),
                    partial_errors: partial_errors.clone(),
                    error: Some(partial_errors.join("; ")),
                },
            );
        }

        Ok(CommandOutcome {
            command_id: command_id.to_string(),
            response,
            partial_errors,
        })
    }

    /// Execute `command_id` whenever `topic` is published. The bus callback
    /// only schedules the execution.
    ///
    /// Publishes on `topic` must happen within a tokio runtime.
    pub fn bind(self: &Arc<Self>, topic: &str, command_id: &str) -> SubscriptionHandle {
        let dispatcher = Arc::downgrade(self);
        let command_id = command_id.to_string();
        self.bus.subscribe(
            topic,
            move |_| {
                let Some(dispatcher) = dispatcher.upgrade() else {
                    return Ok(());
                };
                let command_id = command_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.execute(&command_id).await {
                        tracing::warn!(command = %command_id, "bound command failed: {e}");
                    }
                });
                Ok(())
            },
            Some("command.dispatcher"),
        )
    }

    fn announce_modified(&self, selection: &Selection) {
        let Some(primary) = selection.primary.clone() else {
            return;
        };
        self.bus.publish_typed(&RelatedModified {
            relations: String::new(),
            related_modified: vec![primary],
            refresh_location_flag: true,
        });
    }

    async fn refresh(&self, selection: &Selection, request: &CommandRequest) {
        let mut objects = selection.selected.clone();
        if let Some(primary) = &selection.primary {
            if !objects.contains(primary) {
                objects.push(primary.clone());
            }
        }
        if objects.is_empty() {
            return;
        }

        if let Err(e) = self
            .soa
            .post(
                DATA_MANAGEMENT_SERVICE,
                REFRESH_OBJECTS,
                json!({ "objects": objects }),
            )
            .await
        {
            tracing::debug!(endpoint = %request.endpoint(), "refresh after command failed: {e}");
        }
    }

    fn publish_progress(&self, topic: &str, endpoint: &str) {
        self.publish_value(
            topic,
            Progress {
                endpoint: endpoint.to_string(),
            },
        );
    }

    fn publish_result(&self, topic: &str, result: CommandResult) {
        self.publish_value(topic, result);
    }

    fn publish_value<T: serde::Serialize>(&self, topic: &str, payload: T) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.bus.publish(topic, value);
            }
            Err(e) => tracing::error!(topic, "failed to serialize payload: {e}"),
        }
    }
}

/// A response with no partial errors, or one that still reports `plain`
/// (updated) objects, changed something on the server.
fn modified_anything(response: &Value, partial_errors: &[String]) -> bool {
    partial_errors.is_empty()
        || response
            .get("plain")
            .and_then(Value::as_array)
            .is_some_and(|plain| !plain.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::event_types::{TOPIC_RELATED_MODIFIED, TOPIC_SELECTION_CHANGED};
    use crate::commands::SoaCommand;
    use crate::context::ContextStore;
    use crate::soa::{ModelObject, SoaError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedSoa {
        responses: Mutex<Vec<Result<Value, SoaError>>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedSoa {
        fn push(&self, response: Result<Value, SoaError>) {
            self.responses.lock().unwrap().push(response);
        }

        fn endpoints(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
        }
    }

    #[async_trait]
    impl RequestService for ScriptedSoa {
        async fn post_unchecked(
            &self,
            service: &str,
            operation: &str,
            input: Value,
        ) -> Result<Value, SoaError> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("{service}/{operation}"), input));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(json!({}))
            } else {
                responses.remove(0)
            }
        }
    }

    struct Fixture {
        bus: Arc<EventBus>,
        soa: Arc<ScriptedSoa>,
        selection: Arc<SelectionGlue>,
        dispatcher: Arc<CommandDispatcher>,
        topics: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(EventBus::new());
        let ctx = Arc::new(ContextStore::new(bus.clone()));
        let soa = Arc::new(ScriptedSoa::default());
        let selection = Arc::new(SelectionGlue::new(ctx, Duration::from_millis(10)));
        let dispatcher = Arc::new(CommandDispatcher::new(
            bus.clone(),
            soa.clone(),
            selection.clone(),
        ));
        dispatcher.register(Arc::new(SoaCommand::for_selected_objects(
            "checkout",
            "Core-2006-03-Reservation",
            "checkout",
        )));

        let topics = Arc::new(Mutex::new(Vec::new()));
        for topic in [
            TOPIC_PROGRESS_START,
            TOPIC_PROGRESS_END,
            TOPIC_RELATED_MODIFIED,
            "checkout.completed",
            "checkout.failed",
        ] {
            let topics = topics.clone();
            bus.subscribe(
                topic,
                move |event| {
                    topics.lock().unwrap().push(event.topic.clone());
                    Ok(())
                },
                None,
            );
        }

        Fixture {
            bus,
            soa,
            selection,
            dispatcher,
            topics,
        }
    }

    fn item() -> ModelObject {
        ModelObject::new("uid-1", "ItemRevision")
    }

    #[tokio::test]
    async fn unknown_and_disabled_commands_are_rejected() {
        let f = fixture();
        assert!(matches!(
            f.dispatcher.execute("nope").await,
            Err(CommandError::UnknownCommand(_))
        ));
        assert!(!f.dispatcher.is_enabled("checkout"));
        assert!(matches!(
            f.dispatcher.execute("checkout").await,
            Err(CommandError::NotEnabled(_))
        ));
        assert!(f.soa.endpoints().is_empty());
    }

    #[tokio::test]
    async fn successful_command_announces_modification_and_refreshes() {
        let f = fixture();
        f.selection.set_selection(None, vec![item()]);
        assert!(f.dispatcher.is_enabled("checkout"));

        let outcome = f.dispatcher.execute("checkout").await.unwrap();
        assert!(outcome.is_clean());

        assert_eq!(
            f.soa.endpoints(),
            vec![
                "Core-2006-03-Reservation/checkout".to_string(),
                format!("{DATA_MANAGEMENT_SERVICE}/{REFRESH_OBJECTS}"),
            ]
        );
        assert_eq!(
            *f.topics.lock().unwrap(),
            vec![
                TOPIC_PROGRESS_START,
                TOPIC_PROGRESS_END,
                TOPIC_RELATED_MODIFIED,
                "checkout.completed",
            ]
        );
    }

    #[tokio::test]
    async fn related_modified_payload_names_primary() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            f.bus.subscribe_typed::<RelatedModified, _>(
                move |payload| {
                    *seen.lock().unwrap() = Some(payload);
                    Ok(())
                },
                None,
            );
        }
        f.selection.set_selection(None, vec![item()]);
        f.dispatcher.execute("checkout").await.unwrap();

        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload.relations, "");
        assert_eq!(payload.related_modified, vec![item()]);
        assert!(payload.refresh_location_flag);
    }

    #[tokio::test]
    async fn partial_errors_without_updates_fail_the_command() {
        let f = fixture();
        f.soa.push(Ok(json!({
            "partialErrors": [{ "errorValues": [{ "message": "already checked out" }] }]
        })));
        f.selection.set_selection(None, vec![item()]);

        let outcome = f.dispatcher.execute("checkout").await.unwrap();
        assert_eq!(outcome.partial_errors, vec!["already checked out".to_string()]);
        assert_eq!(f.soa.endpoints().len(), 1);
        assert_eq!(
            *f.topics.lock().unwrap(),
            vec![TOPIC_PROGRESS_START, TOPIC_PROGRESS_END, "checkout.failed"]
        );
    }

    #[tokio::test]
    async fn partial_errors_with_updates_still_announce() {
        let f = fixture();
        f.soa.push(Ok(json!({
            "plain": ["uid-1"],
            "ServiceData": {
                "partialErrors": [{ "errorValues": [{ "message": "one failed" }] }]
            }
        })));
        f.selection.set_selection(None, vec![item()]);

        let outcome = f.dispatcher.execute("checkout").await.unwrap();
        assert!(!outcome.is_clean());
        assert_eq!(
            *f.topics.lock().unwrap(),
            vec![
                TOPIC_PROGRESS_START,
                TOPIC_PROGRESS_END,
                TOPIC_RELATED_MODIFIED,
                "checkout.failed",
            ]
        );
    }

    #[tokio::test]
    async fn request_failure_closes_progress_and_reports() {
        let f = fixture();
        f.soa.push(Err(SoaError::Service("session expired".to_string())));
        f.selection.set_selection(None, vec![item()]);

        let err = f.dispatcher.execute("checkout").await.unwrap_err();
        assert!(matches!(err, CommandError::Request(SoaError::Service(_))));
        assert_eq!(
            *f.topics.lock().unwrap(),
            vec![TOPIC_PROGRESS_START, TOPIC_PROGRESS_END, "checkout.failed"]
        );
    }

    #[tokio::test]
    async fn refresh_can_be_skipped() {
        let f = fixture();
        f.dispatcher.register(Arc::new(
            SoaCommand::for_selected_objects("checkout", "Core-2006-03-Reservation", "checkout")
                .without_refresh(),
        ));
        f.selection.set_selection(None, vec![item()]);

        f.dispatcher.execute("checkout").await.unwrap();
        assert_eq!(f.soa.endpoints(), vec!["Core-2006-03-Reservation/checkout".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn bound_topic_triggers_execution() {
        let f = fixture();
        f.selection.set_selection(None, vec![item()]);
        f.dispatcher.bind(TOPIC_SELECTION_CHANGED, "checkout");

        // The debounced selection announcement fires the bound command.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(f
            .topics
            .lock()
            .unwrap()
            .contains(&"checkout.completed".to_string()));
    }
}
