use serde_json::{json, Value};

use super::selection::Selection;
use super::CommandError;

/// Backend call a command resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub service: String,
    pub operation: String,
    pub input: Value,
}

impl CommandRequest {
    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.service, self.operation)
    }
}

pub trait CommandHandler: Send + Sync {
    fn id(&self) -> &str;

    fn is_enabled(&self, selection: &Selection) -> bool {
        selection.primary.is_some()
    }

    fn request(&self, selection: &Selection) -> Result<CommandRequest, CommandError>;

    /// Whether the selection should be refreshed from the server after a
    /// successful call.
    fn refresh_after(&self) -> bool {
        true
    }
}

type InputBuilder = Box<dyn Fn(&Selection) -> Result<Value, CommandError> + Send + Sync>;

/// A command that posts one SOA operation with input derived from the
/// selection.
pub struct SoaCommand {
    id: String,
    service: String,
    operation: String,
    build_input: InputBuilder,
    refresh_after: bool,
}

impl SoaCommand {
    pub fn new<F>(id: &str, service: &str, operation: &str, build_input: F) -> Self
    where
        F: Fn(&Selection) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            service: service.to_string(),
            operation: operation.to_string(),
            build_input: Box::new(build_input),
            refresh_after: true,
        }
    }

    /// Input is `{ "objects": [<selected objects>] }`.
    pub fn for_selected_objects(id: &str, service: &str, operation: &str) -> Self {
        Self::new(id, service, operation, |selection| {
            if selection.selected.is_empty() {
                return Err(CommandError::InvalidInput("nothing selected".to_string()));
            }
            Ok(json!({ "objects": selection.selected }))
        })
    }

    pub fn without_refresh(mut self) -> Self {
        self.refresh_after = false;
        self
    }
}

impl CommandHandler for SoaCommand {
    fn id(&self) -> &str {
        &self.id
    }

    fn request(&self, selection: &Selection) -> Result<CommandRequest, CommandError> {
        Ok(CommandRequest {
            service: self.service.clone(),
            operation: self.operation.clone(),
            input: (self.build_input)(selection)?,
        })
    }

    fn refresh_after(&self) -> bool {
        self.refresh_after
    }
}
