//! Topic constants and typed payloads.
//!
//! Single source of truth for the topics the crate itself publishes or
//! listens to, and for the payload shape carried on each.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::soa::ModelObject;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

pub const TOPIC_CTX_REGISTER: &str = "appCtx.register";
pub const TOPIC_CTX_UPDATE: &str = "appCtx.update";
pub const TOPIC_CTX_UNREGISTER: &str = "appCtx.unregister";
pub const TOPIC_PREFERENCES_LOADED: &str = "bulkPreferencesLoaded";
pub const TOPIC_SELECTION_CHANGED: &str = "selectionChanged";
pub const TOPIC_RELATED_MODIFIED: &str = "cdm.relatedModified";
pub const TOPIC_PROGRESS_START: &str = "progress.start";
pub const TOPIC_PROGRESS_END: &str = "progress.end";

/// Topic published when `command_id` finished without error.
pub fn command_completed_topic(command_id: &str) -> String {
    format!("{command_id}.completed")
}

/// Topic published when `command_id` failed.
pub fn command_failed_topic(command_id: &str) -> String {
    format!("{command_id}.failed")
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// A payload type bound to one topic.
pub trait TopicPayload: Serialize + DeserializeOwned + Send + 'static {
    const TOPIC: &'static str;
}

/// Published by the context store on register and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChange {
    pub name: String,
    /// Dotted path for partial updates, `None` for whole-value writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferencesLoaded {
    pub names: Vec<String>,
}

impl TopicPayload for PreferencesLoaded {
    const TOPIC: &'static str = TOPIC_PREFERENCES_LOADED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionChanged {
    pub primary: Option<ModelObject>,
    pub selected: Vec<ModelObject>,
}

impl TopicPayload for SelectionChanged {
    const TOPIC: &'static str = TOPIC_SELECTION_CHANGED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedModified {
    pub relations: String,
    pub related_modified: Vec<ModelObject>,
    pub refresh_location_flag: bool,
}

impl TopicPayload for RelatedModified {
    const TOPIC: &'static str = TOPIC_RELATED_MODIFIED;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    #[serde(default)]
    pub partial_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
