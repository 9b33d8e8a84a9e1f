use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bus::event_types::SelectionChanged;
use crate::bus::Debouncer;
use crate::context::ContextStore;
use crate::soa::ModelObject;

pub const SELECTED_CTX_KEY: &str = "selected";
pub const MSELECTED_CTX_KEY: &str = "mselected";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub primary: Option<ModelObject>,
    pub selected: Vec<ModelObject>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.selected.is_empty()
    }
}

/// Mirrors the UI selection into the context store.
///
/// Context entries change immediately; the `selectionChanged` notification is
/// debounced so a burst of changes announces only the final selection.
pub struct SelectionGlue {
    ctx: Arc<ContextStore>,
    debouncer: Debouncer,
}

impl SelectionGlue {
    pub fn new(ctx: Arc<ContextStore>, debounce: Duration) -> Self {
        Self {
            ctx,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// `primary` defaults to the first selected object.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_selection(&self, primary: Option<ModelObject>, selected: Vec<ModelObject>) {
        let primary = primary.or_else(|| selected.first().cloned());
        let primary_value = primary
            .as_ref()
            .map(|object| json!(object))
            .unwrap_or(Value::Null);

        self.ctx.register_or_update(SELECTED_CTX_KEY, primary_value);
        self.ctx.register_or_update(MSELECTED_CTX_KEY, json!(selected));

        let bus = Arc::downgrade(self.ctx.bus());
        let payload = SelectionChanged { primary, selected };
        self.debouncer.call(move || {
            if let Some(bus) = bus.upgrade() {
                bus.publish_typed(&payload);
            }
        });
    }

    pub fn clear(&self) {
        self.set_selection(None, Vec::new());
    }

    pub fn current(&self) -> Selection {
        Selection {
            primary: self.ctx.get_as(SELECTED_CTX_KEY),
            selected: self.ctx.get_as(MSELECTED_CTX_KEY).unwrap_or_default(),
        }
    }

    /// Publish a pending `selectionChanged` now.
    pub fn flush(&self) -> bool {
        self.debouncer.flush()
    }
}
