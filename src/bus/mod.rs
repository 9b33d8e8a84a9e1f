//! In-process event system.
//!
//! - `EventBus`: topic based publish/subscribe with synchronous, ordered
//!   delivery and per-subscriber failure isolation
//! - `Debouncer`: timer wrapper used for debounced publishing
//! - `event_types`: topic constants and typed payloads

mod debounce;
mod event_bus;
pub mod event_types;

pub use debounce::Debouncer;
pub use event_bus::{BusEvent, Callback, EventBus, SubscriberError, SubscriptionHandle};
pub(crate) use event_bus::panic_message;
pub use event_types::TopicPayload;
