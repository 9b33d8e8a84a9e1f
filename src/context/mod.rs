//! Shared key/value context.
//!
//! The store is constructed once and handed to every component that needs it
//! (`Arc<ContextStore>`); there is no global instance.

mod path;
mod store;

pub use store::ContextStore;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// Non-fatal: `register` on a key that already exists.
    #[error("context key already registered: {0}")]
    DuplicateKey(String),
    #[error("context key not registered: {0}")]
    MissingKey(String),
    #[error("cannot write below a non-object value at: {0}")]
    NotAnObject(String),
}
