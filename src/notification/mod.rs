//! Unread notification count polling.

mod polling;

pub use polling::{
    Configured, UnreadMessagePoller, DEFAULT_INITIAL_DELAY_MS, GET_UNREAD_MESSAGES,
    MESSAGE_SERVICE, POLLING_INTERVAL_PREFERENCE, UNREAD_COUNT_CTX_KEY,
};
