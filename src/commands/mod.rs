//! Selection glue and command execution on top of the bus and the SOA layer.

mod dispatcher;
mod handler;
mod selection;

pub use dispatcher::{CommandDispatcher, CommandOutcome, DATA_MANAGEMENT_SERVICE, REFRESH_OBJECTS};
pub use handler::{CommandHandler, CommandRequest, SoaCommand};
pub use selection::{Selection, SelectionGlue, MSELECTED_CTX_KEY, SELECTED_CTX_KEY};

use crate::soa::SoaError;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("command {0} is not enabled for the current selection")]
    NotEnabled(String),
    #[error("invalid command input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Request(#[from] SoaError),
}
