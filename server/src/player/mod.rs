mod commands;
mod events;
mod session;

pub use commands::{chat_block, perform_jackout, CommandContext, CommandDispatcher, CommandError};
pub use events::{Event, EventKind, EventParams, EventQueue};
pub use session::{PlayerSession, SessionState};
