//! Built-in and bundled plugins.
//!
//! - [`chat_command`]: the in-chat `!!verb` command parser other
//!   plugins register verbs with
//! - [`status`]: periodic state/memory/player report, pausable

pub mod chat_command;
pub mod status;

pub use chat_command::{ChatCommandPlugin, CommandFuture, CommandHandler};
pub use status::StatusPlugin;
