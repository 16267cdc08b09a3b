//! PluginHost errors.
//!
//! Transport loss and game-stop are not failures of a single call but
//! events on the host's error bus; both are modeled here so the bus
//! carries one type.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`HostError::Disconnected`] | `HOST_DISCONNECTED` | Yes |
//! | [`HostError::GameStopped`] | `HOST_GAME_STOPPED` | Yes |
//! | [`HostError::NotLoggedIn`] | `HOST_NOT_LOGGED_IN` | Yes |
//! | [`HostError::Proto`] | `HOST_PROTO` | Varies |
//! | [`HostError::Remote`] | `HOST_REMOTE` | Varies |
//! | [`HostError::UnexpectedReply`] | `HOST_UNEXPECTED_REPLY` | No |
//! | [`HostError::PluginInit`] | `HOST_PLUGIN_INIT` | No |
//! | [`HostError::DuplicateCommand`] | `HOST_DUPLICATE_COMMAND` | No |

use mcpd_proto::{ErrorCode, ProtoError, RemoteError};
use thiserror::Error;

/// Failures and lifecycle events of the PluginHost.
#[derive(Debug, Error)]
pub enum HostError {
    /// The RPC channel to the GameManager is gone. Triggers plugin
    /// pause and the reconnect loop.
    #[error("manager connection lost")]
    Disconnected,

    /// The game server stopped (seen as an in-band `GameServerStop`).
    /// Triggers plugin pause; the RPC channel stays up.
    #[error("game server stopped")]
    GameStopped,

    /// A call was attempted before `Login` completed (or after the
    /// session was cleared by a disconnect).
    #[error("not logged in to the manager")]
    NotLoggedIn,

    /// Framing/codec failure on the RPC channel.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// The GameManager rejected a call.
    #[error("manager error: {0}")]
    Remote(#[from] RemoteError),

    /// The GameManager answered with a payload the method does not
    /// produce.
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    /// A plugin failed its `init`.
    #[error("plugin {name} failed to initialize: {reason}")]
    PluginInit { name: String, reason: String },

    /// A chat command verb is already registered.
    #[error("chat command already registered: {0}")]
    DuplicateCommand(String),
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "HOST_DISCONNECTED",
            Self::GameStopped => "HOST_GAME_STOPPED",
            Self::NotLoggedIn => "HOST_NOT_LOGGED_IN",
            Self::Proto(_) => "HOST_PROTO",
            Self::Remote(_) => "HOST_REMOTE",
            Self::UnexpectedReply(_) => "HOST_UNEXPECTED_REPLY",
            Self::PluginInit { .. } => "HOST_PLUGIN_INIT",
            Self::DuplicateCommand(_) => "HOST_DUPLICATE_COMMAND",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Disconnected | Self::GameStopped | Self::NotLoggedIn => true,
            Self::Proto(err) => err.is_recoverable(),
            // Remote NOT_RUNNING/NO_LOCK clear on their own.
            Self::Remote(_) => true,
            Self::UnexpectedReply(_) | Self::PluginInit { .. } | Self::DuplicateCommand(_) => {
                false
            }
        }
    }
}
