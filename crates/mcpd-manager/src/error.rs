//! GameManager errors.
//!
//! Protocol errors (wrong state, missing lock) are returned
//! synchronously on the RPC; their codes travel inside
//! [`RemoteError`](mcpd_proto::RemoteError) so the PluginHost can match
//! on them.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ManagerError::AlreadyRunning`] | `MANAGER_ALREADY_RUNNING` | No |
//! | [`ManagerError::NotRunning`] | `MANAGER_NOT_RUNNING` | Yes |
//! | [`ManagerError::NoLockAcquired`] | `MANAGER_NO_LOCK` | Yes |
//! | [`ManagerError::Spawn`] | `MANAGER_SPAWN` | No |
//! | [`ManagerError::Stdio`] | `MANAGER_STDIO` | No |

use mcpd_proto::{ErrorCode, RemoteError};
use thiserror::Error;

/// Failures of the supervisor and RPC surface.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `Start` was called while the game process is running.
    #[error("game server is already running")]
    AlreadyRunning,

    /// `Write` (or a stop) was attempted while the game process is
    /// stopped.
    #[error("game server isn't running")]
    NotRunning,

    /// `Write` was attempted by a client that does not hold the write
    /// lock.
    #[error("no lock acquired")]
    NoLockAcquired,

    /// The game process could not be spawned. The supervisor state is
    /// rolled back to stopped.
    #[error("failed to spawn game server: {0}")]
    Spawn(#[source] std::io::Error),

    /// Reading from or writing to the child's stdio failed.
    #[error("child stdio error: {0}")]
    Stdio(#[source] std::io::Error),
}

impl ErrorCode for ManagerError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "MANAGER_ALREADY_RUNNING",
            Self::NotRunning => "MANAGER_NOT_RUNNING",
            Self::NoLockAcquired => "MANAGER_NO_LOCK",
            Self::Spawn(_) => "MANAGER_SPAWN",
            Self::Stdio(_) => "MANAGER_STDIO",
        }
    }

    fn is_recoverable(&self) -> bool {
        // NotRunning clears after the next Start; NoLockAcquired after
        // the next Lock.
        matches!(self, Self::NotRunning | Self::NoLockAcquired)
    }
}

impl From<&ManagerError> for RemoteError {
    fn from(err: &ManagerError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpd_proto::error::assert_error_codes;

    fn all_variants() -> Vec<ManagerError> {
        vec![
            ManagerError::AlreadyRunning,
            ManagerError::NotRunning,
            ManagerError::NoLockAcquired,
            ManagerError::Spawn(std::io::Error::other("x")),
            ManagerError::Stdio(std::io::Error::other("x")),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "MANAGER_");
    }

    #[test]
    fn remote_error_carries_code() {
        let remote = RemoteError::from(&ManagerError::NoLockAcquired);
        assert_eq!(remote.code, "MANAGER_NO_LOCK");
        assert_eq!(remote.message, "no lock acquired");
    }
}
