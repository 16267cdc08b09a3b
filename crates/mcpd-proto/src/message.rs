//! RPC payload types.
//!
//! Field names are part of the wire contract; they serialize as-is to
//! JSON. `MessageResponse.type` uses a serde rename because `type` is
//! reserved in Rust.

use serde::{Deserialize, Serialize};

/// `type` value for an ordinary console line.
pub const MESSAGE_TYPE_STDOUT: &str = "stdout";
/// `type` value for a lifecycle event.
pub const MESSAGE_TYPE_STATE_CHANGE: &str = "StateChange";
/// StateChange content emitted when the game process exits.
pub const STATE_GAME_SERVER_STOP: &str = "GameServerStop";
/// StateChange content emitted when the game process is spawned.
/// Informational only; consumers must not depend on it.
pub const STATE_GAME_SERVER_START: &str = "StartGameServer";

/// Identity of an RPC client, assigned by the GameManager at accept
/// time and returned by `Login`.
///
/// Ids are monotonic and unique within one GameManager lifetime; a
/// real client is never id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Client {
    pub id: u64,
}

/// Run state of the supervised game process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Running,
    Stopped,
}

impl std::fmt::Display for GameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Ask the GameManager to spawn the game process from a start script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub client: Client,
    pub path: String,
}

/// Write one line to the game console.
///
/// `id` is the caller's command sequence number; it is logged by the
/// GameManager for traceability but carries no protocol meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub client: Client,
    pub id: u64,
    pub content: String,
}

/// Game state plus resident memory of the process tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: GameState,
    pub usedmemory: u64,
}

/// One entry on a `Message` subscription stream.
///
/// `id` is a per-subscriber monotonic sequence assigned by the server.
/// `locked` is true iff the write lock was held when the line was
/// scanned (only meaningful for `stdout` messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub locked: bool,
}

impl MessageResponse {
    /// Builds a `stdout` message.
    pub fn stdout(id: u64, content: impl Into<String>, locked: bool) -> Self {
        Self {
            id,
            kind: MESSAGE_TYPE_STDOUT.to_string(),
            content: content.into(),
            locked,
        }
    }

    /// Builds a `StateChange` message.
    pub fn state_change(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            kind: MESSAGE_TYPE_STATE_CHANGE.to_string(),
            content: content.into(),
            locked: false,
        }
    }

    /// Returns true for ordinary console lines.
    #[must_use]
    pub fn is_stdout(&self) -> bool {
        self.kind == MESSAGE_TYPE_STDOUT
    }

    /// Returns true if this is the `GameServerStop` lifecycle event.
    #[must_use]
    pub fn is_game_stop(&self) -> bool {
        self.kind == MESSAGE_TYPE_STATE_CHANGE && self.content == STATE_GAME_SERVER_STOP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn game_state_wire_form() {
        assert_eq!(serde_json::to_string(&GameState::Running).unwrap(), "\"running\"");
        assert_eq!(serde_json::to_string(&GameState::Stopped).unwrap(), "\"stopped\"");
    }

    #[test]
    fn message_response_type_field() {
        let msg = MessageResponse::stdout(7, "[12:00:00] [Server thread/INFO]: Done", true);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "stdout");
        assert_eq!(json["id"], 7);
        assert_eq!(json["locked"], true);
    }

    #[test]
    fn state_change_classification() {
        let stop = MessageResponse::state_change(0, STATE_GAME_SERVER_STOP);
        assert!(stop.is_game_stop());
        assert!(!stop.is_stdout());

        let start = MessageResponse::state_change(1, STATE_GAME_SERVER_START);
        assert!(!start.is_game_stop());
    }

    #[test]
    fn status_round_trip() {
        let status = StatusResponse {
            state: GameState::Running,
            usedmemory: 4096,
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: StatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, GameState::Running);
        assert_eq!(back.usedmemory, 4096);
    }
}
