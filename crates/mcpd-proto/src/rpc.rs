//! Request/response/push envelope.
//!
//! A connection carries exactly one [`Frame`] per wire frame. The
//! PluginHost sends `Request`s; the GameManager answers each with a
//! `Response` carrying the same `seq`, and — once a [`Call::Message`]
//! subscription is acknowledged — interleaves unsolicited `Push`
//! frames on the same connection.

use crate::message::{Client, MessageResponse, StartRequest, StatusResponse, WriteRequest};
use serde::{Deserialize, Serialize};

/// Top-level wire frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Client-initiated call.
    Request { seq: u64, call: Call },
    /// Server answer to the request with the same `seq`.
    Response { seq: u64, result: CallResult },
    /// Unsolicited subscription delivery.
    Push { message: MessageResponse },
}

/// The RPC method set of the `Manager` service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Call {
    /// Returns the connection-tagged client id.
    Login,
    /// Game state and memory usage.
    Status(Client),
    /// Spawn the game process.
    Start(StartRequest),
    /// Graceful stop with SIGTERM fallback.
    Stop(Client),
    /// Block until the console write lock is granted (or renewed).
    Lock(Client),
    /// Release the write lock if held by this client.
    Unlock(Client),
    /// Write one console line; requires the lock.
    Write(WriteRequest),
    /// Subscribe this connection to the log stream.
    Message(Client),
}

impl Call {
    /// Method name for logging.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::Status(_) => "Status",
            Self::Start(_) => "Start",
            Self::Stop(_) => "Stop",
            Self::Lock(_) => "Lock",
            Self::Unlock(_) => "Unlock",
            Self::Write(_) => "Write",
            Self::Message(_) => "Message",
        }
    }
}

/// Outcome of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResult {
    Ok(Reply),
    Err(RemoteError),
}

impl CallResult {
    /// Converts to a std `Result` for `?`-style handling.
    pub fn into_result(self) -> Result<Reply, RemoteError> {
        match self {
            Self::Ok(reply) => Ok(reply),
            Self::Err(err) => Err(err),
        }
    }
}

/// Successful payload of a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    /// `Stop`, `Lock`, `Unlock`, `Write`, and `Message` acknowledge
    /// with no payload.
    Empty,
    /// `Login` result.
    Client(Client),
    /// `Status` and `Start` result.
    Status(StatusResponse),
}

/// A server-side error carried across the wire.
///
/// `code` is the [`ErrorCode`](crate::ErrorCode) of the originating
/// error; `message` is its display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::GameState;

    #[test]
    fn request_wire_shape() {
        let frame = Frame::Request {
            seq: 1,
            call: Call::Write(WriteRequest {
                client: Client { id: 2 },
                id: 9,
                content: "list".into(),
            }),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["request"]["seq"], 1);
        assert_eq!(json["request"]["call"]["write"]["content"], "list");
        assert_eq!(json["request"]["call"]["write"]["client"]["id"], 2);
    }

    #[test]
    fn response_round_trip() {
        let frame = Frame::Response {
            seq: 4,
            result: CallResult::Ok(Reply::Status(StatusResponse {
                state: GameState::Stopped,
                usedmemory: 0,
            })),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        match back {
            Frame::Response { seq, result } => {
                assert_eq!(seq, 4);
                match result.into_result().unwrap() {
                    Reply::Status(status) => assert_eq!(status.state, GameState::Stopped),
                    other => panic!("unexpected reply: {other:?}"),
                }
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn error_result_round_trip() {
        let frame = Frame::Response {
            seq: 8,
            result: CallResult::Err(RemoteError {
                code: "MANAGER_NO_LOCK".into(),
                message: "no lock acquired".into(),
            }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        match back {
            Frame::Response { result, .. } => {
                let err = result.into_result().unwrap_err();
                assert_eq!(err.code, "MANAGER_NO_LOCK");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn method_names() {
        assert_eq!(Call::Login.method(), "Login");
        assert_eq!(Call::Message(Client { id: 1 }).method(), "Message");
    }
}
