//! Wire protocol shared by the mcpd GameManager and PluginHost.
//!
//! The two mcpd processes talk over a loopback TCP stream carrying
//! length-prefixed JSON frames. This crate defines everything both
//! sides must agree on:
//!
//! - [`message`]: the RPC payload types (`Client`, `StartRequest`,
//!   `WriteRequest`, `StatusResponse`, `MessageResponse`)
//! - [`frame`]: the length-prefix codec
//! - [`rpc`]: the request/response/push envelope
//! - [`error`]: [`ProtoError`] and the [`ErrorCode`] trait
//!
//! # Wire model
//!
//! ```text
//! PluginHost                                 GameManager
//!     │  Frame::Request { seq, call }            │
//!     │ ────────────────────────────────────────►│
//!     │  Frame::Response { seq, result }         │
//!     │ ◄────────────────────────────────────────│
//!     │                                          │
//!     │  (after Call::Message is acknowledged)   │
//!     │  Frame::Push { message }                 │
//!     │ ◄────────────────────────────────────────│
//!     │  Frame::Push { message }                 │
//!     │ ◄────────────────────────────────────────│
//! ```
//!
//! Requests are answered in any order (matched by `seq`); pushes are
//! unsolicited and continue until the connection closes.

pub mod error;
pub mod frame;
pub mod message;
pub mod rpc;

pub use error::{ErrorCode, ProtoError};
pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use message::{
    Client, GameState, MessageResponse, StartRequest, StatusResponse, WriteRequest,
    MESSAGE_TYPE_STATE_CHANGE, MESSAGE_TYPE_STDOUT, STATE_GAME_SERVER_START,
    STATE_GAME_SERVER_STOP,
};
pub use rpc::{Call, CallResult, Frame, RemoteError, Reply};

/// Default loopback address the GameManager listens on.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:12345";
