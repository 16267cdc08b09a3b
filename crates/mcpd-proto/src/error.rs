//! Protocol-layer errors.
//!
//! All mcpd error types implement [`ErrorCode`] so that errors can
//! cross the wire as stable machine-readable codes and so callers can
//! decide whether a retry is worthwhile.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ProtoError::Io`] | `PROTO_IO` | Yes |
//! | [`ProtoError::Closed`] | `PROTO_CLOSED` | Yes |
//! | [`ProtoError::FrameTooLarge`] | `PROTO_FRAME_TOO_LARGE` | No |
//! | [`ProtoError::Codec`] | `PROTO_CODEC` | No |
//! | [`ProtoError::UnexpectedFrame`] | `PROTO_UNEXPECTED_FRAME` | No |

use thiserror::Error;

/// Unified error code interface for mcpd errors.
///
/// Codes are `UPPER_SNAKE_CASE`, prefixed with the owning layer
/// (`PROTO_`, `MANAGER_`, `HOST_`), and stable once defined — the
/// GameManager sends them verbatim inside error responses and the
/// PluginHost matches on them.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Failure at the framing or codec layer.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A frame announced a length above [`MAX_FRAME_BYTES`](crate::MAX_FRAME_BYTES).
    ///
    /// Oversize frames are rejected before any allocation; the
    /// connection is unusable afterwards because the stream position
    /// is no longer aligned to a frame boundary.
    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(u32),

    /// A frame body failed to encode or decode as JSON.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A structurally valid frame arrived where the protocol state
    /// machine does not allow it (e.g. a `Request` on a client
    /// connection).
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(&'static str),
}

impl ErrorCode for ProtoError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "PROTO_IO",
            Self::Closed => "PROTO_CLOSED",
            Self::FrameTooLarge(_) => "PROTO_FRAME_TOO_LARGE",
            Self::Codec(_) => "PROTO_CODEC",
            Self::UnexpectedFrame(_) => "PROTO_UNEXPECTED_FRAME",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Transport loss is recoverable by reconnecting; malformed
        // frames are not.
        matches!(self, Self::Io(_) | Self::Closed)
    }
}

/// Validates that an error code follows mcpd conventions.
///
/// # Panics
///
/// Panics with a descriptive message if the code is empty, lacks the
/// expected prefix, or is not `UPPER_SNAKE_CASE`.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();
    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates every variant of an error enum at once.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
