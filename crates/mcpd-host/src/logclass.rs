//! Log-line classification.
//!
//! The dedicated server frames every console message as
//! `[<time>] [<thread>/<level>]: <payload>`. A line qualifies as
//! command output iff it matches that shape and is not player chat, a
//! join/leave notice, or a login record. The patterns are deployment
//! constants; plugins parsing game-specific grammar layer their own
//! regexes on top of the payload.

use regex::Regex;
use std::sync::LazyLock;

/// The dedicated-server message shape. Capture group 1 is the payload.
pub static DEDICATED_SERVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*\]: (.*)$").expect("pattern compiles"));

/// Player chat: `]: <name> …`.
pub static PLAYER_CHAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\]: <.*?>.*").expect("pattern compiles"));

/// Join/leave notices.
pub static PLAYER_JOIN_LEAVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+ (left|joined) the game").expect("pattern compiles"));

/// Login records (`<name>[/addr] logged in with entity id …`).
pub static LOGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*\]:.*? logged in with").expect("pattern compiles"));

/// Payload of the sentinel command used to detect console readiness.
pub static UNKNOWN_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("Unknown or incomplete command").expect("pattern compiles"));

/// True iff `line` could plausibly be command output.
#[must_use]
pub fn is_command_response(line: &str) -> bool {
    DEDICATED_SERVER.is_match(line)
        && !PLAYER_CHAT.is_match(line)
        && !PLAYER_JOIN_LEAVE.is_match(line)
        && !LOGIN.is_match(line)
}

/// Extracts the dedicated-server payload, if the line has one.
#[must_use]
pub fn response_payload(line: &str) -> Option<String> {
    DEDICATED_SERVER
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|payload| payload.as_str().to_string())
}
