//! The command processor.
//!
//! `run_command` is safe to call from any number of plugins at once:
//! requests queue up and a single worker serializes them through the
//! shared console, capturing each command's output from the unframed
//! log stream before replying.
//!
//! # End-of-response detection
//!
//! The game gives no framing, so the worker decides when a command is
//! done:
//!
//! - **Skip-wait** commands (`tellraw`) never echo to the console; the
//!   worker writes them and replies immediately with no capture.
//! - **Regex-terminated** commands have a known completion payload
//!   (`save-all` → `Saved`, `list` → `players online`,
//!   `testServerReady` → `Unknown or incomplete command`); the worker
//!   waits for the terminator, then keeps a short tail window open for
//!   trailing lines.
//! - Everything else ends on inactivity: 100 ms for the first line,
//!   then `10 ms + 10 ms × backlog` after each captured line. Scaling
//!   with the capture channel's backlog avoids closing a burst early.
//!
//! A 5 s ticker renews the write-lock lease while a slow command runs,
//! and the host's clean signal aborts an in-flight capture when the
//! game stops.

use crate::error::HostError;
use crate::logclass;
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pending `run_command` requests.
pub const COMMAND_QUEUE_CAPACITY: usize = 16384;
/// Capture channel between the log callback and the worker.
pub const RESPONSE_BUFFER_CAPACITY: usize = 32;

const LEASE_RENEW_PERIOD: Duration = Duration::from_secs(5);
const FIRST_RESPONSE_WINDOW: Duration = Duration::from_millis(100);
const TAIL_WINDOW_BASE: Duration = Duration::from_millis(10);
const TAIL_WINDOW_PER_PENDING: Duration = Duration::from_millis(10);

/// Commands whose output is user-directed and never echoed to the
/// console.
pub const SKIP_WAIT_COMMANDS: &[&str] = &["tellraw"];

static WAIT_FOR_REGEX_COMMANDS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    HashMap::from([
        ("save-all", Regex::new("Saved").expect("pattern compiles")),
        ("list", Regex::new("players online").expect("pattern compiles")),
        (
            "testServerReady",
            Regex::new("Unknown or incomplete command").expect("pattern compiles"),
        ),
    ])
});

/// What the worker needs from the console. The [`Host`](crate::Host)
/// implements this over the live RPC session; tests substitute a
/// scripted fake.
#[async_trait]
pub trait Console: Send + Sync {
    async fn lock(&self) -> Result<(), HostError>;
    async fn unlock(&self) -> Result<(), HostError>;
    async fn write(&self, seq: u64, content: &str) -> Result<(), HostError>;
}

struct CommandRequest {
    command: String,
    reply: oneshot::Sender<String>,
}

/// The capture endpoints published while a command is in flight.
struct CaptureSlot {
    lines: mpsc::Sender<String>,
    clean: mpsc::Sender<()>,
}

/// Serializes commands through the console and captures their output.
pub struct CommandProcessor {
    queue_tx: mpsc::Sender<CommandRequest>,
    slot: Arc<RwLock<Option<CaptureSlot>>>,
}

impl CommandProcessor {
    /// Creates the processor and spawns its worker.
    #[must_use]
    pub fn new(console: Arc<dyn Console>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let slot: Arc<RwLock<Option<CaptureSlot>>> = Arc::new(RwLock::new(None));
        let worker_slot = Arc::clone(&slot);
        tokio::spawn(worker(console, worker_slot, queue_rx));
        Arc::new(Self { queue_tx, slot })
    }

    /// Runs one command and returns its captured output (lines joined
    /// with `\n`; empty when there was none or the command failed).
    ///
    /// Blocks until the command's turn comes and its capture closes.
    /// Replies come back in submission order.
    pub async fn run_command(&self, command: &str) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommandRequest {
            command: command.to_string(),
            reply: reply_tx,
        };
        if self.queue_tx.send(request).await.is_err() {
            return String::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// The log-stream entrypoint: forwards lines that look like
    /// command output to the current capture, if any.
    pub fn on_log(&self, line: &str, _locked: bool) {
        let slot = self.slot.read();
        if let Some(slot) = slot.as_ref() {
            if logclass::is_command_response(line) {
                // Drop-on-full: a capture 32 lines behind is already
                // being closed by the backlog-scaled timer.
                let _ = slot.lines.try_send(line.to_string());
            }
        }
    }

    /// Aborts the in-flight capture, if any. Fired by the host when
    /// the game stops or the plugins are paused.
    pub fn clean(&self) {
        let slot = self.slot.read();
        if let Some(slot) = slot.as_ref() {
            let _ = slot.clean.try_send(());
        }
    }
}

async fn worker(
    console: Arc<dyn Console>,
    slot: Arc<RwLock<Option<CaptureSlot>>>,
    mut queue_rx: mpsc::Receiver<CommandRequest>,
) {
    let mut seq: u64 = 0;
    while let Some(request) = queue_rx.recv().await {
        let command = request.command.trim_start_matches('/').to_string();
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();

        if console.lock().await.is_err() {
            let _ = request.reply.send(String::new());
            continue;
        }
        info!(seq, command = %command, pending = queue_rx.len(), "executing command");

        if SKIP_WAIT_COMMANDS.contains(&verb.as_str()) {
            if let Err(err) = console.write(seq, &command).await {
                debug!(seq, error = %err, "skip-wait write failed");
            }
            let _ = request.reply.send(String::new());
            let _ = console.unlock().await;
            seq += 1;
            continue;
        }

        // Publish the capture endpoints before writing so no response
        // line can slip past.
        let (line_tx, mut line_rx) = mpsc::channel(RESPONSE_BUFFER_CAPACITY);
        let (clean_tx, mut clean_rx) = mpsc::channel(1);
        *slot.write() = Some(CaptureSlot {
            lines: line_tx,
            clean: clean_tx,
        });

        let mut buffer: Vec<String> = Vec::new();
        match console.write(seq, &command).await {
            Err(err) => {
                warn!(seq, command = %command, error = %err, "console write failed");
            }
            Ok(()) => {
                let wait_regex = WAIT_FOR_REGEX_COMMANDS.get(verb.as_str());
                let mut renew = tokio::time::interval_at(
                    Instant::now() + LEASE_RENEW_PERIOD,
                    LEASE_RENEW_PERIOD,
                );
                let inactivity = tokio::time::sleep(FIRST_RESPONSE_WINDOW);
                tokio::pin!(inactivity);
                // Regex-terminated commands have no inactivity window
                // until their terminator is seen.
                let mut timer_armed = wait_regex.is_none();

                loop {
                    tokio::select! {
                        maybe_line = line_rx.recv() => {
                            let Some(line) = maybe_line else { break };
                            let Some(payload) = logclass::response_payload(&line) else {
                                continue;
                            };
                            debug!(seq, payload = %payload, "captured command output");
                            let terminated = wait_regex
                                .is_some_and(|regex| regex.is_match(&payload));
                            buffer.push(payload);
                            if terminated {
                                timer_armed = true;
                            }
                            if timer_armed {
                                let backlog = line_rx.len() as u32;
                                inactivity.as_mut().reset(
                                    Instant::now()
                                        + TAIL_WINDOW_BASE
                                        + TAIL_WINDOW_PER_PENDING * backlog,
                                );
                            }
                        }
                        () = &mut inactivity, if timer_armed => break,
                        _ = renew.tick() => {
                            let _ = console.lock().await;
                        }
                        _ = clean_rx.recv() => {
                            debug!(seq, "capture aborted by clean signal");
                            break;
                        }
                    }
                }
            }
        }

        *slot.write() = None;
        let _ = request.reply.send(buffer.join("\n"));
        let _ = console.unlock().await;
        seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records console traffic and lets tests feed scripted responses
    /// per write.
    struct FakeConsole {
        log: Mutex<Vec<String>>,
        written: mpsc::UnboundedSender<String>,
        fail_lock: bool,
    }

    impl FakeConsole {
        fn new(fail_lock: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (written, written_rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    log: Mutex::new(Vec::new()),
                    written,
                    fail_lock,
                }),
                written_rx,
            )
        }

        fn events(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Console for FakeConsole {
        async fn lock(&self) -> Result<(), HostError> {
            if self.fail_lock {
                return Err(HostError::Disconnected);
            }
            self.log.lock().unwrap().push("lock".into());
            Ok(())
        }

        async fn unlock(&self) -> Result<(), HostError> {
            self.log.lock().unwrap().push("unlock".into());
            Ok(())
        }

        async fn write(&self, _seq: u64, content: &str) -> Result<(), HostError> {
            self.log.lock().unwrap().push(format!("write {content}"));
            let _ = self.written.send(content.to_string());
            Ok(())
        }
    }

    fn server_line(payload: &str) -> String {
        format!("[12:00:00] [Server thread/INFO]: {payload}")
    }

    #[tokio::test]
    async fn captures_list_output() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console.clone());

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_command("list").await })
        };

        // Wait for the write, then emit the response line.
        let cmd = written.recv().await.unwrap();
        assert_eq!(cmd, "list");
        processor.on_log(
            &server_line("There are 2 of a max of 20 players online: alice, bob"),
            true,
        );

        let response = runner.await.unwrap();
        assert_eq!(
            response,
            "There are 2 of a max of 20 players online: alice, bob"
        );
        assert_eq!(
            console.events(),
            vec![
                "lock",
                "write list",
                "unlock",
            ]
        );
    }

    #[tokio::test]
    async fn leading_slash_is_stripped() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console);

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_command("/say hi").await })
        };
        assert_eq!(written.recv().await.unwrap(), "say hi");
        let _ = runner.await.unwrap();
    }

    #[tokio::test]
    async fn tellraw_skips_capture() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console.clone());

        let start = std::time::Instant::now();
        let response = processor
            .run_command("tellraw @a {\"text\":\"hi\"}")
            .await;
        assert_eq!(response, "");
        // No capture window: the reply is immediate.
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(
            written.recv().await.unwrap(),
            "tellraw @a {\"text\":\"hi\"}"
        );
    }

    #[tokio::test]
    async fn commands_are_serialized_fifo() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console.clone());

        let first = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_command("save-all").await })
        };
        let second = {
            let processor = Arc::clone(&processor);
            // Give the first request time to enqueue ahead.
            tokio::time::sleep(Duration::from_millis(20)).await;
            tokio::spawn(async move { processor.run_command("list").await })
        };

        assert_eq!(written.recv().await.unwrap(), "save-all");
        processor.on_log(&server_line("Saved the game"), true);
        assert_eq!(first.await.unwrap(), "Saved the game");

        assert_eq!(written.recv().await.unwrap(), "list");
        processor.on_log(
            &server_line("There are 0 of a max of 20 players online:"),
            true,
        );
        assert_eq!(
            second.await.unwrap(),
            "There are 0 of a max of 20 players online:"
        );

        // Lock/write/unlock never interleave across the two commands.
        assert_eq!(
            console.events(),
            vec![
                "lock",
                "write save-all",
                "unlock",
                "lock",
                "write list",
                "unlock",
            ]
        );
    }

    #[tokio::test]
    async fn regex_terminated_command_waits_for_terminator() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console);

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_command("save-all").await })
        };
        written.recv().await.unwrap();

        // A non-terminator line alone must not end the command.
        processor.on_log(&server_line("Saving the game (this may take a moment!)"), true);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!runner.is_finished());

        processor.on_log(&server_line("Saved the game"), true);
        let response = runner.await.unwrap();
        assert_eq!(
            response,
            "Saving the game (this may take a moment!)\nSaved the game"
        );
    }

    #[tokio::test]
    async fn chat_lines_are_not_captured() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console);

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_command("seed").await })
        };
        written.recv().await.unwrap();

        processor.on_log("[12:00:00] [Server thread/INFO]: <alice> seed please", true);
        processor.on_log(&server_line("Seed: [12345]"), true);

        assert_eq!(runner.await.unwrap(), "Seed: [12345]");
    }

    #[tokio::test]
    async fn clean_signal_aborts_capture() {
        let (console, mut written) = FakeConsole::new(false);
        let processor = CommandProcessor::new(console);

        let runner = {
            let processor = Arc::clone(&processor);
            // save-all never sees its terminator here, so only the
            // clean signal can end it.
            tokio::spawn(async move { processor.run_command("save-all").await })
        };
        written.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!runner.is_finished());

        processor.clean();
        assert_eq!(runner.await.unwrap(), "");
    }

    #[tokio::test]
    async fn lock_failure_yields_empty_reply() {
        let (console, _written) = FakeConsole::new(true);
        let processor = CommandProcessor::new(console);
        assert_eq!(processor.run_command("list").await, "");
    }
}
