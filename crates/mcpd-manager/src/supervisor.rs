//! Child process supervision.
//!
//! The [`Supervisor`] owns the game process: it spawns it from a start
//! script with stderr folded onto stdout, scans the merged stream into
//! the [`LogFanout`] (one scanner per child), exposes its stdin as
//! [`write_line`](Supervisor::write_line), and watches for exit. State
//! transitions:
//!
//! ```text
//!            start()                     child exits
//! stopped ─────────────► running ─────────────────────► stopped
//!    ▲                                                     │
//!    └─────────────────────────────────────────────────────┘
//!                     (fresh instance per start)
//! ```
//!
//! `start` claims the running state *before* spawning so a concurrent
//! `start` observes `AlreadyRunning`; a spawn failure rolls the claim
//! back.

use crate::error::ManagerError;
use crate::fanout::{LogFanout, StreamEvent};
use crate::write_lock::WriteLock;
use mcpd_proto::{GameState, StatusResponse, STATE_GAME_SERVER_START, STATE_GAME_SERVER_STOP};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::watch;
use tracing::{info, warn};

/// Scanner line limit. Longer lines are split at this boundary.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// How long a graceful `stop` may take before the process group gets
/// SIGTERM.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

struct ChildIo {
    stdin: Option<Arc<tokio::sync::Mutex<ChildStdin>>>,
    pid: Option<u32>,
}

/// Spawns, observes, and tears down the game process.
pub struct Supervisor {
    fanout: Arc<LogFanout>,
    lock: WriteLock,
    state_tx: watch::Sender<GameState>,
    io: Mutex<ChildIo>,
}

impl Supervisor {
    #[must_use]
    pub fn new(fanout: Arc<LogFanout>, lock: WriteLock) -> Arc<Self> {
        let (state_tx, _) = watch::channel(GameState::Stopped);
        Arc::new(Self {
            fanout,
            lock,
            state_tx,
            io: Mutex::new(ChildIo {
                stdin: None,
                pid: None,
            }),
        })
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> GameState {
        *self.state_tx.borrow()
    }

    /// A receiver that observes state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<GameState> {
        self.state_tx.subscribe()
    }

    /// Spawns the game process from `path`.
    ///
    /// The working directory becomes the script's parent. On unix the
    /// child gets its own session so the whole process tree can be
    /// signalled at once.
    ///
    /// # Errors
    ///
    /// [`ManagerError::AlreadyRunning`] if an instance is running;
    /// [`ManagerError::Spawn`] / [`ManagerError::Stdio`] on launch
    /// failure (state rolls back to stopped).
    pub fn start(self: &Arc<Self>, path: &str) -> Result<GameState, ManagerError> {
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == GameState::Stopped {
                *state = GameState::Running;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ManagerError::AlreadyRunning);
        }

        match self.spawn_child(path) {
            Ok(()) => Ok(GameState::Running),
            Err(err) => {
                self.state_tx.send_replace(GameState::Stopped);
                Err(err)
            }
        }
    }

    fn spawn_child(self: &Arc<Self>, path: &str) -> Result<(), ManagerError> {
        let script = std::fs::canonicalize(path).map_err(ManagerError::Spawn)?;
        let workdir = script
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut cmd = Command::new(&script);
        cmd.current_dir(&workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                // New session: the child's pid doubles as the pgid for
                // the SIGTERM fallback.
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                // Fold stderr onto the stdout pipe so the child emits
                // one merged stream and one scanner sees every line.
                if libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(ManagerError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ManagerError::Stdio(std::io::Error::other("stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ManagerError::Stdio(std::io::Error::other("stdout not piped")))?;
        let pid = child.id();

        {
            let mut io = self.io.lock().unwrap();
            io.stdin = Some(Arc::new(tokio::sync::Mutex::new(stdin)));
            io.pid = pid;
        }

        info!(path = %script.display(), pid, "game server starting");
        self.fanout.publish(StreamEvent::StateChange {
            content: STATE_GAME_SERVER_START.to_string(),
        });

        self.spawn_scanner(stdout);

        // Exit watcher: one per child lifetime.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            {
                let mut io = this.io.lock().unwrap();
                io.stdin = None;
                io.pid = None;
            }
            this.state_tx.send_replace(GameState::Stopped);
            this.fanout.publish(StreamEvent::StateChange {
                content: STATE_GAME_SERVER_STOP.to_string(),
            });
            match status {
                Ok(status) => info!(code = ?status.code(), "game server stopped"),
                Err(err) => warn!(error = %err, "wait on game server failed"),
            }
        });

        Ok(())
    }

    /// One scanner per child lifetime, over the merged stream.
    fn spawn_scanner<R>(self: &Arc<Self>, stream: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let fanout = Arc::clone(&self.fanout);
        let lock = self.lock.clone();
        tokio::spawn(async move {
            if let Err(err) = scan_lines(stream, &fanout, &lock).await {
                warn!(error = %err, "console scanner closed unexpectedly");
            }
        });
    }

    /// Writes one line (a trailing `\n` is appended) to the child's
    /// stdin.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotRunning`] if there is no child;
    /// [`ManagerError::Stdio`] if the pipe write fails.
    pub async fn write_line(&self, content: &str) -> Result<(), ManagerError> {
        let stdin = self
            .io
            .lock()
            .unwrap()
            .stdin
            .clone()
            .ok_or(ManagerError::NotRunning)?;
        let mut stdin = stdin.lock().await;
        stdin
            .write_all(format!("{content}\n").as_bytes())
            .await
            .map_err(ManagerError::Stdio)?;
        stdin.flush().await.map_err(ManagerError::Stdio)?;
        Ok(())
    }

    /// Graceful stop: writes `stop`, waits up to [`STOP_GRACE`], then
    /// SIGTERMs the process group and waits for exit. No-op when
    /// already stopped.
    pub async fn stop(&self) -> Result<(), ManagerError> {
        if self.state() == GameState::Stopped {
            return Ok(());
        }
        info!("stopping game server");
        if let Err(err) = self.write_line("stop").await {
            warn!(error = %err, "could not write stop command");
        }

        let mut rx = self.state_tx.subscribe();
        if tokio::time::timeout(STOP_GRACE, wait_stopped(&mut rx))
            .await
            .is_err()
        {
            warn!("graceful stop timed out, sending SIGTERM to process group");
            self.terminate_process_group();
            wait_stopped(&mut rx).await;
        }
        Ok(())
    }

    fn terminate_process_group(&self) {
        let pid = self.io.lock().unwrap().pid;
        #[cfg(unix)]
        if let Some(pid) = pid {
            // setsid() in pre_exec makes the child's pid the pgid.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }

    /// Run state plus the resident memory of the child's process tree.
    /// Descendants whose stats cannot be read contribute zero.
    #[must_use]
    pub fn status(&self) -> StatusResponse {
        let state = self.state();
        let pid = self.io.lock().unwrap().pid;
        let usedmemory = match (state, pid) {
            (GameState::Running, Some(pid)) => process_tree_rss(pid),
            _ => 0,
        };
        StatusResponse { state, usedmemory }
    }
}

async fn wait_stopped(rx: &mut watch::Receiver<GameState>) {
    while *rx.borrow_and_update() != GameState::Stopped {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Reads `\n`-delimited lines (capped at [`MAX_LINE_BYTES`], longer
/// lines split) and fans each out with the write-lock snapshot taken
/// at scan time.
async fn scan_lines<R>(
    stream: R,
    fanout: &LogFanout,
    lock: &WriteLock,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(64 * 1024, stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        while buf.last().is_some_and(|&b| b == b'\n' || b == b'\r') {
            buf.pop();
        }
        let content = String::from_utf8_lossy(&buf).into_owned();
        fanout.publish(StreamEvent::Stdout {
            content,
            locked: lock.is_locked(),
        });
    }
}

/// Sum of the RSS of `root` and all its descendants.
fn process_tree_rss(root: u32) -> u64 {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut total = 0u64;
    let mut stack = vec![Pid::from_u32(root)];
    while let Some(pid) = stack.pop() {
        if let Some(process) = sys.process(pid) {
            total += process.memory();
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_strips_terminators_and_snapshots_lock() {
        let fanout = LogFanout::new();
        let lock = WriteLock::new();
        let mut sub = fanout.subscribe("test");

        let input: &[u8] = b"first line\r\nsecond line\n";
        scan_lines(input, &fanout, &lock).await.unwrap();

        match sub.rx.recv().await.unwrap() {
            StreamEvent::Stdout { content, locked } => {
                assert_eq!(content, "first line");
                assert!(!locked);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match sub.rx.recv().await.unwrap() {
            StreamEvent::Stdout { content, .. } => assert_eq!(content, "second line"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scan_splits_oversize_lines() {
        let fanout = LogFanout::new();
        let lock = WriteLock::new();
        let mut sub = fanout.subscribe("test");

        let long = vec![b'x'; MAX_LINE_BYTES + 10];
        scan_lines(long.as_slice(), &fanout, &lock).await.unwrap();

        match sub.rx.recv().await.unwrap() {
            StreamEvent::Stdout { content, .. } => assert_eq!(content.len(), MAX_LINE_BYTES),
            other => panic!("unexpected event: {other:?}"),
        }
        match sub.rx.recv().await.unwrap() {
            StreamEvent::Stdout { content, .. } => assert_eq!(content.len(), 10),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_line_requires_running_child() {
        let fanout = LogFanout::new();
        let supervisor = Supervisor::new(fanout, WriteLock::new());
        let err = supervisor.write_line("list").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning));
    }

    #[tokio::test]
    async fn stop_when_stopped_is_noop() {
        let fanout = LogFanout::new();
        let supervisor = Supervisor::new(fanout, WriteLock::new());
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.state(), GameState::Stopped);
    }

    #[tokio::test]
    async fn status_when_stopped_reports_zero_memory() {
        let fanout = LogFanout::new();
        let supervisor = Supervisor::new(fanout, WriteLock::new());
        let status = supervisor.status();
        assert_eq!(status.state, GameState::Stopped);
        assert_eq!(status.usedmemory, 0);
    }
}
