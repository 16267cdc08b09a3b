//! End-to-end host tests against a real GameManager and a stub game
//! server (a shell script that answers like the dedicated server).

#![cfg(unix)]

use async_trait::async_trait;
use mcpd_host::{Host, HostConfig, HostError, Plugin};
use mcpd_proto::GameState;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Writes an executable stub game server. It answers
/// `testServerReady` with the unknown-command payload, `list` like the
/// real server, echoes everything else, and exits on `stop`.
fn write_stub_script(name: &str) -> std::path::PathBuf {
    let path =
        std::env::temp_dir().join(format!("mcpd-host-stub-{}-{}.sh", std::process::id(), name));
    let script = concat!(
        "#!/bin/sh\n",
        "echo '[12:00:00] [Server thread/INFO]: Done (1.234s)! For help, type \"help\"'\n",
        "while read line; do\n",
        "  case \"$line\" in\n",
        "    stop) exit 0 ;;\n",
        "    testServerReady) echo '[12:00:00] [Server thread/INFO]: Unknown or incomplete command, see below for error' ;;\n",
        "    list) echo '[12:00:00] [Server thread/INFO]: There are 0 of a max of 20 players online:' ;;\n",
        "    *) echo \"[12:00:00] [Server thread/INFO]: $line\" ;;\n",
        "  esac\n",
        "done\n",
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A GameManager on its own runtime thread, so a test can kill it
/// (dropping the runtime closes every connection) and bring up a
/// replacement on the same address.
struct ManagerProcess {
    addr: SocketAddr,
    stop: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl ManagerProcess {
    fn spawn(addr: Option<SocketAddr>) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let bind_to = addr
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "127.0.0.1:0".to_string());
                // The previous instance's sockets may need a moment to
                // release the port.
                let listener = loop {
                    match tokio::net::TcpListener::bind(&bind_to).await {
                        Ok(listener) => break listener,
                        Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                    }
                };
                addr_tx.send(listener.local_addr().unwrap()).unwrap();
                let manager = mcpd_manager::Manager::new();
                tokio::spawn(manager.serve(listener));
                let _ = stop_rx.await;
            });
            // Runtime drops here: all tasks die, all sockets close.
        });
        let addr = addr_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("manager bound");
        Self {
            addr,
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }

    fn kill(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ManagerProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[derive(Default)]
struct Lifecycle {
    inits: AtomicUsize,
    starts: AtomicUsize,
    pauses: AtomicUsize,
}

struct RecordingPlugin {
    lifecycle: Arc<Lifecycle>,
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    fn display_name(&self) -> &str {
        "Recording Plugin"
    }

    async fn init(&self, _host: &Arc<Host>) -> Result<(), HostError> {
        self.lifecycle.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) {
        self.lifecycle.starts.fetch_add(1, Ordering::SeqCst);
    }

    async fn pause(&self) {
        self.lifecycle.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config(addr: SocketAddr, script: &std::path::Path) -> HostConfig {
    let mut config = HostConfig::new(addr.to_string(), script.display().to_string());
    config.reconnect_backoff = Duration::from_millis(200);
    config
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true: {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bring_up_runs_commands_and_starts_plugins() {
    let manager = ManagerProcess::spawn(None);
    let script = write_stub_script("bringup");
    let host = Host::new(fast_config(manager.addr, &script));

    // A deferred plugin registered before run() is initialized and
    // started by the bring-up.
    let lifecycle = Arc::new(Lifecycle::default());
    let recording: Arc<dyn Plugin> = Arc::new(RecordingPlugin {
        lifecycle: Arc::clone(&lifecycle),
    });
    host.register_plugin_deferred(recording);

    host.run().await.expect("bring-up succeeds");
    assert_eq!(host.game_state(), GameState::Running);
    assert_eq!(lifecycle.inits.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);

    // Command capture through the whole stack.
    let response = host.run_command("list").await;
    assert_eq!(response, "There are 0 of a max of 20 players online:");

    let response = host.run_command("say hello world").await;
    assert_eq!(response, "say hello world");

    host.stop_game().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn game_stop_pauses_plugins_and_restart_starts_them_once() {
    let manager = ManagerProcess::spawn(None);
    let script = write_stub_script("restart");
    let host = Host::new(fast_config(manager.addr, &script));
    host.run().await.expect("bring-up succeeds");

    let lifecycle = Arc::new(Lifecycle::default());
    let recording: Arc<dyn Plugin> = Arc::new(RecordingPlugin {
        lifecycle: Arc::clone(&lifecycle),
    });
    // Eager registration while the game runs starts the plugin
    // immediately.
    host.register_plugin(recording).await.unwrap();
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);

    // In-band GameServerStop pauses every started plugin.
    host.stop_game().await.unwrap();
    let paused = Arc::clone(&lifecycle);
    eventually("plugin paused after game stop", move || {
        paused.pauses.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(host.game_state(), GameState::Stopped);

    // Bringing the game back starts each plugin exactly once more.
    host.ensure_game_running().await.unwrap();
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 2);
    assert_eq!(lifecycle.pauses.load(Ordering::SeqCst), 1);

    host.stop_game().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn manager_loss_triggers_pause_and_reconnect() {
    let mut manager = ManagerProcess::spawn(None);
    let addr = manager.addr;
    let script = write_stub_script("reconnect");
    let host = Host::new(fast_config(addr, &script));
    host.run().await.expect("bring-up succeeds");

    let lifecycle = Arc::new(Lifecycle::default());
    let recording: Arc<dyn Plugin> = Arc::new(RecordingPlugin {
        lifecycle: Arc::clone(&lifecycle),
    });
    host.register_plugin(recording).await.unwrap();
    assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);

    // Kill the manager: the push stream errors, plugins pause, the
    // reconnect loop starts probing.
    manager.kill();
    let paused = Arc::clone(&lifecycle);
    eventually("plugin paused after disconnect", move || {
        paused.pauses.load(Ordering::SeqCst) >= 1
    })
    .await;

    // A replacement manager on the same address: the host reconnects,
    // restarts the game, and starts plugins again.
    let replacement = ManagerProcess::spawn(Some(addr));
    let restarted = Arc::clone(&lifecycle);
    eventually("plugin restarted after reconnect", move || {
        restarted.starts.load(Ordering::SeqCst) == 2
    })
    .await;

    let response = host.run_command("list").await;
    assert_eq!(response, "There are 0 of a max of 20 players online:");

    host.stop_game().await.unwrap();
    drop(replacement);
}
