//! The PluginHost.
//!
//! Owns the manager session, the message bus, the command processor,
//! and the plugin registry, and runs the lifecycle state machine:
//!
//! ```text
//!  Disconnected ──(connect + login + subscribe)──► LoggedIn
//!       ▲                                             │
//!       │                                   ensure_game_running
//!       │                                             │
//!       │                                             ▼
//!       │                                 Running ◄──────┐
//!       │                                   │  ▲         │ GameServerStop
//!       │            stream error           │  └─────────┤   (plugins pause)
//!       └─────(plugins pause, reconnect) ◄──┘     next start
//! ```
//!
//! A `GameServerStop` pushed in-band pauses plugins but keeps the RPC
//! channel. A transport loss pauses plugins, clears the session, and
//! enters the reconnect loop (one at a time, fixed backoff) until
//! connect, login, subscribe, and game restart all succeed.

use crate::bus::{BusSubscription, LogProcessorHandle, MessageBus, BUS_CHANNEL_CAPACITY};
use crate::client::ManagerClient;
use crate::command::{CommandProcessor, Console};
use crate::error::HostError;
use crate::plugin::{Plugin, PluginHandle};
use crate::plugins::chat_command::{ChatCommandPlugin, CommandHandler};
use crate::printer::PrinterSlot;
use async_trait::async_trait;
use mcpd_proto::{Client, GameState, StartRequest, StatusResponse, WriteRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

/// Default delay between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// GameManager address.
    pub address: String,
    /// Start script handed to the manager's `Start`.
    pub start_script: String,
    /// Delay between reconnect attempts.
    pub reconnect_backoff: Duration,
}

impl HostConfig {
    #[must_use]
    pub fn new(address: impl Into<String>, start_script: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            start_script: start_script.into(),
            reconnect_backoff: RECONNECT_BACKOFF,
        }
    }
}

#[derive(Default)]
struct Session {
    client: Option<Arc<ManagerClient>>,
    info: Option<Client>,
}

type SharedSession = Arc<RwLock<Session>>;

fn current_session(session: &SharedSession) -> Result<(Arc<ManagerClient>, Client), HostError> {
    let guard = session.read();
    match (&guard.client, guard.info) {
        (Some(client), Some(info)) => Ok((Arc::clone(client), info)),
        _ => Err(HostError::NotLoggedIn),
    }
}

/// The command processor's view of the console: passthroughs over the
/// current session.
struct HostConsole {
    session: SharedSession,
}

#[async_trait]
impl Console for HostConsole {
    async fn lock(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client.lock(me).await
    }

    async fn unlock(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client.unlock(me).await
    }

    async fn write(&self, seq: u64, content: &str) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client
            .write(WriteRequest {
                client: me,
                id: seq,
                content: content.to_string(),
            })
            .await
    }
}

/// The PluginHost.
pub struct Host {
    config: HostConfig,
    session: SharedSession,
    bus: Arc<MessageBus>,
    commands: Arc<CommandProcessor>,
    chat: Arc<ChatCommandPlugin>,
    plugins: RwLock<HashMap<String, Arc<PluginHandle>>>,
    deferred: Mutex<Vec<Arc<PluginHandle>>>,
    game_state: Mutex<GameState>,
    err_tx: mpsc::Sender<HostError>,
    reconnecting: AtomicBool,
    printer: PrinterSlot,
    shutdown: Notify,
    /// Keeps the command processor's capture hook registered.
    _command_log: LogProcessorHandle,
}

impl Host {
    /// Builds the host and spawns its background machinery (error
    /// handler, game-stop monitor, command worker). Nothing touches
    /// the network until [`run`](Self::run).
    #[must_use]
    pub fn new(config: HostConfig) -> Arc<Self> {
        let session: SharedSession = Arc::new(RwLock::new(Session::default()));
        let bus = MessageBus::new();
        let (err_tx, err_rx) = mpsc::channel(16);

        let commands = CommandProcessor::new(Arc::new(HostConsole {
            session: Arc::clone(&session),
        }));
        let capture = Arc::clone(&commands);
        let command_log = bus.register_log_processor("command-processor", move |line, locked| {
            capture.on_log(line, locked);
        });

        let host = Arc::new(Self {
            config,
            session,
            bus,
            commands,
            chat: ChatCommandPlugin::new(),
            plugins: RwLock::new(HashMap::new()),
            deferred: Mutex::new(Vec::new()),
            game_state: Mutex::new(GameState::Stopped),
            err_tx,
            reconnecting: AtomicBool::new(false),
            printer: PrinterSlot::new(),
            shutdown: Notify::new(),
            _command_log: command_log,
        });
        host.spawn_stop_monitor();
        host.spawn_error_handler(err_rx);
        host
    }

    /// Connects, registers the built-in plugins, and brings the game
    /// up. One shot: callers retry around it (the reconnect loop takes
    /// over once this has succeeded).
    pub async fn run(self: &Arc<Self>) -> Result<(), HostError> {
        self.init_client().await?;
        let chat: Arc<dyn Plugin> = Arc::clone(&self.chat) as Arc<dyn Plugin>;
        self.register_plugin(chat).await?;
        self.init_deferred_plugins().await;
        self.ensure_game_running().await?;
        Ok(())
    }

    // ── session ──

    async fn init_client(&self) -> Result<(), HostError> {
        info!(address = %self.config.address, "connecting to GameManager");
        let (push_tx, mut push_rx) = mpsc::channel(BUS_CHANNEL_CAPACITY);
        let client =
            ManagerClient::connect(&self.config.address, push_tx, self.err_tx.clone()).await?;
        let me = client.login().await?;
        info!(client = me.id, "client id assigned by GameManager");
        client.subscribe_messages(me).await?;

        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            while let Some(msg) = push_rx.recv().await {
                bus.publish(&msg);
            }
        });

        let mut session = self.session.write();
        session.client = Some(client);
        session.info = Some(me);
        Ok(())
    }

    fn clear_session(&self) {
        let mut session = self.session.write();
        session.client = None;
        session.info = None;
    }

    /// True while the current session's connection is alive. Used to
    /// discard disconnect events from connections that were already
    /// replaced.
    fn session_is_live(&self) -> bool {
        let session = self.session.read();
        session
            .client
            .as_ref()
            .is_some_and(|client| !client.is_closed())
    }

    // ── console & manager passthroughs ──

    /// Runs a console command and returns its captured output.
    pub async fn run_command(&self, command: &str) -> String {
        self.commands.run_command(command).await
    }

    pub async fn lock(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client.lock(me).await
    }

    pub async fn unlock(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client.unlock(me).await
    }

    pub async fn write(&self, seq: u64, content: &str) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client
            .write(WriteRequest {
                client: me,
                id: seq,
                content: content.to_string(),
            })
            .await
    }

    pub async fn status(&self) -> Result<StatusResponse, HostError> {
        let (client, me) = current_session(&self.session)?;
        client.status(me).await
    }

    pub async fn start_game(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client
            .start(StartRequest {
                client: me,
                path: self.config.start_script.clone(),
            })
            .await
            .map(|_| ())
    }

    pub async fn stop_game(&self) -> Result<(), HostError> {
        let (client, me) = current_session(&self.session)?;
        client.stop(me).await
    }

    // ── log stream surface ──

    /// Registers a raw message channel; drop the subscription to
    /// unsubscribe.
    pub fn subscribe(&self, owner: impl Into<String>) -> BusSubscription {
        self.bus.subscribe(owner)
    }

    /// Registers a callback over console lines; drop the handle to
    /// unregister.
    pub fn register_log_processor<F>(&self, owner: impl Into<String>, process: F) -> LogProcessorHandle
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.bus.register_log_processor(owner, process)
    }

    /// Registers a `!!verb` chat command with the built-in parser.
    pub fn register_command(
        &self,
        owner: &str,
        verb: &str,
        handler: CommandHandler,
    ) -> Result<(), HostError> {
        self.chat.register(owner, verb, handler)
    }

    /// Prints a scoped line through the REPL printer when one is
    /// attached, else to stdout.
    pub fn println(&self, scope: &str, text: &str) {
        let line = format!("[{scope}] {text}");
        if !self.printer.print(line.clone()) {
            println!("{line}");
        }
    }

    #[must_use]
    pub fn printer(&self) -> &PrinterSlot {
        &self.printer
    }

    // ── plugin registry ──

    /// Registers and initializes a plugin. Duplicate names are ignored
    /// with a diagnostic. If the game is already running the plugin is
    /// started immediately.
    pub async fn register_plugin(
        self: &Arc<Self>,
        plugin: Arc<dyn Plugin>,
    ) -> Result<(), HostError> {
        let Some(handle) = self.insert_plugin(plugin) else {
            return Ok(());
        };
        handle.init(self).await?;
        if self.game_state() == GameState::Running {
            handle.start().await;
        }
        Ok(())
    }

    /// Registers a plugin whose `init` is deferred until
    /// [`run`](Self::run) has registered all built-ins. For plugins
    /// that look up siblings at init time.
    pub fn register_plugin_deferred(&self, plugin: Arc<dyn Plugin>) {
        if let Some(handle) = self.insert_plugin(plugin) {
            self.deferred.lock().push(handle);
        }
    }

    fn insert_plugin(&self, plugin: Arc<dyn Plugin>) -> Option<Arc<PluginHandle>> {
        let name = plugin.name().to_string();
        let mut plugins = self.plugins.write();
        if plugins.contains_key(&name) {
            warn!(plugin = %name, "plugin already registered, ignoring");
            return None;
        }
        info!(plugin = %plugin.display_name(), "registering plugin");
        let handle = PluginHandle::new(plugin);
        plugins.insert(name, Arc::clone(&handle));
        Some(handle)
    }

    async fn init_deferred_plugins(self: &Arc<Self>) {
        let pending: Vec<_> = {
            let mut deferred = self.deferred.lock();
            deferred.drain(..).collect()
        };
        for handle in pending {
            if handle.init(self).await.is_ok() && self.game_state() == GameState::Running {
                handle.start().await;
            }
        }
    }

    /// Looks up a registered plugin by name.
    #[must_use]
    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .get(name)
            .map(|handle| Arc::clone(handle.plugin()))
    }

    async fn start_plugins(&self) {
        let handles: Vec<_> = self.plugins.read().values().cloned().collect();
        for handle in handles {
            handle.start().await;
        }
    }

    async fn pause_plugins(&self) {
        // Abort an in-flight capture first so no worker blocks on a
        // console that is going away.
        self.commands.clean();
        let handles: Vec<_> = self.plugins.read().values().cloned().collect();
        for handle in handles {
            handle.pause().await;
        }
    }

    // ── game lifecycle ──

    #[must_use]
    pub fn game_state(&self) -> GameState {
        *self.game_state.lock()
    }

    fn set_game_state(&self, state: GameState) {
        *self.game_state.lock() = state;
    }

    /// Brings the game to the ready state: starts it if stopped, then
    /// issues the `testServerReady` sentinel (its "Unknown or
    /// incomplete command" reply proves the console is accepting
    /// commands), then starts every registered plugin.
    pub async fn ensure_game_running(self: &Arc<Self>) -> Result<(), HostError> {
        info!("querying game server status");
        let status = self.status().await?;
        match status.state {
            GameState::Running => {
                info!("game server already running, waiting for console readiness");
            }
            GameState::Stopped => {
                info!(script = %self.config.start_script, "starting game server");
                self.start_game().await?;
            }
        }

        // Transient subscriber: echo startup lines while we wait.
        let startup_log = self.register_log_processor("startup-log", |line, _| {
            info!(target: "mcpd::game", "{}", line);
        });
        self.run_command("testServerReady").await;
        drop(startup_log);

        info!("game server ready, starting plugins");
        self.set_game_state(GameState::Running);
        self.start_plugins().await;
        Ok(())
    }

    // ── failure orchestration ──

    fn spawn_stop_monitor(self: &Arc<Self>) {
        let mut sub = self.bus.subscribe("game-stop-monitor");
        let err_tx = self.err_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.rx.recv().await {
                if msg.is_game_stop() {
                    let _ = err_tx.send(HostError::GameStopped).await;
                }
            }
        });
    }

    fn spawn_error_handler(self: &Arc<Self>, mut err_rx: mpsc::Receiver<HostError>) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(err) = err_rx.recv().await {
                match err {
                    HostError::GameStopped => {
                        warn!("game server stopped, pausing plugins");
                        host.set_game_state(GameState::Stopped);
                        host.pause_plugins().await;
                    }
                    HostError::Disconnected => {
                        if host.session_is_live() {
                            debug!("disconnect from a replaced connection, ignoring");
                            continue;
                        }
                        warn!("manager connection lost, pausing plugins");
                        host.clear_session();
                        host.set_game_state(GameState::Stopped);
                        host.pause_plugins().await;
                        host.spawn_reconnect();
                    }
                    other => debug!(error = %other, "host error event"),
                }
            }
        });
    }

    /// Spawns the reconnect loop unless one is already running.
    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let host = Arc::clone(self);
        tokio::spawn(async move {
            info!("reconnect loop started");
            loop {
                if let Err(err) = host.init_client().await {
                    debug!(error = %err, "reconnect attempt failed");
                    tokio::time::sleep(host.config.reconnect_backoff).await;
                    continue;
                }
                if let Err(err) = host.ensure_game_running().await {
                    warn!(error = %err, "game restart after reconnect failed");
                    tokio::time::sleep(host.config.reconnect_backoff).await;
                    continue;
                }
                break;
            }
            host.reconnecting.store(false, Ordering::SeqCst);
            info!("reconnected to GameManager");
        });
    }

    // ── shutdown ──

    /// Asks the daemon to exit (used by the REPL's `exit`).
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves when shutdown has been requested.
    pub async fn wait_shutdown(&self) {
        self.shutdown.notified().await;
    }
}
