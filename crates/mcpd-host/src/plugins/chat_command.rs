//! In-chat command parser.
//!
//! Players issue plugin commands by chatting `!!verb args…`. This
//! plugin watches the log stream for chat lines of that shape and
//! dispatches the registered handler on its own task, so a slow
//! handler never stalls log dispatch.
//!
//! The chat pattern is a deployment constant; it tolerates an optional
//! bracketed tag between the log prefix and the `<player>` marker.

use crate::error::HostError;
use crate::host::Host;
use crate::plugin::Plugin;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Chat line carrying a `!!` command. Group 1 is the player, group 2
/// the raw command text.
static PLAYER_CHAT_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*?\]:(?: \[[^\]]+\])? <(.*?)>.*?!!(.*)").expect("pattern compiles")
});

/// Future returned by a command handler.
pub type CommandFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked with `(player, args)` when its verb is seen.
pub type CommandHandler = Arc<dyn Fn(String, Vec<String>) -> CommandFuture + Send + Sync>;

struct RegisteredCommand {
    owner: String,
    handler: CommandHandler,
}

struct ChatInner {
    commands: RwLock<HashMap<String, RegisteredCommand>>,
}

impl ChatInner {
    fn dispatch(&self, line: &str) {
        let Some(caps) = PLAYER_CHAT_COMMAND.captures(line) else {
            return;
        };
        let player = caps[1].trim().to_string();
        let raw = caps[2].trim();
        let mut parts = raw.split_whitespace();
        let Some(verb) = parts.next() else { return };
        let args: Vec<String> = parts.map(str::to_string).collect();

        let handler = {
            let commands = self.commands.read();
            commands.get(verb).map(|cmd| Arc::clone(&cmd.handler))
        };
        match handler {
            Some(handler) => {
                debug!(player = %player, verb, "dispatching chat command");
                tokio::spawn(handler(player, args));
            }
            None => debug!(player = %player, verb, "unknown chat command"),
        }
    }
}

/// The command-parser plugin. Held directly by the [`Host`] so that
/// `register_command` is available to every other plugin.
pub struct ChatCommandPlugin {
    inner: Arc<ChatInner>,
    log_handle: Mutex<Option<crate::bus::LogProcessorHandle>>,
}

impl ChatCommandPlugin {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(ChatInner {
                commands: RwLock::new(HashMap::new()),
            }),
            log_handle: Mutex::new(None),
        })
    }

    /// Registers a verb. Duplicate verbs are rejected.
    pub fn register(
        &self,
        owner: &str,
        verb: &str,
        handler: CommandHandler,
    ) -> Result<(), HostError> {
        let mut commands = self.inner.commands.write();
        if commands.contains_key(verb) {
            warn!(owner, verb, "chat command already registered");
            return Err(HostError::DuplicateCommand(verb.to_string()));
        }
        info!(owner, verb, "chat command registered");
        commands.insert(
            verb.to_string(),
            RegisteredCommand {
                owner: owner.to_string(),
                handler,
            },
        );
        Ok(())
    }

    /// Owner of a registered verb (diagnostics).
    #[must_use]
    pub fn owner_of(&self, verb: &str) -> Option<String> {
        self.inner
            .commands
            .read()
            .get(verb)
            .map(|cmd| cmd.owner.clone())
    }
}

#[async_trait]
impl Plugin for ChatCommandPlugin {
    fn name(&self) -> &str {
        "chat-command"
    }

    fn display_name(&self) -> &str {
        "Chat Commands"
    }

    async fn init(&self, host: &Arc<Host>) -> Result<(), HostError> {
        let inner = Arc::clone(&self.inner);
        let handle = host.register_log_processor("chat-command", move |line, _| {
            inner.dispatch(line);
        });
        *self.log_handle.lock() = Some(handle);
        Ok(())
    }

    async fn start(&self) {}

    async fn pause(&self) {}
}
