//! In-process console.
//!
//! Attaches the controlling terminal to `run_command`: one line in,
//! captured output back. `exit` (or EOF / Ctrl-C at the prompt)
//! requests daemon shutdown. Line editing is rustyline's; its external
//! printer is installed into the host's printer slot so plugin output
//! does not clobber the prompt.

use crate::error::HostError;
use crate::host::Host;
use crate::plugin::Plugin;
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use tracing::warn;

const PROMPT: &str = "mcpd> ";

/// The REPL, packaged as a plugin so it rides the normal registry.
pub struct ReplPlugin;

impl ReplPlugin {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Plugin for ReplPlugin {
    fn name(&self) -> &str {
        "repl"
    }

    fn display_name(&self) -> &str {
        "Console REPL"
    }

    async fn init(&self, host: &Arc<Host>) -> Result<(), HostError> {
        let host = Arc::clone(host);
        let runtime = tokio::runtime::Handle::current();
        std::thread::Builder::new()
            .name("mcpd-repl".to_string())
            .spawn(move || repl_thread(&host, &runtime))
            .map_err(|err| HostError::PluginInit {
                name: "repl".to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn start(&self) {}

    async fn pause(&self) {}
}

/// Blocking line loop on its own thread; commands hop onto the runtime
/// via `block_on`.
fn repl_thread(host: &Arc<Host>, runtime: &tokio::runtime::Handle) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            warn!(error = %err, "no interactive terminal, REPL disabled");
            return;
        }
    };
    match editor.create_external_printer() {
        Ok(printer) => host.printer().set(Box::new(printer)),
        Err(err) => warn!(error = %err, "external printer unavailable"),
    }

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line == "exit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                let response = runtime.block_on(host.run_command(line));
                if !response.is_empty() {
                    host.println("Console", &response);
                }
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(err) => {
                warn!(error = %err, "console read failed");
                break;
            }
        }
    }

    host.printer().clear();
    host.request_shutdown();
}
