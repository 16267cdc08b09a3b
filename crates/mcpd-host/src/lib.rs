//! PluginHost: the plugin-side half of mcpd.
//!
//! The PluginHost dials the GameManager, turns the console into a
//! request/response command channel, and hosts plugins on top of it:
//!
//! ```text
//! ┌───────────────────────── PluginHost ──────────────────────────┐
//! │                                                               │
//! │  ManagerClient ──► framed RPC + push stream                   │
//! │        │                                                      │
//! │        ▼ pushes                                               │
//! │  MessageBus ──► log processors / raw subscribers              │
//! │        │                                                      │
//! │  CommandProcessor (serialized queue, response capture)        │
//! │        │                                                      │
//! │  Host: plugin registry, lifecycle, reconnect loop             │
//! │        │                                                      │
//! │  Plugins: chat commands, status, REPL, …                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`client`]: the framed RPC client
//! - [`bus`]: local fan-out of the push stream
//! - [`command`]: the command processor and its response capture
//! - [`logclass`]: log-line classification patterns
//! - [`plugin`]: the plugin ABI and lifecycle handles
//! - [`host`]: the host itself (lifecycle state machine)
//! - [`repl`]: the in-process console
//! - [`plugins`]: built-in and bundled plugins
//! - [`printer`]: output routing through the REPL's external printer

pub mod bus;
pub mod client;
pub mod command;
pub mod error;
pub mod host;
pub mod logclass;
pub mod plugin;
pub mod plugins;
pub mod printer;
pub mod repl;

pub use bus::{LogProcessorHandle, MessageBus};
pub use client::ManagerClient;
pub use command::{CommandProcessor, Console};
pub use error::HostError;
pub use host::{Host, HostConfig};
pub use plugin::{Plugin, PluginHandle};
