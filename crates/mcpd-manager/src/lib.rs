//! GameManager: the process-side half of mcpd.
//!
//! The GameManager owns the game child process and turns its
//! line-oriented console into a multi-client RPC service:
//!
//! ```text
//! ┌───────────────────────── GameManager ─────────────────────────┐
//! │                                                               │
//! │  Supervisor ──► child process (stdin / stdout / stderr)       │
//! │      │                                                        │
//! │      ▼ lines                                                  │
//! │  LogFanout ──► subscriber FIFOs (one per Message stream)      │
//! │      ▲                                                        │
//! │  WriteLock (exclusive, renewable 10 s lease)                  │
//! │      ▲                                                        │
//! │  Service: Login / Status / Start / Stop /                     │
//! │           Lock / Unlock / Write / Message(stream)             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`supervisor`]: spawn/observe/tear down the child, scan its
//!   output into the fan-out
//! - [`fanout`]: bounded, non-blocking delivery to subscribers
//! - [`write_lock`]: leased exclusive ownership of the child's stdin
//! - [`service`]: the framed-RPC surface over loopback TCP
//! - [`error`]: [`ManagerError`]

pub mod error;
pub mod fanout;
pub mod service;
pub mod supervisor;
pub mod write_lock;

pub use error::ManagerError;
pub use fanout::{LogFanout, StreamEvent, Subscription, SUBSCRIBER_CAPACITY};
pub use service::Manager;
pub use supervisor::Supervisor;
pub use write_lock::{WriteLock, LOCK_MAX_TIME};
