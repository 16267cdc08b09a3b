//! Shared printer slot for routing output through rustyline's
//! ExternalPrinter.
//!
//! While the REPL is active, plugin output must go through the
//! editor's external printer or it would clobber the prompt. When the
//! slot is empty, callers fall back to plain stdout.

use parking_lot::Mutex;
use rustyline::ExternalPrinter;
use std::sync::Arc;

/// Shared slot holding an optional [`ExternalPrinter`].
#[derive(Clone, Default)]
pub struct PrinterSlot {
    inner: Arc<Mutex<Option<Box<dyn ExternalPrinter + Send>>>>,
}

impl PrinterSlot {
    /// Creates an empty slot (no printer attached).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an ExternalPrinter; subsequent prints route through it.
    pub fn set(&self, printer: Box<dyn ExternalPrinter + Send>) {
        *self.inner.lock() = Some(printer);
    }

    /// Removes the printer; subsequent prints fall back to stdout.
    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// Attempts to print through the external printer. Returns false
    /// if no printer is installed (caller should fall back).
    pub fn print(&self, msg: String) -> bool {
        let mut guard = self.inner.lock();
        if let Some(printer) = guard.as_mut() {
            printer.print(msg).is_ok()
        } else {
            false
        }
    }
}
