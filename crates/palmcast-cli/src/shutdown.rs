//! Interrupt handling shared by both binaries.
//!
//! Ctrl-C (and SIGTERM, via the `termination` feature of `ctrlc`) flips a
//! `watch` flag.  Long-running loops hold a receiver and stop when it turns
//! `true`.

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;

/// Process-wide interrupt flag.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Request shutdown.  Repeated calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|stopping| !std::mem::replace(stopping, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Route Ctrl-C / SIGTERM to [`trigger`][Self::trigger].
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let this = self.clone();
        ctrlc::set_handler(move || {
            if !this.is_triggered() {
                println!();
                println!("{}", "⚠  Interrupt received – shutting down …".yellow().bold());
            }
            this.trigger();
        })
    }
}
