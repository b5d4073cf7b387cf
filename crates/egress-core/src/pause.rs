//! Pause/resume notifier
//!
//! Network-state managers pause the process while the device sleeps or
//! the default route changes; rebinding waits for them.

use tokio::sync::watch;

/// Pause state source consulted before rebinding sockets
pub trait PauseManager: Send + Sync {
    /// Whether the process is currently paused
    fn is_paused(&self) -> bool;

    /// Subscribe to pause state changes
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// A `watch`-backed [`PauseManager`]
#[derive(Debug)]
pub struct DefaultPauseManager {
    tx: watch::Sender<bool>,
}

impl DefaultPauseManager {
    /// Create in the running state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Enter the paused state
    pub fn pause(&self) {
        self.tx.send_replace(true);
    }

    /// Leave the paused state
    pub fn resume(&self) {
        self.tx.send_replace(false);
    }

    /// Wait until not paused
    pub async fn wait_active(&self) {
        let mut rx = self.tx.subscribe();
        // Only fails once the sender is gone, which cannot happen while `self` lives.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for DefaultPauseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseManager for DefaultPauseManager {
    fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
