//! One-shot operator signals.
//!
//! A [`Gate`] starts closed and opens once; every clone observes the same
//! state. The orchestrator uses one for "login complete" and one for "stop".

use std::sync::Arc;

use tokio::sync::watch;

/// A latch any number of tasks can wait on.
#[derive(Debug, Clone)]
pub struct Gate {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Opens the gate, releasing all current and future waiters.
    pub fn open(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once the gate was opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.sender.borrow()
    }

    /// Waits until the gate is open.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|open| *open).await;
    }
}
