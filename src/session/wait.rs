//! Bounded poll-with-sleep waits.

use std::time::Duration;

use tokio::time::Instant;

/// A deadline plus a poll interval.
///
/// Callers probe first and call [`pause`](Self::pause) between probes, so a
/// zero timeout still probes exactly once.
#[derive(Debug, Clone, Copy)]
pub struct BoundedWait {
    deadline: Instant,
    interval: Duration,
}

impl BoundedWait {
    /// Starts a wait that ends `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            interval,
        }
    }

    /// Sleeps one interval, clipped to the deadline.
    ///
    /// Returns `false`, without sleeping, once the deadline has passed.
    pub async fn pause(&mut self) -> bool {
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        tokio::time::sleep(self.interval.min(self.deadline - now)).await;
        true
    }
}
