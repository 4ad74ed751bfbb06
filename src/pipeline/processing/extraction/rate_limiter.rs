use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::clock::Clock;

/// Global spacing gate for extractor calls: consecutive callers proceed at least
/// `min_interval` apart no matter how many pipeline workers share it.
pub struct RateLimiter {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    // time slot handed to the most recent caller
    last_slot: Mutex<Option<DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { min_interval, clock, last_slot: Mutex::new(None) }
    }

    /// Wait for this caller's turn. Returns how long the caller waited.
    ///
    /// The slot is reserved under the lock and the lock is released before sleeping,
    /// so a waiting caller never blocks others from reserving the slots after it.
    pub async fn acquire(&self) -> Duration {
        let wait = {
            let mut last = self.last_slot.lock().await;
            let now = self.clock.now();
            let interval = chrono::Duration::from_std(self.min_interval)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let slot = match *last {
                Some(prev) if prev + interval > now => prev + interval,
                _ => now,
            };
            *last = Some(slot);
            (slot - now).to_std().unwrap_or(Duration::ZERO)
        };

        if !wait.is_zero() {
            self.clock.sleep(wait).await;
        }
        wait
    }
}
