//! Outbound flood protection
//!
//! Servers disconnect clients that write too fast. Outbound lines are paced
//! with a token bucket: up to `burst` lines go out back to back, after which
//! one line is released per `interval`. Idle time refills the bucket at the
//! same rate.
//!
//! The bucket is tracked as a theoretical arrival time (`tat`), the instant
//! at which the bucket would be completely drained at the configured rate.

use crate::config::ConnectionSettings;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Token bucket pacing outbound lines
#[derive(Debug, Clone)]
pub struct FloodControl {
    enabled: bool,
    burst: u32,
    interval: Duration,
    tat: Option<Instant>,
}

impl FloodControl {
    /// Create a bucket. `burst` is clamped to at least one line.
    pub fn new(enabled: bool, burst: u32, interval: Duration) -> Self {
        Self {
            enabled,
            burst: burst.max(1),
            interval,
            tat: None,
        }
    }

    /// Bucket described by the connection settings
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::new(settings.flood_enabled, settings.flood_burst, settings.flood_interval)
    }

    /// Bucket that never delays
    pub fn disabled() -> Self {
        Self::new(false, 1, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.interval.is_zero()
    }

    /// Take one token at `now` and return how long the caller must wait
    /// before writing the line.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }

        let tat = self.tat.map_or(now, |tat| tat.max(now));
        let tolerance = self.interval * (self.burst - 1);
        let wait = (tat - now).saturating_sub(tolerance);
        self.tat = Some(tat + self.interval);
        wait
    }

    /// Wait until the next line may be written
    pub async fn pace(&mut self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            trace!("Flood protection delaying next line by {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
