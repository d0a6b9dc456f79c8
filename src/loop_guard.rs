//! Redirect loop guard
//!
//! Throttles automatic launches to one per cooldown window, so a backend that
//! can never finish authenticating does not bounce the page forever.

use crate::storage::Storage;
use crate::time::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Storage key holding the last attempt, as decimal epoch milliseconds.
pub const ATTEMPT_KEY: &str = "pe_last_auto_launch_attempt";

/// Default cooldown window
pub const COOLDOWN: Duration = Duration::from_secs(30);

/// When the last launch redirect was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempted_at_millis: i64,
}

impl AttemptRecord {
    fn parse(raw: &str) -> Option<Self> {
        raw.trim()
            .parse()
            .ok()
            .map(|attempted_at_millis| Self { attempted_at_millis })
    }
}

#[derive(Clone)]
pub struct LoopGuard {
    storage: Arc<dyn Storage>,
    cooldown: Duration,
}

impl LoopGuard {
    pub fn new(storage: Arc<dyn Storage>, cooldown: Duration) -> Self {
        Self { storage, cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Stamp now under the attempt key.
    pub fn record_attempt(&self) {
        self.record_attempt_at(now_millis());
    }

    pub fn record_attempt_at(&self, now_ms: i64) {
        match self.storage.set(ATTEMPT_KEY, &now_ms.to_string()) {
            Ok(()) => debug!(at = now_ms, "launch attempt recorded"),
            Err(e) => warn!(error = %e, "failed to record launch attempt"),
        }
    }

    pub fn clear_attempt(&self) {
        if let Err(e) = self.storage.remove(ATTEMPT_KEY) {
            warn!(error = %e, "failed to clear launch attempt");
        }
    }

    pub fn last_attempt(&self) -> Option<AttemptRecord> {
        match self.storage.get(ATTEMPT_KEY) {
            Ok(raw) => raw.as_deref().and_then(AttemptRecord::parse),
            Err(e) => {
                warn!(error = %e, "failed to read launch attempt");
                None
            }
        }
    }

    pub fn is_in_cooldown(&self) -> bool {
        self.cooldown_remaining().is_some()
    }

    /// Time left in the current window, `None` when a launch may proceed.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown_remaining_at(now_millis())
    }

    pub fn cooldown_remaining_at(&self, now_ms: i64) -> Option<Duration> {
        let last = self.last_attempt()?;
        let elapsed = now_ms.saturating_sub(last.attempted_at_millis);
        // A stamp from the future (clock moved back) counts as just now.
        let elapsed = Duration::from_millis(elapsed.max(0) as u64);
        self.cooldown.checked_sub(elapsed).filter(|r| !r.is_zero())
    }
}

impl std::fmt::Debug for LoopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopGuard")
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}
