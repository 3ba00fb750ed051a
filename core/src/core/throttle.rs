//! Backoff for targets that push back during the mutation phase.
//!
//! Every push-back status doubles the delay applied before the next mutation
//! request, starting at `initialBackoffMs` and capped at `maxDelayMs`. A
//! `Retry-After` hint (in seconds) raises the delay to at least the hinted
//! value, under the same cap. Any other response decays the delay by `decayMs`.
//! Transport failures leave it untouched.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::Relaxed};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::http::HttpResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThrottleSettings {
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_delay_ms: u64,
    pub decay_ms: u64,
    /// Statuses read as "slow down".
    pub statuses: Vec<u16>,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_backoff_ms: 50,
            max_delay_ms: 2000,
            decay_ms: 10,
            statuses: vec![429, 403],
        }
    }
}

/// Shared by all in-flight mutation requests of one run; lock-free.
pub struct ThrottleController {
    settings: ThrottleSettings,
    delay_ms: AtomicU64,
    consecutive_blocks: AtomicU32,
    total_throttled: AtomicU64,
}

impl ThrottleController {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            delay_ms: AtomicU64::new(0),
            consecutive_blocks: AtomicU32::new(0),
            total_throttled: AtomicU64::new(0),
        }
    }

    pub async fn wait(&self) {
        let ms = self.delay_ms.load(Relaxed);
        if self.settings.enabled && ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Feeds one response. Returns true if it escalated the backoff.
    pub fn observe(&self, response: &HttpResponse) -> bool {
        if !self.settings.enabled || response.error.is_some() {
            return false;
        }

        if !self.settings.statuses.contains(&response.status_code) {
            self.consecutive_blocks.store(0, Relaxed);
            let decay = self.settings.decay_ms;
            let _ = self
                .delay_ms
                .fetch_update(Relaxed, Relaxed, |d| (d > 0).then(|| d.saturating_sub(decay)));
            return false;
        }

        let blocks = self.consecutive_blocks.fetch_add(1, Relaxed) + 1;
        self.total_throttled.fetch_add(1, Relaxed);

        let backoff = self
            .settings
            .initial_backoff_ms
            .saturating_mul(1u64 << (blocks - 1).min(16));
        let hinted = retry_after_ms(response).unwrap_or(0);
        let delay = backoff.max(hinted).min(self.settings.max_delay_ms);
        self.delay_ms.store(delay, Relaxed);
        debug!(
            "target answered {} ({} in a row), backing off {}ms",
            response.status_code, blocks, delay
        );
        true
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.delay_ms.load(Relaxed)
    }

    pub fn total_throttled(&self) -> u64 {
        self.total_throttled.load(Relaxed)
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date hints are ignored.
fn retry_after_ms(response: &HttpResponse) -> Option<u64> {
    response
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, v)| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}
