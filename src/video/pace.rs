//! Bandwidth-adaptive pacing
//!
//! The provider periodically reports a measured bits-per-second figure
//! and an average frame size over its control socket. The relay converts
//! that into a target inter-frame delay so throughput self-limits to the
//! provider's observed bandwidth. The delay sits in an atomic: the
//! control-channel receiver writes it while the egress task reads it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fraction of the measured bandwidth to actually use
const BANDWIDTH_HEADROOM: f64 = 0.75;

/// Pacing state for one video session
pub struct PaceState {
    delay_ms: AtomicU64,
    unmetered_bps: i64,
}

impl PaceState {
    /// Create with pacing disabled until the first report arrives
    pub fn new(unmetered_bps: i64) -> Self {
        Self {
            delay_ms: AtomicU64::new(0),
            unmetered_bps,
        }
    }

    /// Apply a bandwidth report
    ///
    /// The distinguished unmetered bps value disables pacing entirely.
    pub fn update(&self, bps: i64, avg_frame_bytes: i64) {
        if bps <= 0 || avg_frame_bytes <= 0 || bps == self.unmetered_bps {
            self.delay_ms.store(0, Ordering::Relaxed);
            return;
        }

        let fps_max = (bps as f64 / avg_frame_bytes as f64) * BANDWIDTH_HEADROOM;
        let delay_ms = (1000.0 / fps_max) as u64;
        self.delay_ms.store(delay_ms, Ordering::Relaxed);

        tracing::debug!(bps, avg_frame_bytes, delay_ms, "Pacing updated");
    }

    /// Current inter-frame delay; zero means unpaced
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNMETERED: i64 = 10_000_000;

    #[test]
    fn test_starts_unpaced() {
        let pace = PaceState::new(UNMETERED);
        assert_eq!(pace.delay(), Duration::ZERO);
    }

    #[test]
    fn test_report_sets_delay() {
        let pace = PaceState::new(UNMETERED);

        // 600_000 bps / 10_000 bytes * 0.75 = 45 fps -> 22ms
        pace.update(600_000, 10_000);
        assert_eq!(pace.delay(), Duration::from_millis(22));
    }

    #[test]
    fn test_unmetered_disables_pacing() {
        let pace = PaceState::new(UNMETERED);
        pace.update(600_000, 10_000);
        assert!(pace.delay() > Duration::ZERO);

        pace.update(UNMETERED, 10_000);
        assert_eq!(pace.delay(), Duration::ZERO);
    }

    #[test]
    fn test_degenerate_reports_disable_pacing() {
        let pace = PaceState::new(UNMETERED);
        pace.update(600_000, 10_000);

        pace.update(0, 10_000);
        assert_eq!(pace.delay(), Duration::ZERO);

        pace.update(600_000, 10_000);
        pace.update(600_000, 0);
        assert_eq!(pace.delay(), Duration::ZERO);
    }
}
