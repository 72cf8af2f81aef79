//! Clock Engine: live per-side countdown predicted from an authoritative base.
//!
//! The ledger stores remaining seconds per side and the epoch at which they
//! were taken. Between ledger updates the side to move counts down locally:
//!
//! ```text
//! elapsed  = max(0, now - epoch)
//! mover    = max(0, remaining - elapsed)
//! waiting  = remaining
//! ```
//!
//! When a display first reaches zero the engine raises a one-shot flag for
//! that side. The flag is local and advisory; the game ends only when the
//! ledger accepts a flag-win transaction.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::snapshot::ClockSnapshot;
use crate::types::Side;

// ───────────────────────────────────────────────────────────────────────────
// Time sources
// ───────────────────────────────────────────────────────────────────────────

/// Source of wall-clock time in epoch milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Base and display
// ───────────────────────────────────────────────────────────────────────────

/// An authoritative (or optimistically rebased) clock reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockBase {
    pub white_ms: u64,
    pub black_ms: u64,
    /// Epoch milliseconds of the reading; 0 means no reading exists.
    pub epoch_ms: u64,
    pub side_to_move: Side,
}

impl ClockBase {
    /// Base from a confirmed ledger snapshot.
    pub fn from_snapshot(snapshot: &ClockSnapshot, side_to_move: Side) -> Self {
        Self {
            white_ms: snapshot.white_remaining_secs.saturating_mul(1000),
            black_ms: snapshot.black_remaining_secs.saturating_mul(1000),
            epoch_ms: snapshot.last_updated_secs.saturating_mul(1000),
            side_to_move,
        }
    }

    /// Base taken from what is currently displayed, with the turn passed to
    /// the other side. Used after an optimistic move.
    pub fn rebased(display: ClockDisplay, now_ms: u64, side_to_move: Side) -> Self {
        Self {
            white_ms: display.white_ms,
            black_ms: display.black_ms,
            epoch_ms: now_ms,
            side_to_move,
        }
    }

    pub fn exists(&self) -> bool {
        self.epoch_ms != 0
    }

    pub fn remaining_ms(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        }
    }

    /// Displays at `now_ms`.
    pub fn sample(&self, now_ms: u64) -> ClockDisplay {
        let elapsed = now_ms.saturating_sub(self.epoch_ms);
        let shown = |side: Side| {
            let remaining = self.remaining_ms(side);
            if side == self.side_to_move {
                remaining.saturating_sub(elapsed)
            } else {
                remaining
            }
        };
        ClockDisplay {
            white_ms: shown(Side::White),
            black_ms: shown(Side::Black),
        }
    }

    /// The same reading expressed as a ledger snapshot, rounding up to whole
    /// seconds.
    pub fn to_snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            white_remaining_secs: self.white_ms.div_ceil(1000),
            black_remaining_secs: self.black_ms.div_ceil(1000),
            last_updated_secs: self.epoch_ms / 1000,
        }
    }
}

/// Displayed remaining time per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockDisplay {
    pub white_ms: u64,
    pub black_ms: u64,
}

impl ClockDisplay {
    pub fn get(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        }
    }

    /// Whole seconds shown, rounded up.
    pub fn secs(&self, side: Side) -> u64 {
        self.get(side).div_ceil(1000)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Engine
// ───────────────────────────────────────────────────────────────────────────

/// Countdown state for one session.
#[derive(Debug, Clone, Default)]
pub struct ClockEngine {
    base: Option<ClockBase>,
    display: ClockDisplay,
    flagged: [bool; 2],
}

impl ClockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new base. Clears the flags and snaps the display to it.
    pub fn set_base(&mut self, base: ClockBase) {
        self.base = Some(base);
        self.display = ClockDisplay {
            white_ms: base.white_ms,
            black_ms: base.black_ms,
        };
        self.flagged = [false; 2];
    }

    pub fn base(&self) -> Option<&ClockBase> {
        self.base.as_ref()
    }

    pub fn display(&self) -> ClockDisplay {
        self.display
    }

    pub fn is_flagged(&self, side: Side) -> bool {
        self.flagged[side.index()]
    }

    /// Whether the countdown is live: a base exists, no proof is in flight,
    /// both displays are positive and nobody has flagged.
    pub fn should_run(&self, proving: bool) -> bool {
        let Some(base) = &self.base else {
            return false;
        };
        base.exists()
            && !proving
            && self.display.white_ms > 0
            && self.display.black_ms > 0
            && !self.flagged.iter().any(|f| *f)
    }

    /// Advance the display to `now_ms` and return the sides that flagged on
    /// this tick.
    ///
    /// The display is frozen while a proof is in flight or after a flag.
    pub fn tick(&mut self, now_ms: u64, proving: bool) -> Vec<Side> {
        let Some(base) = self.base else {
            return Vec::new();
        };
        if proving || !base.exists() || self.flagged.iter().any(|f| *f) {
            return Vec::new();
        }

        self.display = base.sample(now_ms);

        let mut newly = Vec::new();
        for side in [Side::White, Side::Black] {
            if self.display.get(side) == 0 && !self.flagged[side.index()] {
                self.flagged[side.index()] = true;
                newly.push(side);
            }
        }
        newly
    }

    /// Rebase to the current display with the turn handed to `next`.
    ///
    /// The display is taken as last ticked, so time spent frozen while a
    /// proof was in flight is not charged to the mover.
    pub fn rebase_to(&mut self, now_ms: u64, next: Side) -> ClockBase {
        let base = ClockBase::rebased(self.display, now_ms, next);
        self.set_base(base);
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base(white: u64, black: u64, epoch: u64, side: Side) -> ClockBase {
        ClockBase::from_snapshot(
            &ClockSnapshot {
                white_remaining_secs: white,
                black_remaining_secs: black,
                last_updated_secs: epoch,
            },
            side,
        )
    }

    #[test]
    fn test_mover_counts_down_waiting_side_frozen() {
        let b = base(300, 200, 1_000, Side::White);
        let d = b.sample(1_010_500);
        assert_eq!(d.white_ms, 289_500);
        assert_eq!(d.black_ms, 200_000);
        assert_eq!(d.secs(Side::White), 290);
    }

    #[test]
    fn test_clock_before_epoch_shows_base() {
        let b = base(300, 200, 1_000, Side::Black);
        let d = b.sample(900_000);
        assert_eq!(d.white_ms, 300_000);
        assert_eq!(d.black_ms, 200_000);
    }

    #[test]
    fn test_flag_fires_once_per_base() {
        let mut engine = ClockEngine::new();
        engine.set_base(base(5, 60, 1_000, Side::White));
        assert!(engine.should_run(false));

        assert!(engine.tick(1_004_000, false).is_empty());
        assert_eq!(engine.tick(1_005_000, false), vec![Side::White]);
        assert!(engine.is_flagged(Side::White));
        assert!(!engine.should_run(false));

        // Repeated sampling after zero does not re-fire.
        for t in [1_006_000, 1_010_000, 2_000_000] {
            assert!(engine.tick(t, false).is_empty());
        }

        // A new base resets the condition.
        engine.set_base(base(0, 60, 2_000, Side::White));
        assert!(!engine.is_flagged(Side::White));
        assert_eq!(engine.tick(2_000_000, false), vec![Side::White]);
    }

    #[test]
    fn test_should_run_requires_base_and_no_proof() {
        let mut engine = ClockEngine::new();
        assert!(!engine.should_run(false));

        engine.set_base(base(300, 300, 0, Side::White));
        assert!(!engine.should_run(false));
        assert!(engine.tick(5_000, false).is_empty());

        engine.set_base(base(300, 300, 10, Side::White));
        assert!(engine.should_run(false));
        assert!(!engine.should_run(true));
    }

    #[test]
    fn test_tick_frozen_while_proving() {
        let mut engine = ClockEngine::new();
        engine.set_base(base(300, 300, 10, Side::White));
        engine.tick(15_000, false);
        let before = engine.display();
        engine.tick(60_000, true);
        assert_eq!(engine.display(), before);
    }

    #[test]
    fn test_rebase_hands_turn_over() {
        let mut engine = ClockEngine::new();
        engine.set_base(base(300, 300, 10, Side::White));
        engine.tick(40_500, false);

        // Proving freezes the display; the rebase ignores the frozen span.
        assert!(engine.tick(44_000, true).is_empty());
        let rebased = engine.rebase_to(45_000, Side::Black);
        assert_eq!(rebased.white_ms, 269_500);
        assert_eq!(rebased.black_ms, 300_000);
        assert_eq!(rebased.epoch_ms, 45_000);
        assert_eq!(rebased.side_to_move, Side::Black);
        assert_eq!(rebased.to_snapshot().white_remaining_secs, 270);

        // Black now counts down, white is frozen.
        engine.tick(55_000, false);
        assert_eq!(engine.display().white_ms, 269_500);
        assert_eq!(engine.display().black_ms, 290_000);
    }

    proptest! {
        #[test]
        fn prop_waiting_side_non_increasing(
            white in 0u64..10_000,
            black in 0u64..10_000,
            epoch in 1u64..1_000_000,
            mut samples in proptest::collection::vec(0u64..2_000_000_000, 1..32),
        ) {
            samples.sort_unstable();
            let b = base(white, black, epoch, Side::White);
            let mut last_black = u64::MAX;
            let mut last_white = u64::MAX;
            for now in samples {
                let d = b.sample(now);
                prop_assert!(d.black_ms <= last_black);
                prop_assert!(d.white_ms <= last_white);
                last_black = d.black_ms;
                last_white = d.white_ms;
            }
        }

        #[test]
        fn prop_flag_at_most_once(
            white in 0u64..20,
            epoch in 1u64..1_000,
            steps in proptest::collection::vec(0u64..5_000, 1..64),
        ) {
            let mut engine = ClockEngine::new();
            engine.set_base(base(white, 600, epoch, Side::White));
            let mut now = epoch * 1000;
            let mut fired = 0;
            for step in steps {
                now += step;
                fired += engine.tick(now, false).len();
            }
            prop_assert!(fired <= 1);
        }
    }
}
