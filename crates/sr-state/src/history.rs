//! Position history, stuck detection and the no-fix counter.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// A position fix and when it was taken.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: Duration,
    pub x: f64,
    pub y: f64,
}

/// Ring buffer of fixes spaced at least `min_interval` apart.
#[derive(Debug, Clone)]
pub struct PositionHistory {
    capacity: usize,
    min_interval: Duration,
    samples: VecDeque<Sample>,
}

impl PositionHistory {
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        Self {
            capacity: capacity.max(2),
            min_interval,
            samples: VecDeque::new(),
        }
    }

    /// Record a fix. Fixes closer than `min_interval` to the previous one are
    /// dropped. Returns whether the fix was kept.
    pub fn push(&mut self, at: Duration, x: f64, y: f64) -> bool {
        if let Some(last) = self.samples.back() {
            if at < last.at + self.min_interval {
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, x, y });
        true
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Distance from the oldest kept fix to the newest. Zero with fewer than
    /// two fixes.
    pub fn displacement(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(a), Some(b)) => ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt(),
            _ => 0.0,
        }
    }

    /// Move every timestamp forward, e.g. by the length of a pause.
    pub fn shift(&mut self, by: Duration) {
        for s in self.samples.iter_mut() {
            s.at += by;
        }
    }
}

/// Escape moves tried in rotation while stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscapeManeuver {
    Left,
    Right,
    BackLeft,
    BackRight,
    LeftBackRight,
    RightBackLeft,
}

impl EscapeManeuver {
    pub const ROTATION: [EscapeManeuver; 6] = [
        EscapeManeuver::Left,
        EscapeManeuver::Right,
        EscapeManeuver::BackLeft,
        EscapeManeuver::BackRight,
        EscapeManeuver::LeftBackRight,
        EscapeManeuver::RightBackLeft,
    ];

    /// Maneuver for the `attempt`-th escape (1-based).
    pub fn for_attempt(attempt: usize) -> Self {
        Self::ROTATION[(attempt.max(1) - 1) % Self::ROTATION.len()]
    }

    /// How long each leg of the maneuver holds its key. Later attempts move
    /// further.
    pub fn leg_duration(base: Duration, attempt: usize) -> Duration {
        base.mul_f64(1.0 + 0.5 * (attempt.max(1) - 1) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckCheck {
    /// Not enough history yet, or moving fine.
    Moving,
    Stuck {
        maneuver: EscapeManeuver,
        /// 1-based attempt number since the last time movement resumed.
        attempt: usize,
    },
    /// Every allowed maneuver has been tried.
    Exhausted,
}

/// Detects a player that is not making progress and hands out escape
/// maneuvers.
#[derive(Debug, Clone)]
pub struct StuckTracker {
    history: PositionHistory,
    stuck_distance: f64,
    max_maneuvers: usize,
    attempts: usize,
}

impl StuckTracker {
    pub fn new(capacity: usize, min_interval: Duration, stuck_distance: f64, max_maneuvers: usize) -> Self {
        Self {
            history: PositionHistory::new(capacity, min_interval),
            stuck_distance,
            max_maneuvers,
            attempts: 0,
        }
    }

    pub fn record(&mut self, at: Duration, x: f64, y: f64) -> bool {
        self.history.push(at, x, y)
    }

    pub fn history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Decide whether the player is stuck. A stuck verdict clears the
    /// history so the next verdict needs a full buffer again; a full buffer
    /// that shows movement resets the attempt count.
    pub fn check(&mut self) -> StuckCheck {
        if !self.history.is_full() {
            return StuckCheck::Moving;
        }
        let moved = self.history.displacement();
        if moved >= self.stuck_distance {
            if self.attempts > 0 {
                debug!("Moving again after {} escape attempt(s)", self.attempts);
            }
            self.attempts = 0;
            return StuckCheck::Moving;
        }
        if self.attempts >= self.max_maneuvers {
            warn!("Still stuck after {} escape maneuvers", self.attempts);
            return StuckCheck::Exhausted;
        }
        self.attempts += 1;
        self.history.clear();
        let maneuver = EscapeManeuver::for_attempt(self.attempts);
        debug!(
            "Stuck (moved {:.1}px), attempt {} with {:?}",
            moved, self.attempts, maneuver
        );
        StuckCheck::Stuck {
            maneuver,
            attempt: self.attempts,
        }
    }

    pub fn shift(&mut self, by: Duration) {
        self.history.shift(by);
    }

    /// Forget all fixes and attempts, e.g. after a fight moved the player.
    pub fn reset(&mut self) {
        self.history.clear();
        self.attempts = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoFixAction {
    /// Keep going on dead reckoning.
    Continue,
    /// Try once without the candidate window.
    Relocate,
    /// Stop walking until a fix comes back.
    StopMoving,
    /// Give up.
    Fail,
}

/// Consecutive cycles without a position fix.
#[derive(Debug, Clone)]
pub struct NoFixCounter {
    consecutive: u32,
    relocate_at: u32,
    stop_at: u32,
    fail_at: u32,
}

impl NoFixCounter {
    pub fn new(relocate_at: u32, stop_at: u32, fail_at: u32) -> Self {
        Self {
            consecutive: 0,
            relocate_at,
            stop_at,
            fail_at,
        }
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn miss(&mut self) -> NoFixAction {
        self.consecutive += 1;
        let n = self.consecutive;
        if n >= self.fail_at {
            NoFixAction::Fail
        } else if n == self.stop_at {
            NoFixAction::StopMoving
        } else if n == self.relocate_at {
            NoFixAction::Relocate
        } else {
            NoFixAction::Continue
        }
    }

    pub fn hit(&mut self) {
        self.consecutive = 0;
    }
}
