use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod clock;
pub mod history;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::{EscapeManeuver, NoFixAction, NoFixCounter, PositionHistory, Sample, StuckCheck, StuckTracker};

/// Where a single move-to-target run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePhase {
    #[default]
    Moving,
    StuckRecovery,
    CombatInterrupt,
    Arrived,
    Failed,
}

impl MovePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MovePhase::Arrived | MovePhase::Failed)
    }
}

/// Timestamps a move run keeps. All are offsets from the run's clock epoch
/// and shift together across a pause.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveTimers {
    pub started: Duration,
    /// Last accepted position fix.
    pub last_fix: Duration,
    /// Last time the heading was corrected.
    pub last_steer: Option<Duration>,
    /// Last time combat ended (or the run started).
    pub last_battle: Duration,
}

impl MoveTimers {
    pub fn new(now: Duration) -> Self {
        Self {
            started: now,
            last_fix: now,
            last_steer: None,
            last_battle: now,
        }
    }

    pub fn shift(&mut self, by: Duration) {
        self.started += by;
        self.last_fix += by;
        self.last_battle += by;
        if let Some(t) = self.last_steer.as_mut() {
            *t += by;
        }
    }
}

/// Serialisable view of a move run, published to status listeners.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavSnapshot {
    pub phase: MovePhase,
    pub region_id: String,
    pub position: Option<(f64, f64)>,
    pub target: (f64, f64),
    pub facing: Option<f64>,
    pub no_fix_count: u32,
    pub escape_attempts: usize,
    pub iterations: usize,
    pub elapsed_secs: f64,
}

impl NavSnapshot {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
