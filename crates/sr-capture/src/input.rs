//! Input side of the device layer.
//!
//! The real keyboard/mouse driver lives outside this workspace; the core only
//! talks to [`GameInput`]. [`DryRunInput`] logs and records every action, which
//! is what the CLI uses when no driver is attached and what tests inspect.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ScreenPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    W,
    A,
    S,
    D,
    /// Run toggle.
    Shift,
    /// Interact.
    F,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InteractKind {
    /// Press the interact key while the prompt is visible.
    Key,
    /// Click the prompt itself.
    Click,
}

/// Everything the movement core asks the input driver to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputAction {
    StartMovingForward { run: bool },
    StopMovingForward,
    Turn { degrees: f64 },
    Click(ScreenPoint),
    Drag {
        from: ScreenPoint,
        to: ScreenPoint,
        duration: Duration,
    },
    Interact { at: ScreenPoint, kind: InteractKind },
    HoldKeys { keys: Vec<Key>, duration: Duration },
}

/// Signed turn (degrees, clockwise positive) from `facing` to the bearing
/// that points from `current` at `target`. Result is in `(-180, 180]`.
pub fn heading_delta(current: (f64, f64), target: (f64, f64), facing: f64) -> f64 {
    let bearing = (target.1 - current.1).atan2(target.0 - current.0).to_degrees();
    let mut delta = (bearing - facing) % 360.0;
    if delta <= -180.0 {
        delta += 360.0;
    } else if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

pub trait GameInput {
    fn start_moving_forward(&mut self, run: bool);
    fn stop_moving_forward(&mut self);
    /// Rotate the camera/character by `degrees` (clockwise positive).
    fn turn_by_angle(&mut self, degrees: f64);
    fn click(&mut self, at: ScreenPoint);
    fn drag(&mut self, from: ScreenPoint, to: ScreenPoint, duration: Duration);
    fn interact(&mut self, at: ScreenPoint, kind: InteractKind);
    /// Hold `keys` together for `duration`, then release them.
    fn hold_keys(&mut self, keys: &[Key], duration: Duration);

    /// Turn toward `target` and keep walking (or running) forward.
    ///
    /// Points are large-map coordinates; `facing_angle` uses the minimap
    /// convention (0 = screen-right, clockwise positive).
    fn move_towards(&mut self, current: (f64, f64), target: (f64, f64), facing_angle: f64, run: bool) {
        let delta = heading_delta(current, target, facing_angle);
        if delta.abs() > 1.0 {
            self.turn_by_angle(delta);
        }
        self.start_moving_forward(run);
    }
}

/// Input driver that only logs what it would do.
#[derive(Debug, Default)]
pub struct DryRunInput {
    actions: Vec<InputAction>,
}

impl DryRunInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[InputAction] {
        &self.actions
    }

    /// Number of recorded actions matching `pred`.
    pub fn count(&self, pred: impl Fn(&InputAction) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(a)).count()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }

    fn record(&mut self, action: InputAction) {
        debug!("input: {:?}", action);
        self.actions.push(action);
    }
}

impl GameInput for DryRunInput {
    fn start_moving_forward(&mut self, run: bool) {
        self.record(InputAction::StartMovingForward { run });
    }

    fn stop_moving_forward(&mut self) {
        self.record(InputAction::StopMovingForward);
    }

    fn turn_by_angle(&mut self, degrees: f64) {
        self.record(InputAction::Turn { degrees });
    }

    fn click(&mut self, at: ScreenPoint) {
        self.record(InputAction::Click(at));
    }

    fn drag(&mut self, from: ScreenPoint, to: ScreenPoint, duration: Duration) {
        self.record(InputAction::Drag { from, to, duration });
    }

    fn interact(&mut self, at: ScreenPoint, kind: InteractKind) {
        info!("interact at ({}, {}) via {:?}", at.x, at.y, kind);
        self.record(InputAction::Interact { at, kind });
    }

    fn hold_keys(&mut self, keys: &[Key], duration: Duration) {
        self.record(InputAction::HoldKeys {
            keys: keys.to_vec(),
            duration,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_delta_straight_down() {
        // Target below the player is a bearing of 90 degrees (clockwise from right).
        let d = heading_delta((100.0, 100.0), (100.0, 160.0), 0.0);
        assert!((d - 90.0).abs() < 1e-9, "got {}", d);
    }

    #[test]
    fn test_heading_delta_wraps() {
        let d = heading_delta((0.0, 0.0), (10.0, -1.0), 350.0);
        assert!(d.abs() < 10.0, "expected a small correction, got {}", d);
        let d = heading_delta((0.0, 0.0), (-10.0, 0.0), 0.0);
        assert!((d - 180.0).abs() < 1e-9, "got {}", d);
    }

    #[test]
    fn test_move_towards_records_turn_and_forward() {
        let mut input = DryRunInput::new();
        input.move_towards((0.0, 0.0), (0.0, 10.0), 0.0, true);
        assert_eq!(input.actions().len(), 2);
        assert_eq!(
            input.actions()[1],
            InputAction::StartMovingForward { run: true }
        );
    }

    #[test]
    fn test_move_towards_skips_tiny_turn() {
        let mut input = DryRunInput::new();
        input.move_towards((0.0, 0.0), (10.0, 0.0), 0.5, false);
        assert_eq!(
            input.count(|a| matches!(a, InputAction::Turn { .. })),
            0
        );
    }
}
