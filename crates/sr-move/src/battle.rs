//! Combat seams used by the controller and the route runner.
//!
//! The game fights on auto-battle; all the core does is start an encounter
//! and wait for the world view to come back.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use sr_capture::ScreenPoint;
use sr_vision::BattleStatus;

use crate::controller::{Devices, MoveFailure};

/// Whether an attack turned into a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackOutcome {
    /// The attack hit and the fight has been run to the end.
    Fought,
    /// Nothing was hit.
    Missed,
}

pub trait CombatHandler {
    /// Run the current battle to completion.
    fn fight(&mut self, devices: &mut Devices<'_>) -> Result<(), MoveFailure>;

    /// Attack whatever is in front of the player, fighting the battle it
    /// starts.
    fn attack(&mut self, devices: &mut Devices<'_>) -> Result<AttackOutcome, MoveFailure>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleConfig {
    pub poll_interval_secs: f64,
    /// Give up on a battle that never ends.
    pub max_battle_secs: f64,
    /// How long after an attack the battle transition can take to start.
    pub attack_settle_secs: f64,
    /// Consecutive in-world frames that end a battle.
    pub in_world_frames: u32,
    /// Where an attack click lands.
    pub attack_point: ScreenPoint,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0.5,
            max_battle_secs: 600.0,
            attack_settle_secs: 1.5,
            in_world_frames: 2,
            attack_point: ScreenPoint::new(960, 540),
        }
    }
}

/// Leaves the fighting to the game's auto-battle and polls the screen
/// classifier until the world view is back.
#[derive(Debug, Clone, Default)]
pub struct AutoBattle {
    pub config: BattleConfig,
}

impl AutoBattle {
    pub fn new(config: BattleConfig) -> Self {
        Self { config }
    }

    fn poll(&self) -> Duration {
        Duration::from_secs_f64(self.config.poll_interval_secs)
    }
}

impl CombatHandler for AutoBattle {
    fn fight(&mut self, devices: &mut Devices<'_>) -> Result<(), MoveFailure> {
        let started = devices.clock.now();
        let limit = Duration::from_secs_f64(self.config.max_battle_secs);
        let mut in_world = 0;
        info!("Battle started, waiting for auto-battle");

        while in_world < self.config.in_world_frames {
            if devices.clock.now() - started > limit {
                warn!("Battle still running after {:.0}s", limit.as_secs_f64());
                return Err(MoveFailure::BattleStuck);
            }
            let frame = devices
                .capture
                .screenshot()
                .map_err(|e| MoveFailure::Capture(e.to_string()))?;
            match devices.classifier.battle_status(&frame) {
                BattleStatus::InWorld => in_world += 1,
                status => {
                    if in_world > 0 {
                        debug!("Back to {:?}", status);
                    }
                    in_world = 0;
                }
            }
            devices.clock.sleep(self.poll());
        }

        info!(
            "Battle finished after {:.1}s",
            (devices.clock.now() - started).as_secs_f64()
        );
        Ok(())
    }

    fn attack(&mut self, devices: &mut Devices<'_>) -> Result<AttackOutcome, MoveFailure> {
        devices.input.click(self.config.attack_point);

        let deadline = devices.clock.now() + Duration::from_secs_f64(self.config.attack_settle_secs);
        while devices.clock.now() < deadline {
            devices.clock.sleep(self.poll());
            let frame = devices
                .capture
                .screenshot()
                .map_err(|e| MoveFailure::Capture(e.to_string()))?;
            if devices.classifier.battle_status(&frame) != BattleStatus::InWorld {
                self.fight(devices)?;
                return Ok(AttackOutcome::Fought);
            }
        }
        debug!("Attack did not start a battle");
        Ok(AttackOutcome::Missed)
    }
}
