pub mod battle;
pub mod controller;
pub mod maneuver;
pub mod route;
pub mod source;

#[cfg(test)]
mod testing;

pub use battle::{AttackOutcome, AutoBattle, BattleConfig, CombatHandler};
pub use controller::{
    ControlFlags, Devices, MoveConfig, MoveEnv, MoveFailure, MoveOutcome, MovementController,
};
pub use route::{RouteReport, RouteRunner};
pub use source::{Fix, MinimapPositionSource, PositionSource, Signals};
