//! Walks the player to one target point on one large map.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sr_capture::{Capture, GameInput};
use sr_state::{
    Clock, EscapeManeuver, MovePhase, MoveTimers, NavSnapshot, NoFixAction, NoFixCounter, StuckCheck,
    StuckTracker,
};
use sr_vision::{BattleStatus, CandidateWindow, LargeMapInfo, ScreenClassifier, WorldPoint};

use crate::battle::{AttackOutcome, CombatHandler};
use crate::maneuver;
use crate::source::{Fix, PositionSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveConfig {
    /// Fixes kept for stuck detection.
    pub history_len: usize,
    pub history_interval_secs: f64,
    /// A full history spanning less than this is stuck.
    pub stuck_distance: f64,
    pub max_escape_maneuvers: usize,
    /// Hold time of one maneuver leg on the first attempt.
    pub escape_leg_secs: f64,
    /// Abort when no battle has happened for this long.
    pub battle_timeout_secs: f64,
    pub no_fix_relocate: u32,
    pub no_fix_stop: u32,
    pub no_fix_fail: u32,
    pub arrival_distance: f64,
    pub steer_interval_secs: f64,
    /// Pause between iterations.
    pub tick_secs: f64,
    pub pause_poll_secs: f64,
    /// Large-map pixels per second.
    pub walk_speed: f64,
    pub run_speed: f64,
    /// Added to the travel bound of every candidate window.
    pub window_slack: f64,
    pub max_window_radius: f64,
    pub run: bool,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            history_len: 6,
            history_interval_secs: 0.5,
            stuck_distance: 20.0,
            max_escape_maneuvers: 12,
            escape_leg_secs: 0.25,
            battle_timeout_secs: 120.0,
            no_fix_relocate: 3,
            no_fix_stop: 5,
            no_fix_fail: 10,
            arrival_distance: 10.0,
            steer_interval_secs: 0.5,
            tick_secs: 0.2,
            pause_poll_secs: 0.5,
            walk_speed: 25.0,
            run_speed: 45.0,
            window_slack: 20.0,
            max_window_radius: 200.0,
            run: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MoveFailure {
    #[error("脱困失败")]
    StuckEscapeFailed,
    #[error("无法判断当前人物坐标")]
    PositionLost,
    #[error("长时间未发生战斗")]
    BattleTimeout,
    #[error("战斗未结束")]
    BattleStuck,
    #[error("已停止")]
    Stopped,
    #[error("截图失败: {0}")]
    Capture(String),
}

/// Pause and stop requests from another thread, read at the top of every
/// iteration.
#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    pause: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// The device side a move needs.
pub struct Devices<'a> {
    pub capture: &'a mut dyn Capture,
    pub input: &'a mut dyn GameInput,
    pub classifier: &'a dyn ScreenClassifier,
    pub clock: &'a dyn Clock,
}

/// Everything [`MovementController::execute`] talks to.
pub struct MoveEnv<'a> {
    pub devices: Devices<'a>,
    pub source: &'a mut dyn PositionSource,
    pub combat: &'a mut dyn CombatHandler,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub success: bool,
    pub phase: MovePhase,
    pub status: String,
    pub failure: Option<MoveFailure>,
    pub final_position: Option<WorldPoint>,
    /// Every accepted fix, in order.
    pub trace: Vec<WorldPoint>,
    pub maneuvers: Vec<EscapeManeuver>,
    pub battles: usize,
    pub iterations: usize,
}

/// Moves the player from `start` to `target` on one map.
///
/// The loop keeps a history of fixes to notice when the player is stuck,
/// gives way to combat, and tolerates a bounded run of frames without a
/// fix. All timing goes through the environment's [`Clock`].
pub struct MovementController {
    map: Arc<LargeMapInfo>,
    /// Region to try when `map` stops giving fixes (floor change).
    next_map: Option<Arc<LargeMapInfo>>,
    target: WorldPoint,
    start: WorldPoint,
    stop_afterwards: bool,
    config: MoveConfig,
    flags: ControlFlags,
    snapshot: Option<Box<dyn FnMut(&NavSnapshot) + Send>>,
}

/// Mutable state of one `execute` call.
struct Run {
    phase: MovePhase,
    timers: MoveTimers,
    stuck: StuckTracker,
    no_fix: NoFixCounter,
    position: WorldPoint,
    facing: Option<f64>,
    moving: bool,
    trace: Vec<WorldPoint>,
    maneuvers: Vec<EscapeManeuver>,
    battles: usize,
    iterations: usize,
}

impl MovementController {
    pub fn new(map: Arc<LargeMapInfo>, target: WorldPoint, start: WorldPoint, stop_afterwards: bool) -> Self {
        Self {
            map,
            next_map: None,
            target,
            start,
            stop_afterwards,
            config: MoveConfig::default(),
            flags: ControlFlags::default(),
            snapshot: None,
        }
    }

    pub fn with_config(mut self, config: MoveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_flags(mut self, flags: ControlFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Map of the floor this move leads to, loaded before the move starts.
    pub fn with_next_map(mut self, map: Arc<LargeMapInfo>) -> Self {
        self.next_map = Some(map);
        self
    }

    /// Called with a snapshot after every iteration.
    pub fn on_snapshot(mut self, f: impl FnMut(&NavSnapshot) + Send + 'static) -> Self {
        self.snapshot = Some(Box::new(f));
        self
    }

    /// Region the controller ends up on.
    pub fn map(&self) -> &Arc<LargeMapInfo> {
        &self.map
    }

    pub fn execute(&mut self, env: &mut MoveEnv<'_>) -> MoveOutcome {
        let cfg = self.config.clone();
        let now = env.devices.clock.now();
        let mut run = Run {
            phase: MovePhase::Moving,
            timers: MoveTimers::new(now),
            stuck: StuckTracker::new(
                cfg.history_len,
                secs(cfg.history_interval_secs),
                cfg.stuck_distance,
                cfg.max_escape_maneuvers,
            ),
            no_fix: NoFixCounter::new(cfg.no_fix_relocate, cfg.no_fix_stop, cfg.no_fix_fail),
            position: self.start,
            facing: None,
            moving: false,
            trace: Vec::new(),
            maneuvers: Vec::new(),
            battles: 0,
            iterations: 0,
        };

        info!(
            "Move on {} from ({:.0}, {:.0}) to ({:.0}, {:.0})",
            self.map.region.id, self.start.x, self.start.y, self.target.x, self.target.y
        );

        let result = self.run_loop(env, &mut run);
        let (failure, status) = match &result {
            Ok(()) => {
                run.phase = MovePhase::Arrived;
                (None, "已到达".to_string())
            }
            Err(f) => {
                run.phase = MovePhase::Failed;
                if run.moving {
                    env.devices.input.stop_moving_forward();
                }
                warn!("Move to ({:.0}, {:.0}) failed: {}", self.target.x, self.target.y, f);
                (Some(f.clone()), f.to_string())
            }
        };
        self.publish(&run, env.devices.clock.now());

        MoveOutcome {
            success: failure.is_none(),
            phase: run.phase,
            status,
            failure,
            final_position: run.trace.last().copied(),
            trace: run.trace,
            maneuvers: run.maneuvers,
            battles: run.battles,
            iterations: run.iterations,
        }
    }

    fn run_loop(&mut self, env: &mut MoveEnv<'_>, run: &mut Run) -> Result<(), MoveFailure> {
        let cfg = self.config.clone();
        loop {
            if self.flags.is_stopped() {
                return Err(MoveFailure::Stopped);
            }
            if self.flags.is_paused() {
                self.wait_while_paused(env, run)?;
                continue;
            }

            run.iterations += 1;
            let frame = env
                .devices
                .capture
                .screenshot()
                .map_err(|e| MoveFailure::Capture(e.to_string()))?;
            let now = env.devices.clock.now();

            // 1. stuck
            match run.stuck.check() {
                StuckCheck::Moving => {}
                StuckCheck::Stuck { maneuver, attempt } => {
                    run.phase = MovePhase::StuckRecovery;
                    run.maneuvers.push(maneuver);
                    maneuver::perform(
                        env.devices.input,
                        maneuver,
                        secs(cfg.escape_leg_secs),
                        attempt,
                    );
                    run.moving = false;
                    run.timers.last_steer = None;
                    continue;
                }
                StuckCheck::Exhausted => return Err(MoveFailure::StuckEscapeFailed),
            }

            // 2. no battle for too long
            if now.saturating_sub(run.timers.last_battle) >= secs(cfg.battle_timeout_secs) {
                return Err(MoveFailure::BattleTimeout);
            }

            // 3. combat interrupt
            let signals = env.source.signals(&frame);
            let status = env.devices.classifier.battle_status(&frame);
            if status == BattleStatus::InBattle || signals.under_attack {
                info!("Combat interrupt ({:?}, under attack: {})", status, signals.under_attack);
                run.phase = MovePhase::CombatInterrupt;
                self.halt(env, run);
                env.combat.fight(&mut env.devices)?;
                run.battles += 1;
                self.after_combat(env, run);
                continue;
            }

            // 4. enemy locked on
            if signals.enemy_locked {
                debug!("Enemy locked, attacking");
                run.phase = MovePhase::CombatInterrupt;
                self.halt(env, run);
                match env.combat.attack(&mut env.devices)? {
                    AttackOutcome::Fought => {
                        run.battles += 1;
                        self.after_combat(env, run);
                        continue;
                    }
                    AttackOutcome::Missed => {
                        // Nothing was hit; the battle clock keeps running.
                        run.phase = MovePhase::Moving;
                        run.timers.last_steer = None;
                    }
                }
            }

            // 5. position
            let window = self.candidate_window(run, now);
            let fix = env
                .source
                .locate(&frame, &self.map, Some(&window), cfg.run)
                .or_else(|| self.try_next_floor(env, &frame, cfg.run));

            let fix = match fix {
                Some(fix) => fix,
                // 6. no fix
                None => {
                    match run.no_fix.miss() {
                        NoFixAction::Continue => {}
                        NoFixAction::Relocate => {
                            info!("No fix for {} cycles, searching the whole map", run.no_fix.count());
                            if let Some(fix) = env.source.locate(&frame, &self.map, None, cfg.run) {
                                self.accept(run, &fix, now);
                                self.publish(run, now);
                                env.devices.clock.sleep(secs(cfg.tick_secs));
                                continue;
                            }
                        }
                        NoFixAction::StopMoving => {
                            warn!("No fix for {} cycles, stopping", run.no_fix.count());
                            self.halt(env, run);
                        }
                        NoFixAction::Fail => return Err(MoveFailure::PositionLost),
                    }
                    self.publish(run, now);
                    env.devices.clock.sleep(secs(cfg.tick_secs));
                    continue;
                }
            };
            self.accept(run, &fix, now);
            run.phase = MovePhase::Moving;

            // 7. arrival
            if run.position.distance(&self.target) < cfg.arrival_distance {
                info!(
                    "Arrived at ({:.0}, {:.0}) after {} iteration(s)",
                    run.position.x, run.position.y, run.iterations
                );
                if self.stop_afterwards {
                    env.devices.input.stop_moving_forward();
                    run.moving = false;
                }
                return Ok(());
            }

            // 8. steer
            let due = match run.timers.last_steer {
                None => true,
                Some(t) => now.saturating_sub(t) >= secs(cfg.steer_interval_secs),
            };
            if due {
                if let Some(facing) = run.facing {
                    env.devices.input.move_towards(
                        run.position.as_tuple(),
                        self.target.as_tuple(),
                        facing,
                        cfg.run,
                    );
                    run.moving = true;
                    run.timers.last_steer = Some(now);
                } else {
                    debug!("No heading yet, not steering");
                }
            }
            run.stuck.record(now, run.position.x, run.position.y);

            self.publish(run, now);
            env.devices.clock.sleep(secs(cfg.tick_secs));
        }
    }

    /// Candidate window around the last fix, sized by how far the player
    /// can have travelled since.
    fn candidate_window(&self, run: &Run, now: Duration) -> CandidateWindow {
        let elapsed = now.saturating_sub(run.timers.last_fix).as_secs_f64();
        let speed = if self.config.run {
            self.config.run_speed
        } else {
            self.config.walk_speed
        };
        let radius = (elapsed * speed + self.config.window_slack).min(self.config.max_window_radius);
        CandidateWindow::new(run.position, radius)
    }

    /// Try the next floor's map; switch to it on success.
    fn try_next_floor(&mut self, env: &mut MoveEnv<'_>, frame: &image::RgbaImage, running: bool) -> Option<Fix> {
        let next = self.next_map.as_ref()?;
        let fix = env.source.locate(frame, next, None, running)?;
        info!("Now on {} (floor {})", next.region.id, next.region.floor);
        self.map = next.clone();
        self.next_map = None;
        Some(fix)
    }

    fn accept(&self, run: &mut Run, fix: &Fix, now: Duration) {
        run.no_fix.hit();
        run.position = fix.estimate.world;
        if fix.facing.is_some() {
            run.facing = fix.facing;
        }
        run.timers.last_fix = now;
        run.trace.push(fix.estimate.world);
    }

    fn halt(&self, env: &mut MoveEnv<'_>, run: &mut Run) {
        if run.moving {
            env.devices.input.stop_moving_forward();
            run.moving = false;
        }
    }

    fn after_combat(&self, env: &mut MoveEnv<'_>, run: &mut Run) {
        let now = env.devices.clock.now();
        run.timers.last_battle = now;
        // Fights move the player; the old fix and history no longer apply.
        run.timers.last_fix = now;
        run.timers.last_steer = None;
        run.stuck.reset();
        run.phase = MovePhase::Moving;
    }

    fn wait_while_paused(&self, env: &mut MoveEnv<'_>, run: &mut Run) -> Result<(), MoveFailure> {
        self.halt(env, run);
        let paused_at = env.devices.clock.now();
        info!("Paused");
        while self.flags.is_paused() {
            if self.flags.is_stopped() {
                return Err(MoveFailure::Stopped);
            }
            env.devices.clock.sleep(secs(self.config.pause_poll_secs));
        }
        let paused_for = env.devices.clock.now().saturating_sub(paused_at);
        run.timers.shift(paused_for);
        run.stuck.shift(paused_for);
        run.timers.last_steer = None;
        info!("Resumed after {:.1}s", paused_for.as_secs_f64());
        Ok(())
    }

    fn publish(&mut self, run: &Run, now: Duration) {
        let Some(f) = self.snapshot.as_mut() else {
            return;
        };
        let snap = NavSnapshot {
            phase: run.phase,
            region_id: self.map.region.id.clone(),
            position: run.trace.last().map(|p| p.as_tuple()),
            target: self.target.as_tuple(),
            facing: run.facing,
            no_fix_count: run.no_fix.count(),
            escape_attempts: run.stuck.attempts(),
            iterations: run.iterations,
            elapsed_secs: now.saturating_sub(run.timers.started).as_secs_f64(),
        };
        f(&snap);
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::AutoBattle;
    use crate::source::MinimapPositionSource;
    use crate::testing::{blank_frame, FixedClassifier, PausingClock, ScriptedCombat, ScriptedSource};
    use sr_capture::input::InputAction;
    use sr_capture::{DryRunInput, PixelRect, ReplayCapture};
    use sr_state::ManualClock;
    use sr_vision::synthetic;
    use sr_vision::{AnalyzerConfig, EstimatorConfig, HudClassifier, MinimapAnalyzer, PositionEstimator};

    fn test_map() -> Arc<LargeMapInfo> {
        Arc::new(LargeMapInfo::build(
            synthetic::region("walk_f1", 300, 300),
            synthetic::corridor_map(300, 300),
            vec![],
            &AnalyzerConfig::default(),
        ))
    }

    fn stops(input: &DryRunInput) -> usize {
        input.count(|a| matches!(a, InputAction::StopMovingForward))
    }

    struct Rig {
        capture: ReplayCapture,
        input: DryRunInput,
        classifier: FixedClassifier,
        clock: ManualClock,
        combat: ScriptedCombat,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                capture: ReplayCapture::from_frames(vec![blank_frame()]),
                input: DryRunInput::new(),
                classifier: FixedClassifier(BattleStatus::InWorld),
                clock: ManualClock::new(),
                combat: ScriptedCombat::default(),
            }
        }

        fn run(&mut self, controller: &mut MovementController, source: &mut dyn PositionSource) -> MoveOutcome {
            let mut env = MoveEnv {
                devices: Devices {
                    capture: &mut self.capture,
                    input: &mut self.input,
                    classifier: &self.classifier,
                    clock: &self.clock,
                },
                source,
                combat: &mut self.combat,
            };
            controller.execute(&mut env)
        }
    }

    #[test]
    fn test_arrival_stops_once() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| {
            Some(match call.index {
                0 => WorldPoint::new(100.0, 100.0),
                1 => WorldPoint::new(100.0, 130.0),
                _ => WorldPoint::new(100.0, 155.0),
            })
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);

        assert!(out.success, "{}", out.status);
        assert_eq!(out.phase, MovePhase::Arrived);
        assert_eq!(out.iterations, 3);
        assert_eq!(stops(&rig.input), 1);
        assert_eq!(rig.input.actions().last(), Some(&InputAction::StopMovingForward));
        assert_eq!(out.final_position, Some(WorldPoint::new(100.0, 155.0)));
    }

    #[test]
    fn test_arrival_keeps_walking_without_stop() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| {
            Some(if call.index == 0 {
                WorldPoint::new(100.0, 100.0)
            } else {
                WorldPoint::new(100.0, 158.0)
            })
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), false);
        let out = rig.run(&mut c, &mut source);
        assert!(out.success);
        assert_eq!(stops(&rig.input), 0);
    }

    #[test]
    fn test_no_fix_escalation() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| {
            (call.index == 0).then(|| WorldPoint::new(100.0, 100.0))
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 200.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);

        assert!(!out.success);
        assert_eq!(out.failure, Some(MoveFailure::PositionLost));
        assert_eq!(out.status, "无法判断当前人物坐标");
        // One good iteration then ten misses.
        assert_eq!(out.iterations, 11);
        // Stopped on the fifth miss, so the failure path has nothing left
        // to stop.
        assert_eq!(stops(&rig.input), 1);
        // Ten windowed misses plus one full-map search at the third.
        let calls = source.calls();
        assert_eq!(calls.iter().filter(|c| !c.windowed).count(), 1);
        assert_eq!(calls.len(), 12);
    }

    #[test]
    fn test_relocation_recovers() {
        let mut rig = Rig::new();
        // Windowed searches fail after the first fix; the full-map search
        // finds the player somewhere else.
        let mut source = ScriptedSource::new(|call| match (call.index, call.windowed) {
            (0, _) => Some(WorldPoint::new(100.0, 100.0)),
            (_, false) => Some(WorldPoint::new(40.0, 120.0)),
            (i, true) if i > 4 => Some(WorldPoint::new(40.0, 128.0)),
            _ => None,
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(40.0, 130.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);
        assert!(out.success, "{}", out.status);
        assert_eq!(out.trace[1], WorldPoint::new(40.0, 120.0));
    }

    #[test]
    fn test_stuck_rotates_maneuvers_then_fails() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| {
            // Jitter of a couple of pixels, never enough to count as moving.
            let j = (call.index % 3) as f64;
            Some(WorldPoint::new(100.0 + j, 100.0))
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 200.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);

        assert_eq!(out.failure, Some(MoveFailure::StuckEscapeFailed));
        assert_eq!(out.status, "脱困失败");
        assert_eq!(out.maneuvers.len(), 12);
        for (i, m) in out.maneuvers.iter().enumerate() {
            assert_eq!(*m, EscapeManeuver::ROTATION[i % 6]);
        }
        assert!(rig.input.count(|a| matches!(a, InputAction::HoldKeys { .. })) >= 12);
    }

    #[test]
    fn test_single_stuck_verdict() {
        let mut rig = Rig::new();
        // Stuck for the first few seconds, then walks off.
        let mut source = ScriptedSource::new(|call| {
            let y = if call.index < 20 { 100.0 } else { 100.0 + 10.0 * (call.index - 19) as f64 };
            Some(WorldPoint::new(100.0, y))
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 400.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);
        assert!(out.success, "{}", out.status);
        assert_eq!(out.maneuvers, vec![EscapeManeuver::Left]);
    }

    #[test]
    fn test_battle_timeout() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| Some(WorldPoint::new(100.0, 100.0 + 5.0 * call.index as f64)));
        let mut c = MovementController::new(
            test_map(),
            WorldPoint::new(100.0, 1.0e6),
            WorldPoint::new(100.0, 100.0),
            true,
        );
        let out = rig.run(&mut c, &mut source);
        assert_eq!(out.failure, Some(MoveFailure::BattleTimeout));
        assert!(rig.clock.now() >= Duration::from_secs(120));
        assert!(rig.clock.now() < Duration::from_secs(121));
    }

    #[test]
    fn test_combat_interrupt_and_lock() {
        let mut rig = Rig::new();
        let mut source = ScriptedSource::new(|call| Some(WorldPoint::new(100.0, 100.0 + 10.0 * call.index as f64)))
            .with_signals(|i| crate::source::Signals {
                under_attack: i == 2,
                enemy_locked: i == 4,
            });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 140.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);

        assert!(out.success, "{}", out.status);
        assert_eq!(rig.combat.fights, 1);
        assert_eq!(rig.combat.attacks, 1);
        assert_eq!(out.battles, 2);
        // Stopped for the fight, for the attack, and on arrival.
        assert_eq!(stops(&rig.input), 3);
    }

    #[test]
    fn test_missed_attacks_do_not_hold_off_timeout() {
        let mut rig = Rig::new();
        rig.combat.miss_attacks = true;
        let mut source = ScriptedSource::new(|call| Some(WorldPoint::new(100.0, 100.0 + 5.0 * call.index as f64)))
            .with_signals(|_| crate::source::Signals {
                under_attack: false,
                enemy_locked: true,
            });
        let mut c = MovementController::new(
            test_map(),
            WorldPoint::new(100.0, 1.0e6),
            WorldPoint::new(100.0, 100.0),
            true,
        );
        let out = rig.run(&mut c, &mut source);

        assert_eq!(out.failure, Some(MoveFailure::BattleTimeout));
        assert_eq!(out.battles, 0);
        assert!(rig.combat.attacks > 0);
        // Positioning still ran between the missed attacks.
        assert!(!source.calls().is_empty());
        assert!(rig.clock.now() >= Duration::from_secs(120));
        assert!(rig.clock.now() < Duration::from_secs(121));
    }

    #[test]
    fn test_battle_screen_interrupts() {
        let mut rig = Rig::new();
        rig.classifier = FixedClassifier(BattleStatus::InBattle);
        rig.combat.fail_fights = true;
        let mut source = ScriptedSource::new(|_| Some(WorldPoint::new(100.0, 100.0)));
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true);
        let out = rig.run(&mut c, &mut source);
        assert_eq!(out.failure, Some(MoveFailure::BattleStuck));
        assert_eq!(rig.combat.fights, 1);
        assert!(source.calls().is_empty());
    }

    #[test]
    fn test_stop_flag() {
        let mut rig = Rig::new();
        let flags = ControlFlags::new();
        flags.stop();
        let mut source = ScriptedSource::new(|_| Some(WorldPoint::new(100.0, 100.0)));
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true)
            .with_flags(flags);
        let out = rig.run(&mut c, &mut source);
        assert_eq!(out.failure, Some(MoveFailure::Stopped));
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn test_pause_shifts_timers() {
        let flags = ControlFlags::new();
        let clock = PausingClock::new(flags.clone(), Duration::from_millis(100), Duration::from_secs(200));
        let mut capture = ReplayCapture::from_frames(vec![blank_frame()]);
        let mut input = DryRunInput::new();
        let classifier = FixedClassifier(BattleStatus::InWorld);
        let mut combat = ScriptedCombat::default();
        let mut source = ScriptedSource::new(|call| {
            Some(match call.index {
                0 => WorldPoint::new(100.0, 100.0),
                1 => WorldPoint::new(100.0, 130.0),
                _ => WorldPoint::new(100.0, 160.0),
            })
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true)
            .with_config(MoveConfig {
                run: false,
                ..MoveConfig::default()
            })
            .with_flags(flags);
        let mut env = MoveEnv {
            devices: Devices {
                capture: &mut capture,
                input: &mut input,
                classifier: &classifier,
                clock: &clock,
            },
            source: &mut source,
            combat: &mut combat,
        };
        let out = c.execute(&mut env);

        // 200s of pause would trip the 120s timeout without the shift.
        assert!(out.success, "{}", out.status);
        assert!(clock.now() >= Duration::from_secs(200));
        // Stopped on pause and on arrival.
        assert_eq!(stops(&input), 2);
        // Steering resumed after the pause.
        assert_eq!(
            input.count(|a| matches!(a, InputAction::StartMovingForward { .. })),
            2
        );
        // The window after the pause is sized from the shifted fix time.
        let calls = source.calls();
        assert!(calls[1].radius < 40.0, "radius {}", calls[1].radius);
    }

    #[test]
    fn test_floor_change_switches_map() {
        let mut rig = Rig::new();
        let upper = Arc::new(LargeMapInfo::build(
            sr_data::Region {
                floor: 2,
                ..synthetic::region("walk_f2", 300, 300)
            },
            synthetic::corridor_map(300, 300),
            vec![],
            &AnalyzerConfig::default(),
        ));
        let mut source = ScriptedSource::new(|call| match (call.index, call.region_id.as_str()) {
            (0, _) => Some(WorldPoint::new(100.0, 100.0)),
            (_, "walk_f2") => Some(WorldPoint::new(100.0, 165.0)),
            _ => None,
        });
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true)
            .with_next_map(upper);
        let out = rig.run(&mut c, &mut source);
        assert!(out.success, "{}", out.status);
        assert_eq!(c.map().region.id, "walk_f2");
        assert_eq!(out.iterations, 2);
    }

    #[test]
    fn test_snapshots_published() {
        let mut rig = Rig::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut source = ScriptedSource::new(|call| Some(WorldPoint::new(100.0, 100.0 + 30.0 * call.index as f64)));
        let mut c = MovementController::new(test_map(), WorldPoint::new(100.0, 160.0), WorldPoint::new(100.0, 100.0), true)
            .on_snapshot(move |s| sink.lock().unwrap().push(s.phase));
        let out = rig.run(&mut c, &mut source);
        assert!(out.success);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.last(), Some(&MovePhase::Arrived));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_straight_walk_from_minimaps() {
        let raw = synthetic::corridor_map(300, 300);
        let frames: Vec<_> = [100.0, 120.0, 140.0, 160.0, 160.0]
            .iter()
            .map(|y| synthetic::minimap_frame(&raw, WorldPoint::new(100.0, *y), 90.0))
            .collect();
        let analyzer_config = AnalyzerConfig {
            minimap_rect: PixelRect::new(0, 0, synthetic::MINIMAP_SIZE, synthetic::MINIMAP_SIZE),
            ..AnalyzerConfig::default()
        };
        let mut source = MinimapPositionSource::new(
            MinimapAnalyzer::new(analyzer_config.clone()),
            PositionEstimator::new(EstimatorConfig::default()),
        );
        let classifier = HudClassifier::new(analyzer_config);
        let mut capture = ReplayCapture::from_frames(frames);
        let mut input = DryRunInput::new();
        let clock = ManualClock::new();
        let mut combat = AutoBattle::default();

        let target = WorldPoint::new(100.0, 160.0);
        let mut c = MovementController::new(test_map(), target, WorldPoint::new(100.0, 100.0), true).with_config(MoveConfig {
            run: false,
            ..MoveConfig::default()
        });
        let mut env = MoveEnv {
            devices: Devices {
                capture: &mut capture,
                input: &mut input,
                classifier: &classifier,
                clock: &clock,
            },
            source: &mut source,
            combat: &mut combat,
        };
        let out = c.execute(&mut env);

        assert!(out.success, "{}", out.status);
        assert!(out.iterations <= 5, "took {} iterations", out.iterations);
        let dists: Vec<f64> = out.trace.iter().map(|p| p.distance(&target)).collect();
        for w in dists.windows(2) {
            assert!(w[1] <= w[0] + 1.0, "progress went backwards: {:?}", dists);
        }
        assert_eq!(stops(&input), 1);
        // Facing down the corridor already; no big turn was needed.
        assert_eq!(input.count(|a| matches!(a, InputAction::Turn { degrees } if degrees.abs() > 10.0)), 0);
    }
}
