//! Runs a whole [`Route`] op by op.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use sr_capture::{regions, InteractKind};
use sr_data::{AtlasStore, Route, RouteOp, WaitKind};
use sr_state::NavSnapshot;
use sr_vision::{AnalyzerConfig, BriefMatcher, LargeMapCache, LargeMapInfo, WorldPoint};

use crate::battle::AttackOutcome;
use crate::controller::{ControlFlags, MoveConfig, MoveEnv, MoveFailure, MoveOutcome, MovementController};

/// What happened on one route run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReport {
    pub route: String,
    pub success: bool,
    /// Ops finished before the run ended.
    pub completed_ops: usize,
    pub moves: Vec<MoveOutcome>,
    pub battles: usize,
    pub visited: bool,
    pub final_region: String,
    pub final_position: WorldPoint,
    pub failure: Option<String>,
}

type SnapshotSink = Arc<dyn Fn(&NavSnapshot) + Send + Sync>;

pub struct RouteRunner<'r> {
    atlas: &'r dyn AtlasStore,
    maps: &'r LargeMapCache,
    analyzer_config: AnalyzerConfig,
    move_config: MoveConfig,
    /// Describe large maps with BRIEF features when loading them.
    features: bool,
    poll: Duration,
    flags: ControlFlags,
    snapshot: Option<SnapshotSink>,
}

impl<'r> RouteRunner<'r> {
    pub fn new(atlas: &'r dyn AtlasStore, maps: &'r LargeMapCache) -> Self {
        Self {
            atlas,
            maps,
            analyzer_config: AnalyzerConfig::default(),
            move_config: MoveConfig::default(),
            features: false,
            poll: Duration::from_millis(500),
            flags: ControlFlags::default(),
            snapshot: None,
        }
    }

    pub fn with_analyzer_config(mut self, config: AnalyzerConfig) -> Self {
        self.analyzer_config = config;
        self
    }

    pub fn with_move_config(mut self, config: MoveConfig) -> Self {
        self.move_config = config;
        self
    }

    pub fn with_features(mut self, enabled: bool) -> Self {
        self.features = enabled;
        self
    }

    pub fn with_flags(mut self, flags: ControlFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&NavSnapshot) + Send + Sync + 'static) -> Self {
        self.snapshot = Some(Arc::new(f));
        self
    }

    /// Prepared large map of `region_id`, from the cache when possible.
    pub fn load_map(&self, region_id: &str) -> Result<Arc<LargeMapInfo>> {
        self.maps.get_or_load(region_id, || {
            let matcher = BriefMatcher::default();
            let matcher = self.features.then_some(&matcher as &dyn sr_vision::FeatureMatcher);
            LargeMapInfo::load(self.atlas, region_id, &self.analyzer_config, matcher)
        })
    }

    /// Run `route`. Errors are reserved for routes that cannot start
    /// (invalid route, missing assets); failures along the way end up in the
    /// report.
    pub fn run(&self, route: &Route, env: &mut MoveEnv<'_>) -> Result<RouteReport> {
        route
            .validate(self.atlas)
            .with_context(|| format!("Route {} is invalid", route.name))?;
        let start = self
            .atlas
            .special_point(&route.start)
            .with_context(|| format!("Unknown start point {}", route.start))?;

        let mut map = self.load_map(&route.region_id)?;
        env.source.prepare(self.atlas, &map);

        let mut report = RouteReport {
            route: route.name.clone(),
            success: false,
            completed_ops: 0,
            moves: Vec::new(),
            battles: 0,
            visited: false,
            final_region: map.region.id.clone(),
            final_position: WorldPoint::new(start.x, start.y),
            failure: None,
        };
        info!("Route {} starts at {} on {}", route.name, start.name, map.region.id);

        for (index, op) in route.ops.iter().enumerate() {
            if self.flags.is_stopped() {
                report.failure = Some(MoveFailure::Stopped.to_string());
                return Ok(report);
            }
            let step = match op {
                RouteOp::Move { x, y, floor } => {
                    let next_is_move = matches!(route.ops.get(index + 1), Some(RouteOp::Move { .. }));
                    self.run_move(env, &mut map, &mut report, WorldPoint::new(*x, *y), *floor, !next_is_move)
                }
                RouteOp::Patrol => match env.combat.attack(&mut env.devices) {
                    Ok(AttackOutcome::Fought) => {
                        report.battles += 1;
                        Ok(())
                    }
                    Ok(AttackOutcome::Missed) => Ok(()),
                    Err(e) => Err(e.to_string()),
                },
                RouteOp::Interact { text } => {
                    info!("Interact: {}", text);
                    env.devices
                        .input
                        .interact(regions::INTERACT_PROMPT.center(), InteractKind::Key);
                    Ok(())
                }
                RouteOp::Wait { kind, timeout_secs } => self.wait(env, *kind, *timeout_secs),
                RouteOp::MarkVisited => {
                    report.visited = true;
                    Ok(())
                }
            };
            if let Err(reason) = step {
                warn!("Route {} failed at op #{}: {}", route.name, index, reason);
                report.failure = Some(reason);
                return Ok(report);
            }
            report.completed_ops += 1;
        }

        report.success = true;
        info!(
            "Route {} done: {} move(s), {} battle(s)",
            route.name,
            report.moves.len(),
            report.battles
        );
        Ok(report)
    }

    fn run_move(
        &self,
        env: &mut MoveEnv<'_>,
        map: &mut Arc<LargeMapInfo>,
        report: &mut RouteReport,
        target: WorldPoint,
        floor: Option<i32>,
        stop_afterwards: bool,
    ) -> Result<(), String> {
        // Load the other floor before walking so a lost fix can switch over
        // without stalling.
        let next_map = match floor {
            Some(f) if f != map.region.floor => {
                let region = self
                    .atlas
                    .region_on_floor(&map.region, f)
                    .ok_or_else(|| format!("No floor {} next to {}", f, map.region.id))?;
                let next = self.load_map(&region.id).map_err(|e| format!("{:#}", e))?;
                env.source.prepare(self.atlas, &next);
                Some(next)
            }
            _ => None,
        };

        let mut controller = MovementController::new(map.clone(), target, report.final_position, stop_afterwards)
            .with_config(self.move_config.clone())
            .with_flags(self.flags.clone());
        if let Some(next) = &next_map {
            controller = controller.with_next_map(next.clone());
        }
        if let Some(sink) = &self.snapshot {
            let sink = sink.clone();
            controller = controller.on_snapshot(move |s| sink(s));
        }

        let outcome = controller.execute(env);
        // The move was meant to end on the other floor even if the old map
        // kept matching up to the stairs.
        *map = match next_map {
            Some(next) => next,
            None => controller.map().clone(),
        };
        report.final_region = map.region.id.clone();
        if let Some(p) = outcome.final_position {
            report.final_position = p;
        }
        report.battles += outcome.battles;
        let result = if outcome.success {
            Ok(())
        } else {
            Err(outcome.status.clone())
        };
        report.moves.push(outcome);
        result
    }

    fn wait(&self, env: &mut MoveEnv<'_>, kind: WaitKind, timeout_secs: f64) -> Result<(), String> {
        let timeout = Duration::from_secs_f64(timeout_secs.max(0.0));
        let devices = &mut env.devices;
        match kind {
            WaitKind::Seconds => {
                devices.clock.sleep(timeout);
                Ok(())
            }
            WaitKind::InWorld => {
                let deadline = devices.clock.now() + timeout;
                loop {
                    let frame = devices.capture.screenshot().map_err(|e| format!("{:#}", e))?;
                    if devices.classifier.is_normal_in_world(&frame) {
                        return Ok(());
                    }
                    if devices.clock.now() >= deadline {
                        return Err(format!("等待超时 ({:.0}s)", timeout_secs));
                    }
                    devices.clock.sleep(self.poll);
                }
            }
        }
    }
}
