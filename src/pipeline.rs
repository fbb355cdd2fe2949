use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sr_capture::{Capture, GameInput};
use sr_data::{AtlasStore, Route};
use sr_move::{AutoBattle, ControlFlags, Devices, MinimapPositionSource, MoveEnv, RouteReport, RouteRunner};
use sr_state::{NavSnapshot, SystemClock};
use sr_vision::{BriefMatcher, HudClassifier, LargeMapCache, MinimapAnalyzer, PositionEstimator};

use crate::config::Settings;

/// What the route worker is doing, published on a watch channel.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Preheating {
        regions: Vec<String>,
    },
    Running {
        route: String,
        attempt: u32,
        nav: Option<NavSnapshot>,
    },
    Paused,
    Finished {
        report: RouteReport,
    },
    Failed {
        reason: String,
    },
}

/// Devices handed to the worker thread.
pub struct DeviceSet {
    pub capture: Box<dyn Capture + Send>,
    pub input: Box<dyn GameInput + Send>,
}

/// Runs one route on a blocking worker: preheat maps, then walk the route
/// with retries.
pub struct Pipeline {
    flags: ControlFlags,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
    status_rx: watch::Receiver<PipelineStatus>,
    worker: JoinHandle<Result<Vec<RouteReport>>>,
}

impl Pipeline {
    /// Load every region the route touches, each on its own blocking task.
    pub async fn preheat(
        atlas: Arc<dyn AtlasStore>,
        maps: Arc<LargeMapCache>,
        settings: &Settings,
        region_ids: Vec<String>,
    ) -> Result<()> {
        let mut tasks = Vec::new();
        for id in region_ids {
            let atlas = atlas.clone();
            let maps = maps.clone();
            let config = settings.analyzer.clone();
            let features = settings.use_features;
            tasks.push(tokio::task::spawn_blocking(move || {
                maps.get_or_load(&id, || {
                    let matcher = BriefMatcher::default();
                    let matcher = features.then_some(&matcher as &dyn sr_vision::FeatureMatcher);
                    sr_vision::LargeMapInfo::load(atlas.as_ref(), &id, &config, matcher)
                })
                .map(|_| ())
            }));
        }
        for task in tasks {
            task.await.context("preheat task panicked")??;
        }
        Ok(())
    }

    /// Start the route. Must be called inside a tokio runtime.
    pub fn start_route(settings: Settings, atlas: Arc<dyn AtlasStore>, route: Route, devices: DeviceSet) -> Self {
        let flags = ControlFlags::new();
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Idle);
        let status_tx = Arc::new(status_tx);
        let maps = Arc::new(LargeMapCache::new(settings.map_cache_size));

        let worker_flags = flags.clone();
        let worker_tx = status_tx.clone();
        let worker = tokio::spawn(async move {
            let regions = route.region_ids(atlas.as_ref());
            worker_tx.send_replace(PipelineStatus::Preheating {
                regions: regions.clone(),
            });
            if let Err(e) = Self::preheat(atlas.clone(), maps.clone(), &settings, regions).await {
                warn!("Preheat failed: {:#}", e);
                worker_tx.send_replace(PipelineStatus::Failed {
                    reason: format!("{:#}", e),
                });
                return Err(e);
            }

            let tx = worker_tx.clone();
            let result = tokio::task::spawn_blocking(move || {
                run_route_blocking(&settings, atlas.as_ref(), &maps, &route, devices, worker_flags, tx)
            })
            .await
            .context("route worker panicked")?;

            match &result {
                Ok(reports) => match reports.last() {
                    Some(report) if report.success => {
                        worker_tx.send_replace(PipelineStatus::Finished {
                            report: report.clone(),
                        });
                    }
                    Some(report) => {
                        worker_tx.send_replace(PipelineStatus::Failed {
                            reason: report.failure.clone().unwrap_or_default(),
                        });
                    }
                    None => {}
                },
                Err(e) => {
                    worker_tx.send_replace(PipelineStatus::Failed {
                        reason: format!("{:#}", e),
                    });
                }
            }
            result
        });

        info!("Pipeline started");
        Self {
            flags,
            status_tx,
            status_rx,
            worker,
        }
    }

    pub fn pause(&self) {
        self.flags.pause();
        self.status_tx.send_replace(PipelineStatus::Paused);
        info!("Pipeline pause requested");
    }

    pub fn resume(&self) {
        self.flags.resume();
        info!("Pipeline resume requested");
    }

    pub fn stop(&self) {
        self.flags.stop();
        info!("Pipeline stop requested");
    }

    pub fn status(&self) -> PipelineStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker. Returns one report per attempt.
    pub async fn join(self) -> Result<Vec<RouteReport>> {
        self.worker.await.context("pipeline worker panicked")?
    }
}

fn run_route_blocking(
    settings: &Settings,
    atlas: &dyn AtlasStore,
    maps: &LargeMapCache,
    route: &Route,
    mut devices: DeviceSet,
    flags: ControlFlags,
    status: Arc<watch::Sender<PipelineStatus>>,
) -> Result<Vec<RouteReport>> {
    let mut analyzer = MinimapAnalyzer::new(settings.analyzer.clone());
    if settings.use_features {
        analyzer = analyzer.with_feature_matcher(Box::new(BriefMatcher::default()));
    }
    let mut source = MinimapPositionSource::new(analyzer, PositionEstimator::new(settings.estimator.clone()));
    let classifier = HudClassifier::new(settings.analyzer.clone());
    let clock = SystemClock::new();
    let mut combat = AutoBattle::new(settings.battle.clone());

    let mut reports = Vec::new();
    let attempts = settings.max_route_attempts.max(1);
    for attempt in 1..=attempts {
        status.send_replace(PipelineStatus::Running {
            route: route.name.clone(),
            attempt,
            nav: None,
        });
        let sink = status.clone();
        let name = route.name.clone();
        let runner = RouteRunner::new(atlas, maps)
            .with_analyzer_config(settings.analyzer.clone())
            .with_move_config(settings.movement.clone())
            .with_features(settings.use_features)
            .with_flags(flags.clone())
            .on_snapshot(move |snap| {
                sink.send_replace(PipelineStatus::Running {
                    route: name.clone(),
                    attempt,
                    nav: Some(snap.clone()),
                });
            });

        let mut env = MoveEnv {
            devices: Devices {
                capture: devices.capture.as_mut(),
                input: devices.input.as_mut(),
                classifier: &classifier,
                clock: &clock,
            },
            source: &mut source,
            combat: &mut combat,
        };
        let report = runner.run(route, &mut env)?;
        let done = report.success || flags.is_stopped();
        if !report.success {
            warn!(
                "Route {} attempt {}/{} failed: {}",
                route.name,
                attempt,
                attempts,
                report.failure.as_deref().unwrap_or("unknown")
            );
        }
        reports.push(report);
        if done {
            break;
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_capture::{DryRunInput, ReplayCapture};
    use sr_data::{MemoryAtlas, RouteOp, SpecialPoint, SpecialPointKind};
    use sr_vision::synthetic;
    use sr_vision::WorldPoint;

    fn world() -> (Arc<dyn AtlasStore>, Route, Vec<image::RgbaImage>) {
        let raw = synthetic::corridor_map(300, 300);
        let mut atlas = MemoryAtlas::new();
        atlas.add_region(synthetic::region("walk_f1", 300, 300), raw.clone());
        atlas.add_point(SpecialPoint {
            id: "tp".into(),
            region_id: "walk_f1".into(),
            template_id: "transport".into(),
            name: "Anchor".into(),
            kind: SpecialPointKind::Transport,
            x: 100.0,
            y: 100.0,
        });
        let route = Route {
            name: "corridor".into(),
            region_id: "walk_f1".into(),
            start: "tp".into(),
            ops: vec![
                RouteOp::Move {
                    x: 100.0,
                    y: 140.0,
                    floor: None,
                },
                RouteOp::MarkVisited,
            ],
        };
        let frames = [100.0, 120.0, 140.0]
            .iter()
            .map(|y| synthetic::minimap_frame(&raw, WorldPoint::new(100.0, *y), 90.0))
            .collect();
        (Arc::new(atlas), route, frames)
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.analyzer.minimap_rect = sr_capture::PixelRect::new(0, 0, synthetic::MINIMAP_SIZE, synthetic::MINIMAP_SIZE);
        s.movement.run = false;
        s.movement.tick_secs = 0.0;
        s
    }

    #[tokio::test]
    async fn test_preheat_fills_cache() {
        let (atlas, _, _) = world();
        let maps = Arc::new(LargeMapCache::new(4));
        Pipeline::preheat(atlas, maps.clone(), &settings(), vec!["walk_f1".into()])
            .await
            .unwrap();
        assert_eq!(maps.len(), 1);
    }

    #[tokio::test]
    async fn test_preheat_unknown_region_fails() {
        let (atlas, _, _) = world();
        let maps = Arc::new(LargeMapCache::new(4));
        let res = Pipeline::preheat(atlas, maps, &settings(), vec!["nowhere".into()]).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_route_runs_on_replay() {
        let (atlas, route, frames) = world();
        let devices = DeviceSet {
            capture: Box::new(ReplayCapture::from_frames(frames)),
            input: Box::new(DryRunInput::new()),
        };
        let pipeline = Pipeline::start_route(settings(), atlas, route, devices);
        let mut rx = pipeline.subscribe();
        let reports = pipeline.join().await.unwrap();

        assert_eq!(reports.len(), 1);
        assert!(reports[0].success, "{:?}", reports[0].failure);
        assert!(reports[0].visited);
        assert!(matches!(*rx.borrow_and_update(), PipelineStatus::Finished { .. }));
    }

    #[tokio::test]
    async fn test_stopped_route_is_not_retried() {
        let (atlas, route, frames) = world();
        let devices = DeviceSet {
            capture: Box::new(ReplayCapture::from_frames(frames)),
            input: Box::new(DryRunInput::new()),
        };
        let mut s = settings();
        s.max_route_attempts = 3;
        let pipeline = Pipeline::start_route(s, atlas, route, devices);
        pipeline.stop();
        let reports = pipeline.join().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].failure.as_deref(), Some("已停止"));
    }
}
