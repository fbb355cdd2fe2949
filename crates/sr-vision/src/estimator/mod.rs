//! Player position on the large map from one analysed minimap.
//!
//! Strategies are tried in a fixed order and the first one that produces an
//! estimate wins. Confidence scales differ between strategies and are never
//! compared against each other.

mod feature;
mod landmark;
mod template;

pub use feature::FeatureStrategy;
pub use landmark::LandmarkStrategy;
pub use template::{TemplateSource, TemplateStrategy};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::{CandidateWindow, Rect, WorldPoint};
use crate::large_map::LargeMapInfo;
use crate::minimap::MiniMapInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Landmark,
    Feature,
    Road,
    RoadEdge,
    Edge,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Landmark => "landmark",
            StrategyKind::Feature => "feature",
            StrategyKind::Road => "road",
            StrategyKind::RoadEdge => "road+edge",
            StrategyKind::Edge => "edge",
        };
        f.write_str(name)
    }
}

/// Where the minimap centre lies on the large map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    /// On the producing strategy's own scale.
    pub confidence: f64,
    pub world: WorldPoint,
    /// Minimap footprint on the large map.
    pub effective_width: f64,
    pub effective_height: f64,
    /// Large-map pixels per minimap pixel.
    pub scale: f64,
    pub strategy: StrategyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub strategies: Vec<StrategyKind>,
    pub landmark_cluster_radius: f64,
    pub feature_min_matches: usize,
    pub road_threshold: f64,
    pub road_edge_threshold: f64,
    pub edge_threshold: f64,
    /// A template score at or above this stops the scale scan.
    pub early_accept: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub scale_step: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                StrategyKind::Landmark,
                StrategyKind::Feature,
                StrategyKind::Road,
                StrategyKind::RoadEdge,
                StrategyKind::Edge,
            ],
            landmark_cluster_radius: 10.0,
            feature_min_matches: 4,
            road_threshold: 0.4,
            road_edge_threshold: 0.5,
            edge_threshold: 0.3,
            early_accept: 0.8,
            min_scale: 1.0,
            max_scale: 1.25,
            scale_step: 0.05,
        }
    }
}

impl EstimatorConfig {
    /// Scales to try, largest first when running (the minimap zooms out
    /// while sprinting).
    pub fn scale_bank(&self, running: bool) -> Vec<f64> {
        let step = if self.scale_step > 0.0 { self.scale_step } else { 0.05 };
        let n = ((self.max_scale - self.min_scale) / step + 1e-6).floor().max(0.0) as usize;
        let mut scales: Vec<f64> = (0..=n).map(|i| self.min_scale + i as f64 * step).collect();
        if running {
            scales.reverse();
        }
        scales
    }
}

pub trait PositionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn try_estimate(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        rect: Option<Rect>,
        running: bool,
    ) -> Option<PositionEstimate>;
}

pub struct PositionEstimator {
    config: EstimatorConfig,
    strategies: Vec<Box<dyn PositionStrategy>>,
}

impl PositionEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let strategies = config
            .strategies
            .iter()
            .map(|kind| -> Box<dyn PositionStrategy> {
                match kind {
                    StrategyKind::Landmark => Box::new(LandmarkStrategy::new(config.landmark_cluster_radius)),
                    StrategyKind::Feature => Box::new(FeatureStrategy::new(config.feature_min_matches)),
                    StrategyKind::Road | StrategyKind::RoadEdge | StrategyKind::Edge => {
                        Box::new(TemplateStrategy::from_config(*kind, &config))
                    }
                }
            })
            .collect();
        Self { config, strategies }
    }

    pub fn with_strategies(config: EstimatorConfig, strategies: Vec<Box<dyn PositionStrategy>>) -> Self {
        Self { config, strategies }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// First estimate any strategy produces, searching only `rect` if given.
    pub fn estimate(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        rect: Option<Rect>,
        running: bool,
    ) -> Option<PositionEstimate> {
        for strategy in &self.strategies {
            if let Some(est) = strategy.try_estimate(minimap, map, rect, running) {
                debug!(
                    "{} fix at ({:.1}, {:.1}) conf {:.3} scale {:.2}",
                    est.strategy, est.world.x, est.world.y, est.confidence, est.scale
                );
                return Some(est);
            }
        }
        None
    }

    /// Search rect for a candidate window: the window padded by the largest
    /// minimap footprint, clamped to the map.
    pub fn search_rect(&self, minimap: &MiniMapInfo, map: &LargeMapInfo, candidate: &CandidateWindow) -> Option<Rect> {
        let half = minimap.width().max(minimap.height()) as f64 / 2.0 * self.config.max_scale;
        candidate.to_rect(half, map.width(), map.height())
    }

    /// Locate the player. With a candidate window only the area it allows is
    /// searched; `retry_without_rect` then falls back to the whole map.
    pub fn cal_character_pos(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        candidate: Option<&CandidateWindow>,
        running: bool,
        retry_without_rect: bool,
    ) -> Option<PositionEstimate> {
        let rect = candidate.and_then(|c| self.search_rect(minimap, map, c));
        if candidate.is_some() && rect.is_none() {
            debug!("candidate window lies outside map {}", map.region.id);
        }

        if rect.is_some() || candidate.is_none() {
            if let Some(est) = self.estimate(minimap, map, rect, running) {
                return Some(est);
            }
        }

        if candidate.is_some() && retry_without_rect {
            info!("No fix inside candidate window, searching all of {}", map.region.id);
            return self.estimate(minimap, map, None, running);
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::minimap::{AnalyzerConfig, MinimapAnalyzer};
    use crate::synthetic;
    use sr_capture::PixelRect;

    pub(crate) fn analyzer() -> MinimapAnalyzer {
        MinimapAnalyzer::new(AnalyzerConfig {
            minimap_rect: PixelRect::new(0, 0, synthetic::MINIMAP_SIZE, synthetic::MINIMAP_SIZE),
            ..AnalyzerConfig::default()
        })
    }

    pub(crate) fn corridor_map() -> LargeMapInfo {
        LargeMapInfo::build(
            synthetic::region("test_f1", 300, 300),
            synthetic::corridor_map(300, 300),
            vec![],
            &AnalyzerConfig::default(),
        )
    }

    #[test]
    fn test_scale_bank_order() {
        let c = EstimatorConfig::default();
        let walk = c.scale_bank(false);
        assert_eq!(walk.len(), 6);
        assert!((walk[0] - 1.0).abs() < 1e-9);
        assert!((walk[5] - 1.25).abs() < 1e-9);
        let run = c.scale_bank(true);
        assert!((run[0] - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_locate_on_corridor_map() {
        let map = corridor_map();
        let analyzer = analyzer();
        let estimator = PositionEstimator::new(EstimatorConfig::default());
        let truth = WorldPoint::new(100.0, 130.0);
        let frame = synthetic::minimap_frame(&map.origin, truth, 90.0);
        let mm = analyzer.analyze(&frame, &[], false);

        let est = estimator
            .cal_character_pos(&mm, &map, None, false, false)
            .expect("position should be found");
        assert_eq!(est.strategy, StrategyKind::Road);
        assert!(est.world.distance(&truth) <= 3.0, "got {:?}", est.world);
    }

    #[test]
    fn test_rect_result_matches_full_search() {
        let map = corridor_map();
        let analyzer = analyzer();
        let estimator = PositionEstimator::new(EstimatorConfig::default());
        let truth = WorldPoint::new(100.0, 160.0);
        let mm = analyzer.analyze(&synthetic::minimap_frame(&map.origin, truth, 90.0), &[], false);

        let full = estimator.cal_character_pos(&mm, &map, None, false, false).unwrap();
        let window = CandidateWindow::new(truth, 15.0);
        let narrow = estimator
            .cal_character_pos(&mm, &map, Some(&window), false, false)
            .unwrap();
        let wider = estimator
            .cal_character_pos(&mm, &map, Some(&CandidateWindow::new(truth, 60.0)), false, false)
            .unwrap();
        assert!(narrow.world.distance(&full.world) <= 1.0);
        assert!(wider.world.distance(&full.world) <= 1.0);
    }

    #[test]
    fn test_wrong_window_needs_retry() {
        let map = corridor_map();
        let analyzer = analyzer();
        let estimator = PositionEstimator::new(EstimatorConfig {
            strategies: vec![StrategyKind::Road],
            ..EstimatorConfig::default()
        });
        let truth = WorldPoint::new(100.0, 100.0);
        let mm = analyzer.analyze(&synthetic::minimap_frame(&map.origin, truth, 0.0), &[], false);
        // The bottom-right corner of the map has no road at all.
        let far = CandidateWindow::new(WorldPoint::new(265.0, 265.0), 5.0);

        assert!(estimator.cal_character_pos(&mm, &map, Some(&far), false, false).is_none());
        let est = estimator
            .cal_character_pos(&mm, &map, Some(&far), false, true)
            .expect("full-map retry finds it");
        assert!(est.world.distance(&truth) <= 3.0);
    }

    #[test]
    fn test_blank_minimap_gives_none() {
        let map = corridor_map();
        let analyzer = analyzer();
        let estimator = PositionEstimator::new(EstimatorConfig::default());
        let blank = image::RgbaImage::from_pixel(
            synthetic::MINIMAP_SIZE,
            synthetic::MINIMAP_SIZE,
            image::Rgba([0, 0, 0, 255]),
        );
        let mm = analyzer.analyze(&blank, &[], false);
        assert!(estimator.cal_character_pos(&mm, &map, None, false, true).is_none());
    }
}
