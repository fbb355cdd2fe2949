use super::{PositionEstimate, PositionStrategy, StrategyKind};
use crate::features::{BriefMatcher, FeatureMatcher};
use crate::geometry::{Rect, WorldPoint};
use crate::large_map::LargeMapInfo;
use crate::masks;
use crate::minimap::MiniMapInfo;
use tracing::debug;

/// Match minimap keypoints against the large map's keypoints.
pub struct FeatureStrategy {
    min_matches: usize,
    matcher: Box<dyn FeatureMatcher>,
}

impl FeatureStrategy {
    pub fn new(min_matches: usize) -> Self {
        Self {
            min_matches,
            matcher: Box::new(BriefMatcher::default()),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn FeatureMatcher>) -> Self {
        self.matcher = matcher;
        self
    }
}

impl PositionStrategy for FeatureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Feature
    }

    fn try_estimate(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        rect: Option<Rect>,
        _running: bool,
    ) -> Option<PositionEstimate> {
        let map_features = map.features.as_ref()?;
        let source = match rect {
            Some(r) => map_features.filter(|k| r.contains(&WorldPoint::new(k.x as f64, k.y as f64))),
            None => map_features.clone(),
        };

        // The arrow is not part of the map.
        let usable = masks::subtract(&minimap.circle_mask, &minimap.arrow_mask);
        let template = self.matcher.detect_and_describe(&minimap.gray, Some(&usable));
        let m = self.matcher.match_features(&source, &template)?;
        if m.inliers < self.min_matches {
            debug!("feature match has {} inliers, need {}", m.inliers, self.min_matches);
            return None;
        }

        let center = minimap.center();
        let (x, y) = m.map_point(center.x, center.y);
        Some(PositionEstimate {
            confidence: m.inliers as f64,
            world: WorldPoint::new(x, y),
            effective_width: minimap.width() as f64 * m.scale,
            effective_height: minimap.height() as f64 * m.scale,
            scale: m.scale,
            strategy: StrategyKind::Feature,
        })
    }
}
