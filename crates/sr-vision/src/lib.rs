pub mod estimator;
pub mod features;
pub mod geometry;
pub mod large_map;
pub mod masks;
pub mod matching;
pub mod minimap;
pub mod screen;

#[cfg(any(test, feature = "test-support"))]
pub mod synthetic;

pub use estimator::{
    EstimatorConfig, PositionEstimate, PositionEstimator, PositionStrategy, StrategyKind,
};
pub use features::{BriefMatcher, FeatureMatch, FeatureMatcher, FeatureSet};
pub use geometry::{
    angle_difference, normalize_degrees, CandidateWindow, MinimapPoint, Rect, WorldPoint,
};
pub use large_map::{LandmarkOnMap, LargeMapCache, LargeMapInfo};
pub use matching::{MatchResult, MatchResultList, NccMatcher, TemplateMatcher};
pub use minimap::{AnalyzerConfig, FacingMethod, MiniMapInfo, MinimapAnalyzer};
pub use screen::{BattleStatus, HudClassifier, ScreenClassifier};
