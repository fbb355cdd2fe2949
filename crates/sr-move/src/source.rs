//! Where the controller gets its per-frame readings from.

use image::RgbaImage;
use sr_data::AtlasStore;
use sr_vision::{
    CandidateWindow, LargeMapInfo, MinimapAnalyzer, PositionEstimate, PositionEstimator,
};
use tracing::debug;

/// Cheap per-frame flags read before any position work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    /// Red halo around the minimap rim.
    pub under_attack: bool,
    /// Attack-indicator ring around the player arrow.
    pub enemy_locked: bool,
}

/// One accepted position reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub estimate: PositionEstimate,
    /// Arrow heading, if the arrow was readable.
    pub facing: Option<f64>,
}

pub trait PositionSource {
    fn signals(&mut self, frame: &RgbaImage) -> Signals;

    /// Locate the player on `map`. `window` restricts the search; no window
    /// means the whole map.
    fn locate(
        &mut self,
        frame: &RgbaImage,
        map: &LargeMapInfo,
        window: Option<&CandidateWindow>,
        running: bool,
    ) -> Option<Fix>;

    /// Get ready to locate on `map`, e.g. load its landmark templates.
    fn prepare(&mut self, _atlas: &dyn AtlasStore, _map: &LargeMapInfo) {}
}

/// Minimap analyzer plus position estimator.
pub struct MinimapPositionSource {
    analyzer: MinimapAnalyzer,
    estimator: PositionEstimator,
}

impl MinimapPositionSource {
    pub fn new(analyzer: MinimapAnalyzer, estimator: PositionEstimator) -> Self {
        Self { analyzer, estimator }
    }

    pub fn analyzer(&self) -> &MinimapAnalyzer {
        &self.analyzer
    }
}

impl PositionSource for MinimapPositionSource {
    fn prepare(&mut self, atlas: &dyn AtlasStore, map: &LargeMapInfo) {
        self.analyzer
            .load_templates(atlas, &map.landmark_template_ids());
    }

    fn signals(&mut self, frame: &RgbaImage) -> Signals {
        let crop = self.analyzer.crop(frame);
        Signals {
            under_attack: self.analyzer.is_under_attack(&crop),
            enemy_locked: self.analyzer.enemy_locked(&crop),
        }
    }

    fn locate(
        &mut self,
        frame: &RgbaImage,
        map: &LargeMapInfo,
        window: Option<&CandidateWindow>,
        running: bool,
    ) -> Option<Fix> {
        let ids = map.landmark_template_ids();
        let minimap = self
            .analyzer
            .analyze(frame, &ids, map.region.has_other_floor);
        let estimate = self
            .estimator
            .cal_character_pos(&minimap, map, window, running, false)?;
        if minimap.facing_angle.is_none() {
            debug!("Fix without a readable arrow");
        }
        Some(Fix {
            estimate,
            facing: minimap.facing_angle,
        })
    }
}
