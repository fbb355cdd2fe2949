use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::masks;
use crate::minimap::{AnalyzerConfig, MinimapAnalyzer};

/// Coarse state of the game screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleStatus {
    /// Walking around the world, minimap visible.
    InWorld,
    InBattle,
    /// Black or nearly black frame between scenes.
    Loading,
}

pub trait ScreenClassifier: Send + Sync {
    fn is_normal_in_world(&self, frame: &RgbaImage) -> bool;
    fn battle_status(&self, frame: &RgbaImage) -> BattleStatus;
}

/// Classifies by HUD presence: the player arrow on the minimap only exists
/// in the world view.
pub struct HudClassifier {
    analyzer: MinimapAnalyzer,
    /// Mean luma below this counts as a loading screen.
    pub loading_luma: f64,
}

impl HudClassifier {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            analyzer: MinimapAnalyzer::new(config),
            loading_luma: 12.0,
        }
    }
}

impl ScreenClassifier for HudClassifier {
    fn is_normal_in_world(&self, frame: &RgbaImage) -> bool {
        let crop = self.analyzer.crop(frame);
        let (center, _) = self.analyzer.extract_facing_mask(&crop);
        masks::count_nonzero(&center) > 0
    }

    fn battle_status(&self, frame: &RgbaImage) -> BattleStatus {
        if self.is_normal_in_world(frame) {
            return BattleStatus::InWorld;
        }
        let gray = image::imageops::grayscale(frame);
        let n = (gray.width() as f64 * gray.height() as f64).max(1.0);
        let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        if mean < self.loading_luma {
            BattleStatus::Loading
        } else {
            BattleStatus::InBattle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::WorldPoint;
    use crate::synthetic;
    use sr_capture::PixelRect;

    fn classifier() -> HudClassifier {
        HudClassifier::new(AnalyzerConfig {
            minimap_rect: PixelRect::new(0, 0, synthetic::MINIMAP_SIZE, synthetic::MINIMAP_SIZE),
            ..AnalyzerConfig::default()
        })
    }

    #[test]
    fn test_world_view_detected() {
        let map = synthetic::corridor_map(200, 200);
        let frame = synthetic::minimap_frame(&map, WorldPoint::new(100.0, 100.0), 30.0);
        let c = classifier();
        assert!(c.is_normal_in_world(&frame));
        assert_eq!(c.battle_status(&frame), BattleStatus::InWorld);
    }

    #[test]
    fn test_battle_and_loading() {
        let c = classifier();
        let battle = RgbaImage::from_pixel(61, 61, image::Rgba([120, 90, 160, 255]));
        assert_eq!(c.battle_status(&battle), BattleStatus::InBattle);
        let black = RgbaImage::from_pixel(61, 61, image::Rgba([0, 0, 0, 255]));
        assert_eq!(c.battle_status(&black), BattleStatus::Loading);
    }
}
