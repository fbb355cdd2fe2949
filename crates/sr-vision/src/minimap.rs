//! Minimap analysis: facing arrow, road mask, landmark detections and the
//! combat halo.
//!
//! Every step degrades to an empty mask, `None` or an empty map instead of
//! failing, so a bad frame only costs one estimation attempt.

use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};
use sr_capture::{crop_pixels, regions, PixelRect};
use sr_data::{AtlasStore, TemplateImage};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::features::{BriefMatcher, FeatureMatcher, FeatureSet};
use crate::geometry::{normalize_degrees, MinimapPoint};
use crate::masks;
use crate::matching::{MatchResult, MatchResultList};

/// Rotation step of the coarse facing bank, in degrees.
const COARSE_STEP: f64 = 3.0;
/// Fine search step and half range around the coarse winner.
const FINE_STEP: f64 = 0.1;
const FINE_RANGE: f64 = 3.0;

/// Arrow outline (tip, upper back corner, notch, lower back corner) for an
/// arrow pointing at +x, in units where the analysis radius is 15 px.
const ARROW_SHAPE: [(f64, f64); 4] = [(12.0, 0.0), (-6.0, -5.0), (-3.0, 0.0), (-6.0, 5.0)];
const ARROW_SHAPE_RADIUS: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMethod {
    /// IoU against a bank of rotated arrow masks.
    RotationBank,
    /// Direction from the arrow centroid to its farthest pixel.
    Tip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Where the minimap sits in a reference-resolution frame.
    pub minimap_rect: PixelRect,
    pub arrow_color: [u8; 3],
    pub arrow_tolerance: f64,
    pub min_arrow_pixels: usize,
    /// Radius of the central window the player arrow is searched in.
    pub center_radius: u32,
    pub facing_method: FacingMethod,
    /// Luma band of walkable ground on the current floor.
    pub road_band: (u8, u8),
    /// Luma band of the floor above/below, for regions that show it.
    pub other_floor_band: (u8, u8),
    pub min_hole_pixels: usize,
    pub min_road_pixels: usize,
    /// Minimum FAST+BRIEF inliers for a landmark detection.
    pub min_landmark_inliers: usize,
    /// Share of red pixels on the rim that means "under attack".
    pub under_attack_ratio: f64,
    pub lock_color: [u8; 3],
    pub lock_tolerance: f64,
    /// Share of lock-coloured pixels on the inner ring that means "locked".
    pub enemy_lock_ratio: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            minimap_rect: regions::MINIMAP,
            arrow_color: [0, 192, 255],
            arrow_tolerance: 60.0,
            min_arrow_pixels: 50,
            center_radius: 15,
            facing_method: FacingMethod::RotationBank,
            road_band: (45, 70),
            other_floor_band: (90, 110),
            min_hole_pixels: 50,
            min_road_pixels: 200,
            min_landmark_inliers: 4,
            under_attack_ratio: 0.3,
            lock_color: [255, 160, 40],
            lock_tolerance: 50.0,
            enemy_lock_ratio: 0.2,
        }
    }
}

/// Everything derived from one minimap crop.
#[derive(Debug, Clone)]
pub struct MiniMapInfo {
    pub origin: RgbaImage,
    pub gray: GrayImage,
    /// Arrow pixels inside the central window.
    pub center_arrow_mask: GrayImage,
    pub arrow_mask: GrayImage,
    /// Degrees, 0 = screen-right, clockwise positive.
    pub facing_angle: Option<f64>,
    pub circle_mask: GrayImage,
    pub road_mask: GrayImage,
    pub landmark_mask: GrayImage,
    pub landmarks: HashMap<String, MatchResultList>,
    pub under_attack: bool,
    pub enemy_locked: bool,
}

impl MiniMapInfo {
    pub fn width(&self) -> u32 {
        self.origin.width()
    }

    pub fn height(&self) -> u32 {
        self.origin.height()
    }

    /// Centre of the crop, which is where the player stands.
    pub fn center(&self) -> MinimapPoint {
        MinimapPoint::new(
            (self.width() as f64 - 1.0) / 2.0,
            (self.height() as f64 - 1.0) / 2.0,
        )
    }
}

/// Landmark icon prepared for feature matching.
struct LandmarkTemplate {
    width: u32,
    height: u32,
    features: FeatureSet,
}

pub struct MinimapAnalyzer {
    config: AnalyzerConfig,
    matcher: Box<dyn FeatureMatcher>,
    templates: HashMap<String, LandmarkTemplate>,
    /// Dilated arrow masks at every `COARSE_STEP` degrees.
    arrow_bank: Vec<GrayImage>,
}

impl MinimapAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let size = 2 * config.center_radius + 1;
        let scale = config.center_radius as f64 / ARROW_SHAPE_RADIUS;
        let steps = (360.0 / COARSE_STEP).round() as usize;
        let arrow_bank = (0..steps)
            .map(|i| masks::dilate_mask(&render_arrow_mask(size, scale, i as f64 * COARSE_STEP), 1))
            .collect();

        Self {
            config,
            matcher: Box::new(BriefMatcher::default()),
            templates: HashMap::new(),
            arrow_bank,
        }
    }

    pub fn with_feature_matcher(mut self, matcher: Box<dyn FeatureMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Prepare a landmark icon for detection.
    pub fn add_template(&mut self, template: &TemplateImage) {
        let gray = image::imageops::grayscale(&template.raw);
        let features = self.matcher.detect_and_describe(&gray, Some(&template.mask));
        if features.is_empty() {
            warn!("Landmark template {} has no keypoints", template.id);
        }
        self.templates.insert(
            template.id.clone(),
            LandmarkTemplate {
                width: template.raw.width(),
                height: template.raw.height(),
                features,
            },
        );
    }

    /// Load landmark icons from the atlas. Missing templates are skipped.
    pub fn load_templates(&mut self, atlas: &dyn AtlasStore, template_ids: &[String]) {
        for id in template_ids {
            if self.templates.contains_key(id) {
                continue;
            }
            match atlas.template(id) {
                Ok(t) => self.add_template(&t),
                Err(e) => warn!("Skipping landmark template {}: {:#}", id, e),
            }
        }
        info!("Minimap analyzer has {} landmark templates", self.templates.len());
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Cut the minimap out of a full frame. A frame already the size of the
    /// minimap rect is taken as the crop itself.
    pub fn crop(&self, frame: &RgbaImage) -> RgbaImage {
        let r = &self.config.minimap_rect;
        if frame.dimensions() == (r.width, r.height) {
            return frame.clone();
        }
        crop_pixels(frame, r)
    }

    /// Arrow pixels as `(center_mask, full_mask)`.
    pub fn extract_facing_mask(&self, crop: &RgbaImage) -> (GrayImage, GrayImage) {
        let raw = masks::color_distance_mask(crop, self.config.arrow_color, self.config.arrow_tolerance);
        let cleaned = masks::remove_small_components(&raw, self.config.min_arrow_pixels);
        let full = masks::dilate_mask(&cleaned, 1);

        let window = disc_at_center(crop.width(), crop.height(), self.config.center_radius as f64);
        let center = masks::and(&full, &window);
        (center, full)
    }

    /// Facing angle in degrees, `None` when no arrow is visible.
    pub fn estimate_facing_angle(&self, crop: &RgbaImage) -> Option<f64> {
        let (center, _) = self.extract_facing_mask(crop);
        self.facing_from_mask(&center)
    }

    fn facing_from_mask(&self, center_mask: &GrayImage) -> Option<f64> {
        if masks::count_nonzero(center_mask) == 0 {
            return None;
        }
        let angle = match self.config.facing_method {
            FacingMethod::RotationBank => self.facing_by_bank(center_mask),
            FacingMethod::Tip => facing_by_tip(center_mask),
        }?;
        Some(normalize_degrees(angle))
    }

    fn facing_by_bank(&self, center_mask: &GrayImage) -> Option<f64> {
        let r = self.config.center_radius;
        let size = 2 * r + 1;
        let cx = center_mask.width() / 2;
        let cy = center_mask.height() / 2;
        if cx < r || cy < r {
            return None;
        }
        let window = image::imageops::crop_imm(center_mask, cx - r, cy - r, size, size).to_image();

        let mut best = (f64::NEG_INFINITY, 0.0);
        for (i, tmpl) in self.arrow_bank.iter().enumerate() {
            let score = masks::iou(&window, tmpl);
            if score > best.0 {
                best = (score, i as f64 * COARSE_STEP);
            }
        }

        let scale = r as f64 / ARROW_SHAPE_RADIUS;
        let coarse = best.1;
        let fine_steps = (FINE_RANGE / FINE_STEP).round() as i32;
        for k in -fine_steps..=fine_steps {
            if k == 0 {
                continue;
            }
            let angle = coarse + k as f64 * FINE_STEP;
            let tmpl = masks::dilate_mask(&render_arrow_mask(size, scale, angle), 1);
            let score = masks::iou(&window, &tmpl);
            if score > best.0 {
                best = (score, angle);
            }
        }
        debug!("facing {:.1} (iou {:.3})", best.1, best.0);
        Some(best.1)
    }

    /// Landmark detections keyed by template id, plus the union of their
    /// footprints.
    pub fn detect_landmarks(
        &self,
        gray: &GrayImage,
        circle: &GrayImage,
        candidate_ids: &[String],
    ) -> (HashMap<String, MatchResultList>, GrayImage) {
        let mut detections = HashMap::new();
        let mut footprint = GrayImage::new(gray.width(), gray.height());
        let wanted: Vec<(&String, &LandmarkTemplate)> = candidate_ids
            .iter()
            .filter_map(|id| self.templates.get(id).map(|t| (id, t)))
            .collect();
        if wanted.is_empty() {
            return (detections, footprint);
        }

        let source = self.matcher.detect_and_describe(gray, Some(circle));
        for (id, tmpl) in wanted {
            let Some(m) = self.matcher.match_features(&source, &tmpl.features) else {
                continue;
            };
            if m.inliers < self.config.min_landmark_inliers {
                continue;
            }
            let w = tmpl.width as f64 * m.scale;
            let h = tmpl.height as f64 * m.scale;
            let result = MatchResult::new(m.inliers as f64, m.offset_x, m.offset_y, w, h).with_scale(m.scale);
            paint_rect(&mut footprint, &result);

            detections
                .entry(id.clone())
                .or_insert_with(|| MatchResultList::new(w.min(h) / 2.0))
                .push(result);
            debug!("landmark {} at ({:.1}, {:.1}) x{:.2}", id, m.offset_x, m.offset_y, m.scale);
        }
        (detections, footprint)
    }

    /// Walkable pixels of the minimap.
    pub fn build_road_mask(
        &self,
        crop: &RgbaImage,
        arrow_mask: &GrayImage,
        landmark_mask: &GrayImage,
        has_other_floor: bool,
    ) -> GrayImage {
        let gray = image::imageops::grayscale(crop);
        let circle = self.circle_mask(crop.width(), crop.height());
        let (lo, hi) = self.config.road_band;
        let mut road = masks::luma_band(&gray, lo, hi);
        if has_other_floor {
            let (lo, hi) = self.config.other_floor_band;
            road = masks::or(&road, &masks::luma_band(&gray, lo, hi));
        }
        road = masks::or(&road, arrow_mask);
        road = masks::or(&road, &masks::select_pixels(crop, is_enemy_red));
        road = masks::and(&road, &circle);

        let road = masks::fill_small_holes(&road, self.config.min_hole_pixels);
        let road = masks::remove_small_components(&road, self.config.min_road_pixels);
        masks::subtract(&road, landmark_mask)
    }

    /// Usable minimap area, a disc slightly inside the crop.
    pub fn circle_mask(&self, width: u32, height: u32) -> GrayImage {
        disc_at_center(width, height, (width.min(height) as f64 / 2.0 - 2.0).max(1.0))
    }

    /// Red halo around the minimap rim.
    pub fn is_under_attack(&self, crop: &RgbaImage) -> bool {
        let outer = crop.width().min(crop.height()) as f64 / 2.0;
        let ring = masks::annulus_mask(crop.width(), crop.height(), outer * 0.9, outer);
        let ratio = ratio_in(&masks::select_pixels(crop, is_enemy_red), &ring);
        ratio >= self.config.under_attack_ratio
    }

    /// Target-lock ring drawn around the player arrow.
    pub fn enemy_locked(&self, crop: &RgbaImage) -> bool {
        let r = self.config.center_radius as f64;
        let ring = masks::annulus_mask(crop.width(), crop.height(), r + 1.0, r + 5.0);
        let lock = masks::color_distance_mask(crop, self.config.lock_color, self.config.lock_tolerance);
        ratio_in(&lock, &ring) >= self.config.enemy_lock_ratio
    }

    /// Run every analysis step on a frame or a minimap crop.
    pub fn analyze(&self, frame_or_crop: &RgbaImage, candidate_ids: &[String], has_other_floor: bool) -> MiniMapInfo {
        let origin = self.crop(frame_or_crop);
        let gray = image::imageops::grayscale(&origin);
        let circle_mask = self.circle_mask(origin.width(), origin.height());

        let (center_arrow_mask, arrow_mask) = self.extract_facing_mask(&origin);
        let facing_angle = self.facing_from_mask(&center_arrow_mask);
        let (landmarks, landmark_mask) = self.detect_landmarks(&gray, &circle_mask, candidate_ids);
        let road_mask = self.build_road_mask(&origin, &arrow_mask, &landmark_mask, has_other_floor);
        let under_attack = self.is_under_attack(&origin);
        let enemy_locked = self.enemy_locked(&origin);

        debug!(
            "minimap {}x{}: facing {:?}, {} landmark id(s), road {} px",
            origin.width(),
            origin.height(),
            facing_angle,
            landmarks.len(),
            masks::count_nonzero(&road_mask)
        );

        MiniMapInfo {
            origin,
            gray,
            center_arrow_mask,
            arrow_mask,
            facing_angle,
            circle_mask,
            road_mask,
            landmark_mask,
            landmarks,
            under_attack,
            enemy_locked,
        }
    }
}

fn is_enemy_red(p: &image::Rgba<u8>) -> bool {
    p[0] >= 180 && p[1] <= 80 && p[2] <= 80
}

fn disc_at_center(width: u32, height: u32, radius: f64) -> GrayImage {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    GrayImage::from_fn(width, height, |x, y| {
        let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
        Luma([if d <= radius { 255 } else { 0 }])
    })
}

/// Share of `region` pixels that are also set in `mask`.
fn ratio_in(mask: &GrayImage, region: &GrayImage) -> f64 {
    let total = masks::count_nonzero(region);
    if total == 0 {
        return 0.0;
    }
    masks::count_nonzero(&masks::and(mask, region)) as f64 / total as f64
}

fn paint_rect(mask: &mut GrayImage, r: &MatchResult) {
    let x0 = r.x.floor().max(0.0) as u32;
    let y0 = r.y.floor().max(0.0) as u32;
    let x1 = ((r.x + r.w).ceil().max(0.0) as u32).min(mask.width());
    let y1 = ((r.y + r.h).ceil().max(0.0) as u32).min(mask.height());
    for y in y0..y1 {
        for x in x0..x1 {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
}

fn facing_by_tip(mask: &GrayImage) -> Option<f64> {
    let (cx, cy) = masks::centroid(mask)?;
    let mut best = (f64::NEG_INFINITY, 0.0, 0.0);
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == 0 {
            continue;
        }
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let d = dx * dx + dy * dy;
        if d > best.0 {
            best = (d, dx, dy);
        }
    }
    Some(best.2.atan2(best.1).to_degrees())
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

fn in_triangle(p: (f64, f64), a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
    let d1 = cross(a, b, p);
    let d2 = cross(b, c, p);
    let d3 = cross(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Player arrow of `size` x `size` pixels pointing at `angle` degrees
/// (0 = right, clockwise positive), `scale` times the reference shape.
pub fn render_arrow_mask(size: u32, scale: f64, angle: f64) -> GrayImage {
    let c = (size as f64 - 1.0) / 2.0;
    let (sin, cos) = angle.to_radians().sin_cos();
    let pts: Vec<(f64, f64)> = ARROW_SHAPE.iter().map(|(x, y)| (x * scale, y * scale)).collect();
    let (tip, top, notch, bottom) = (pts[0], pts[1], pts[2], pts[3]);

    GrayImage::from_fn(size, size, |x, y| {
        let dx = x as f64 - c;
        let dy = y as f64 - c;
        // Undo the rotation to get arrow-local coordinates.
        let local = (dx * cos + dy * sin, -dx * sin + dy * cos);
        let inside = in_triangle(local, tip, top, notch) || in_triangle(local, tip, notch, bottom);
        Luma([if inside { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::angle_difference;
    use crate::synthetic;

    fn config() -> AnalyzerConfig {
        AnalyzerConfig {
            minimap_rect: PixelRect::new(0, 0, 61, 61),
            ..AnalyzerConfig::default()
        }
    }

    /// 61x61 minimap: dark background, one horizontal road, arrow at centre.
    fn crop_with_arrow(angle: f64) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(61, 61, image::Rgba([20, 20, 20, 255]));
        for y in 26..35 {
            for x in 0..61 {
                img.put_pixel(x, y, image::Rgba([58, 58, 58, 255]));
            }
        }
        let arrow = render_arrow_mask(61, 1.0, angle);
        for (x, y, p) in arrow.enumerate_pixels() {
            if p[0] > 0 {
                img.put_pixel(x, y, image::Rgba([0, 192, 255, 255]));
            }
        }
        img
    }

    #[test]
    fn test_render_arrow_points_right() {
        let m = render_arrow_mask(31, 1.0, 0.0);
        assert_eq!(m.get_pixel(15 + 10, 15)[0], 255, "tip side");
        assert_eq!(m.get_pixel(15 - 10, 15)[0], 0, "tail side");
    }

    #[test]
    fn test_render_arrow_clockwise() {
        // 90 degrees clockwise from right points down the screen.
        let m = render_arrow_mask(31, 1.0, 90.0);
        assert_eq!(m.get_pixel(15, 15 + 10)[0], 255);
        assert_eq!(m.get_pixel(15, 15 - 10)[0], 0);
    }

    #[test]
    fn test_facing_angle_rotation_bank() {
        let analyzer = MinimapAnalyzer::new(config());
        for truth in [0.0, 45.0, 90.0, 137.0, 200.0, 271.5, 359.0] {
            let angle = analyzer
                .estimate_facing_angle(&crop_with_arrow(truth))
                .expect("arrow visible");
            assert!((0.0..360.0).contains(&angle));
            assert!(
                angle_difference(angle, truth) < 4.0,
                "truth {} estimated {}",
                truth,
                angle
            );
        }
    }

    #[test]
    fn test_facing_angle_tip_heuristic() {
        let analyzer = MinimapAnalyzer::new(AnalyzerConfig {
            facing_method: FacingMethod::Tip,
            ..config()
        });
        for truth in [10.0, 120.0, 250.0, 330.0] {
            let angle = analyzer.estimate_facing_angle(&crop_with_arrow(truth)).unwrap();
            assert!(angle_difference(angle, truth) < 12.0, "truth {} estimated {}", truth, angle);
        }
    }

    #[test]
    fn test_no_arrow_gives_none() {
        let analyzer = MinimapAnalyzer::new(config());
        let img = RgbaImage::from_pixel(61, 61, image::Rgba([20, 20, 20, 255]));
        assert!(analyzer.estimate_facing_angle(&img).is_none());
        let (center, full) = analyzer.extract_facing_mask(&img);
        assert_eq!(masks::count_nonzero(&center), 0);
        assert_eq!(masks::count_nonzero(&full), 0);
    }

    #[test]
    fn test_small_arrow_noise_removed() {
        let analyzer = MinimapAnalyzer::new(config());
        let mut img = RgbaImage::from_pixel(61, 61, image::Rgba([20, 20, 20, 255]));
        for x in 28..32 {
            img.put_pixel(x, 30, image::Rgba([0, 192, 255, 255]));
        }
        assert!(analyzer.estimate_facing_angle(&img).is_none());
    }

    #[test]
    fn test_road_mask_covers_road_and_arrow() {
        let analyzer = MinimapAnalyzer::new(config());
        let crop = crop_with_arrow(0.0);
        let (_, arrow) = analyzer.extract_facing_mask(&crop);
        let empty = GrayImage::new(61, 61);
        let road = analyzer.build_road_mask(&crop, &arrow, &empty, false);
        assert_eq!(road.get_pixel(10, 30)[0], 255);
        assert_eq!(road.get_pixel(30, 30)[0], 255, "arrow counts as road");
        assert_eq!(road.get_pixel(30, 5)[0], 0);
        // Corners are outside the minimap circle.
        assert_eq!(road.get_pixel(0, 30)[0], 0);
    }

    #[test]
    fn test_road_mask_other_floor_band() {
        let analyzer = MinimapAnalyzer::new(config());
        let mut crop = RgbaImage::from_pixel(61, 61, image::Rgba([20, 20, 20, 255]));
        for y in 20..40 {
            for x in 10..50 {
                crop.put_pixel(x, y, image::Rgba([100, 100, 100, 255]));
            }
        }
        let empty = GrayImage::new(61, 61);
        let without = analyzer.build_road_mask(&crop, &empty, &empty, false);
        let with = analyzer.build_road_mask(&crop, &empty, &empty, true);
        assert_eq!(masks::count_nonzero(&without), 0);
        assert_eq!(masks::count_nonzero(&with), 800);
    }

    #[test]
    fn test_road_mask_subtracts_landmarks() {
        let analyzer = MinimapAnalyzer::new(config());
        let crop = crop_with_arrow(0.0);
        let empty = GrayImage::new(61, 61);
        let mut landmark = GrayImage::new(61, 61);
        for y in 26..35 {
            for x in 5..12 {
                landmark.put_pixel(x, y, Luma([255]));
            }
        }
        let road = analyzer.build_road_mask(&crop, &empty, &landmark, false);
        assert_eq!(road.get_pixel(8, 30)[0], 0);
        assert_eq!(road.get_pixel(50, 30)[0], 255);
    }

    #[test]
    fn test_under_attack_halo() {
        let analyzer = MinimapAnalyzer::new(config());
        let calm = crop_with_arrow(0.0);
        assert!(!analyzer.is_under_attack(&calm));

        let mut hurt = calm.clone();
        let ring = masks::annulus_mask(61, 61, 25.0, 30.5);
        for (x, y, p) in ring.enumerate_pixels() {
            if p[0] > 0 {
                hurt.put_pixel(x, y, image::Rgba([220, 30, 30, 255]));
            }
        }
        assert!(analyzer.is_under_attack(&hurt));
    }

    #[test]
    fn test_enemy_locked_ring() {
        let analyzer = MinimapAnalyzer::new(config());
        let mut crop = crop_with_arrow(0.0);
        assert!(!analyzer.enemy_locked(&crop));
        let ring = masks::annulus_mask(61, 61, 16.0, 20.0);
        for (x, y, p) in ring.enumerate_pixels() {
            if p[0] > 0 {
                crop.put_pixel(x, y, image::Rgba([255, 160, 40, 255]));
            }
        }
        assert!(analyzer.enemy_locked(&crop));
    }

    #[test]
    fn test_analyze_crops_full_frame() {
        let analyzer = MinimapAnalyzer::new(AnalyzerConfig {
            minimap_rect: PixelRect::new(10, 20, 61, 61),
            ..AnalyzerConfig::default()
        });
        let mut frame = RgbaImage::from_pixel(200, 120, image::Rgba([0, 0, 0, 255]));
        image::imageops::replace(&mut frame, &crop_with_arrow(90.0), 10, 20);
        let info = analyzer.analyze(&frame, &[], false);
        assert_eq!((info.width(), info.height()), (61, 61));
        assert_eq!(info.center(), MinimapPoint::new(30.0, 30.0));
        assert!(angle_difference(info.facing_angle.unwrap(), 90.0) < 4.0);
        assert!(info.landmarks.is_empty());
    }

    #[test]
    fn test_detects_pasted_landmark() {
        let mut analyzer = MinimapAnalyzer::new(AnalyzerConfig {
            minimap_rect: PixelRect::new(0, 0, 121, 121),
            ..AnalyzerConfig::default()
        });
        let icon = synthetic::landmark_icon(48, 11);
        analyzer.add_template(&TemplateImage::from_rgba("transport", icon.clone()));
        assert_eq!(analyzer.template_count(), 1);

        let crop = synthetic::minimap_with_icon(121, &icon, (24, 40));
        let info = analyzer.analyze(&crop, &["transport".to_string()], false);

        let found = info.landmarks.get("transport").expect("icon detected");
        assert_eq!(found.len(), 1);
        let det = found.max().expect("one detection");
        let scale = det.scale.expect("scale set");
        assert!((scale - 1.0).abs() < 0.05, "scale {}", scale);
        assert!((det.x - 24.0).abs() < 1.5, "x {}", det.x);
        assert!((det.y - 40.0).abs() < 1.5, "y {}", det.y);
        assert!((det.w - 48.0).abs() < 3.0, "w {}", det.w);

        // The footprint covers the icon and nothing far from it.
        let fp = &info.landmark_mask;
        assert_eq!(fp.get_pixel(48, 64)[0], 255);
        assert_eq!(fp.get_pixel(26, 42)[0], 255);
        assert_eq!(fp.get_pixel(10, 60)[0], 0);
        assert_eq!(fp.get_pixel(100, 100)[0], 0);
        let area = masks::count_nonzero(fp);
        assert!((45 * 45..=51 * 51).contains(&area), "footprint {} px", area);
        assert_eq!(masks::count_nonzero(&masks::and(&info.road_mask, fp)), 0);
    }

    #[test]
    fn test_unknown_landmark_ids_are_ignored() {
        let analyzer = MinimapAnalyzer::new(config());
        let crop = crop_with_arrow(0.0);
        let info = analyzer.analyze(&crop, &["missing".to_string()], false);
        assert!(info.landmarks.is_empty());
        assert_eq!(masks::count_nonzero(&info.landmark_mask), 0);
    }
}
