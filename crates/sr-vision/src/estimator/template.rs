use image::imageops::FilterType;
use image::GrayImage;
use imageproc::edges::canny;

use super::{EstimatorConfig, PositionEstimate, PositionStrategy, StrategyKind};
use crate::geometry::{Rect, WorldPoint};
use crate::large_map::{LargeMapInfo, EDGE_HIGH, EDGE_LOW};
use crate::masks;
use crate::matching::{MatchResult, NccMatcher, TemplateMatcher};
use crate::minimap::MiniMapInfo;

/// Which rasters a template strategy compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    /// Minimap road mask against the large-map road mask, circle-masked.
    Road,
    /// Road mask with edges drawn over it, circle-masked.
    RoadEdge,
    /// Edge maps only, unmasked.
    Edge,
}

/// Slide a minimap-derived raster over the large map at each scale of the
/// bank.
pub struct TemplateStrategy {
    source: TemplateSource,
    threshold: f64,
    early_accept: f64,
    config: EstimatorConfig,
    matcher: Box<dyn TemplateMatcher>,
}

impl TemplateStrategy {
    pub fn new(source: TemplateSource, threshold: f64, config: &EstimatorConfig) -> Self {
        Self {
            source,
            threshold,
            early_accept: config.early_accept,
            config: config.clone(),
            matcher: Box::new(NccMatcher),
        }
    }

    pub fn from_config(kind: StrategyKind, config: &EstimatorConfig) -> Self {
        match kind {
            StrategyKind::RoadEdge => Self::new(TemplateSource::RoadEdge, config.road_edge_threshold, config),
            StrategyKind::Edge => Self::new(TemplateSource::Edge, config.edge_threshold, config),
            _ => Self::new(TemplateSource::Road, config.road_threshold, config),
        }
    }

    pub fn with_matcher(mut self, matcher: Box<dyn TemplateMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    fn minimap_edges(minimap: &MiniMapInfo) -> GrayImage {
        // Keep the disc rim out of the edge map.
        let inner = masks::dilate_mask(&masks::invert(&minimap.circle_mask), 3);
        let edges = canny(&minimap.gray, EDGE_LOW, EDGE_HIGH);
        masks::subtract(&edges, &inner)
    }

    /// `(template, mask, map raster)` for this strategy.
    fn rasters<'a>(&self, minimap: &MiniMapInfo, map: &'a LargeMapInfo) -> (GrayImage, Option<GrayImage>, &'a GrayImage) {
        match self.source {
            TemplateSource::Road => (minimap.road_mask.clone(), Some(minimap.circle_mask.clone()), &map.road_mask),
            TemplateSource::RoadEdge => {
                let combined = masks::or(&minimap.road_mask, &Self::minimap_edges(minimap));
                (combined, Some(minimap.circle_mask.clone()), &map.road_edges)
            }
            TemplateSource::Edge => (Self::minimap_edges(minimap), None, &map.edges),
        }
    }
}

impl PositionStrategy for TemplateStrategy {
    fn kind(&self) -> StrategyKind {
        match self.source {
            TemplateSource::Road => StrategyKind::Road,
            TemplateSource::RoadEdge => StrategyKind::RoadEdge,
            TemplateSource::Edge => StrategyKind::Edge,
        }
    }

    fn try_estimate(
        &self,
        minimap: &MiniMapInfo,
        map: &LargeMapInfo,
        rect: Option<Rect>,
        running: bool,
    ) -> Option<PositionEstimate> {
        let area = match rect {
            Some(r) => r.clamp_to(map.width(), map.height())?,
            None => Rect::new(0, 0, map.width() as i32, map.height() as i32),
        };
        let (template, mask, raster) = self.rasters(minimap, map);
        let source = image::imageops::crop_imm(raster, area.x1 as u32, area.y1 as u32, area.width(), area.height()).to_image();

        let mut best: Option<(MatchResult, f64)> = None;
        for scale in self.config.scale_bank(running) {
            let tw = (template.width() as f64 * scale).round() as u32;
            let th = (template.height() as f64 * scale).round() as u32;
            if tw == 0 || th == 0 || tw > source.width() || th > source.height() {
                continue;
            }
            let scaled = image::imageops::resize(&template, tw, th, FilterType::Nearest);
            let scaled_mask = mask
                .as_ref()
                .map(|m| image::imageops::resize(m, tw, th, FilterType::Nearest));

            let results = self
                .matcher
                .match_template(&source, &scaled, self.threshold, scaled_mask.as_ref());
            let Some(m) = results.max().copied() else {
                continue;
            };
            if best.map(|(b, _)| m.confidence > b.confidence).unwrap_or(true) {
                best = Some((m, scale));
            }
            if m.confidence >= self.early_accept {
                break;
            }
        }

        let (m, scale) = best?;
        Some(PositionEstimate {
            confidence: m.confidence,
            world: WorldPoint::new(
                area.x1 as f64 + m.x + (m.w - 1.0) / 2.0,
                area.y1 as f64 + m.y + (m.h - 1.0) / 2.0,
            ),
            effective_width: m.w,
            effective_height: m.h,
            scale,
            strategy: self.kind(),
        })
    }
}
