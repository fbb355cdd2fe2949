use anyhow::{Context, Result};
use image::{GrayImage, RgbaImage};
use imageproc::edges::canny;
use sr_data::{AtlasStore, Region};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::features::{FeatureMatcher, FeatureSet};
use crate::geometry::WorldPoint;
use crate::masks;
use crate::minimap::AnalyzerConfig;

/// Canny thresholds shared by the large map and minimap edge images.
pub const EDGE_LOW: f32 = 20.0;
pub const EDGE_HIGH: f32 = 50.0;

/// A landmark as drawn on the large map.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkOnMap {
    pub id: String,
    pub template_id: String,
    pub world: WorldPoint,
}

/// One region's large map with everything the estimator matches against.
#[derive(Debug, Clone)]
pub struct LargeMapInfo {
    pub region: Region,
    pub origin: RgbaImage,
    pub gray: GrayImage,
    pub road_mask: GrayImage,
    pub edges: GrayImage,
    /// Road mask with the edge map drawn over it.
    pub road_edges: GrayImage,
    /// Only present when the map was built with a feature matcher.
    pub features: Option<FeatureSet>,
    pub landmarks: Vec<LandmarkOnMap>,
}

impl LargeMapInfo {
    pub fn build(region: Region, origin: RgbaImage, landmarks: Vec<LandmarkOnMap>, config: &AnalyzerConfig) -> Self {
        let gray = image::imageops::grayscale(&origin);
        let (lo, hi) = config.road_band;
        let road = masks::luma_band(&gray, lo, hi);
        let road = masks::fill_small_holes(&road, config.min_hole_pixels);
        let road_mask = masks::remove_small_components(&road, config.min_road_pixels);
        let edges = canny(&gray, EDGE_LOW, EDGE_HIGH);
        let road_edges = masks::or(&road_mask, &edges);

        debug!(
            "large map {} {}x{}: road {} px, {} landmark(s)",
            region.id,
            origin.width(),
            origin.height(),
            masks::count_nonzero(&road_mask),
            landmarks.len()
        );

        Self {
            region,
            origin,
            gray,
            road_mask,
            edges,
            road_edges,
            features: None,
            landmarks,
        }
    }

    /// Detect keypoints over the whole map for the feature strategy.
    pub fn with_features(mut self, matcher: &dyn FeatureMatcher) -> Self {
        let features = matcher.detect_and_describe(&self.gray, None);
        debug!("large map {}: {} keypoints", self.region.id, features.len());
        self.features = Some(features);
        self
    }

    /// Load a region's map and landmarks from the atlas.
    pub fn load(
        atlas: &dyn AtlasStore,
        region_id: &str,
        config: &AnalyzerConfig,
        matcher: Option<&dyn FeatureMatcher>,
    ) -> Result<Self> {
        let region = atlas
            .region(region_id)
            .with_context(|| format!("Unknown region {}", region_id))?
            .clone();
        let origin = atlas.large_map_image(&region)?;
        let landmarks = atlas
            .points_in_region(region_id)
            .into_iter()
            .map(|p| LandmarkOnMap {
                id: p.id.clone(),
                template_id: p.template_id.clone(),
                world: WorldPoint::new(p.x, p.y),
            })
            .collect();

        let info = Self::build(region, origin, landmarks, config);
        Ok(match matcher {
            Some(m) => info.with_features(m),
            None => info,
        })
    }

    pub fn width(&self) -> u32 {
        self.origin.width()
    }

    pub fn height(&self) -> u32 {
        self.origin.height()
    }

    /// Template ids of every landmark on this map, deduplicated.
    pub fn landmark_template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for l in &self.landmarks {
            if !ids.contains(&l.template_id) {
                ids.push(l.template_id.clone());
            }
        }
        ids
    }
}

/// Bounded least-recently-used cache of prepared large maps.
pub struct LargeMapCache {
    capacity: usize,
    /// Most recently used at the back.
    entries: Mutex<VecDeque<(String, Arc<LargeMapInfo>)>>,
}

impl LargeMapCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(String, Arc<LargeMapInfo>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, region_id: &str) -> Option<Arc<LargeMapInfo>> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|(id, _)| id == region_id)?;
        let entry = entries.remove(pos)?;
        let info = entry.1.clone();
        entries.push_back(entry);
        Some(info)
    }

    pub fn insert(&self, info: LargeMapInfo) -> Arc<LargeMapInfo> {
        let id = info.region.id.clone();
        let info = Arc::new(info);
        let mut entries = self.lock();
        entries.retain(|(k, _)| *k != id);
        entries.push_back((id, info.clone()));
        while entries.len() > self.capacity {
            if let Some((evicted, _)) = entries.pop_front() {
                debug!("Large map cache full, dropping {}", evicted);
            }
        }
        info
    }

    /// Return the cached map or build it with `load`. The lock is not held
    /// while loading.
    pub fn get_or_load<F>(&self, region_id: &str, load: F) -> Result<Arc<LargeMapInfo>>
    where
        F: FnOnce() -> Result<LargeMapInfo>,
    {
        if let Some(info) = self.get(region_id) {
            return Ok(info);
        }
        let info = load()?;
        info!("Prepared large map {}", region_id);
        Ok(self.insert(info))
    }

    pub fn evict(&self, region_id: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(k, _)| k != region_id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
