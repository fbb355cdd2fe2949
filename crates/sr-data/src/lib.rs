use anyhow::{bail, Context, Result};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod route;

pub use route::{Route, RouteError, RouteOp, WaitKind};

/// A planet groups the regions that share one world map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Planet {
    pub id: String,
    pub name: String,
}

/// One floor of one area of a planet. The unit of map-asset loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub planet_id: String,
    /// Shared by every floor of the same area.
    pub area_id: String,
    pub name: String,
    #[serde(default)]
    pub floor: i32,
    /// Large map size in pixels.
    pub width: u32,
    pub height: u32,
    /// Whether the minimap also shows the floor above/below in a lighter gray.
    #[serde(default)]
    pub has_other_floor: bool,
}

impl Region {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialPointKind {
    Transport,
    Boss,
    SubRegionEntrance,
    Other,
}

/// A named, visually recognisable point on a large map (landmark).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialPoint {
    pub id: String,
    pub region_id: String,
    pub template_id: String,
    pub name: String,
    pub kind: SpecialPointKind,
    /// Large-map pixel coordinate of the landmark centre.
    pub x: f64,
    pub y: f64,
}

/// Template thumbnail with its alpha-derived mask.
#[derive(Debug, Clone)]
pub struct TemplateImage {
    pub id: String,
    pub raw: RgbaImage,
    pub mask: GrayImage,
}

impl TemplateImage {
    /// Build a template whose mask is taken from the alpha channel.
    pub fn from_rgba(id: &str, raw: RgbaImage) -> Self {
        let mask = GrayImage::from_fn(raw.width(), raw.height(), |x, y| {
            if raw.get_pixel(x, y)[3] >= 128 {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        Self {
            id: id.to_string(),
            raw,
            mask,
        }
    }
}

/// Read access to map and template assets.
pub trait AtlasStore: Send + Sync {
    fn regions(&self) -> &[Region];
    fn special_points(&self) -> &[SpecialPoint];
    fn large_map_image(&self, region: &Region) -> Result<RgbaImage>;
    fn template(&self, template_id: &str) -> Result<TemplateImage>;

    fn region(&self, id: &str) -> Option<&Region> {
        self.regions().iter().find(|r| r.id == id)
    }

    /// The region on `floor` of the same area as `of`.
    fn region_on_floor(&self, of: &Region, floor: i32) -> Option<&Region> {
        self.regions().iter().find(|r| {
            r.planet_id == of.planet_id && r.area_id == of.area_id && r.floor == floor
        })
    }

    fn special_point(&self, id: &str) -> Option<&SpecialPoint> {
        self.special_points().iter().find(|p| p.id == id)
    }

    fn points_in_region(&self, region_id: &str) -> Vec<&SpecialPoint> {
        self.special_points()
            .iter()
            .filter(|p| p.region_id == region_id)
            .collect()
    }
}

/// Raw regions.json file format
#[derive(Debug, Deserialize)]
struct RegionsFile {
    planets: Vec<Planet>,
    regions: Vec<Region>,
}

/// Raw special_points.json file format
#[derive(Debug, Deserialize)]
struct PointsFile {
    points: Vec<SpecialPoint>,
}

/// Atlas backed by a data directory:
///
///   - `map/regions.json`, `map/special_points.json`
///   - `map/{planet_id}/{region_id}.png`
///   - `template/{template_id}.png` (alpha = mask)
#[derive(Debug, Clone, Default)]
pub struct FileAtlas {
    data_dir: PathBuf,
    pub planets: Vec<Planet>,
    regions: Vec<Region>,
    points: Vec<SpecialPoint>,
}

impl FileAtlas {
    /// Load atlas metadata from the data directory. Missing metadata files
    /// give an empty atlas rather than an error.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut atlas = Self {
            data_dir: data_dir.to_path_buf(),
            ..Self::default()
        };

        let regions_path = data_dir.join("map").join("regions.json");
        if regions_path.exists() {
            let content = std::fs::read_to_string(&regions_path)
                .context("Failed to read regions.json")?;
            let file: RegionsFile =
                serde_json::from_str(&content).context("Failed to parse regions.json")?;
            atlas.planets = file.planets;
            atlas.regions = file.regions;
            tracing::info!(
                "Loaded {} planets, {} regions",
                atlas.planets.len(),
                atlas.regions.len()
            );
        } else {
            tracing::warn!("No regions.json found at {}", regions_path.display());
        }

        let points_path = data_dir.join("map").join("special_points.json");
        if points_path.exists() {
            let content = std::fs::read_to_string(&points_path)
                .context("Failed to read special_points.json")?;
            let file: PointsFile = serde_json::from_str(&content)
                .context("Failed to parse special_points.json")?;
            atlas.points = file.points;
            tracing::info!("Loaded {} special points", atlas.points.len());
        }

        Ok(atlas)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl AtlasStore for FileAtlas {
    fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn special_points(&self) -> &[SpecialPoint] {
        &self.points
    }

    fn large_map_image(&self, region: &Region) -> Result<RgbaImage> {
        let path = self
            .data_dir
            .join("map")
            .join(&region.planet_id)
            .join(format!("{}.png", region.id));
        let img = image::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .to_rgba8();
        if img.dimensions() != (region.width, region.height) {
            tracing::warn!(
                "Large map {} is {}x{}, regions.json says {}x{}",
                region.id,
                img.width(),
                img.height(),
                region.width,
                region.height
            );
        }
        Ok(img)
    }

    fn template(&self, template_id: &str) -> Result<TemplateImage> {
        let path = self
            .data_dir
            .join("template")
            .join(format!("{}.png", template_id));
        let img = image::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .to_rgba8();
        Ok(TemplateImage::from_rgba(template_id, img))
    }
}

/// Atlas held entirely in memory. Used for tests and for maps generated at
/// runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryAtlas {
    regions: Vec<Region>,
    points: Vec<SpecialPoint>,
    maps: HashMap<String, RgbaImage>,
    templates: HashMap<String, RgbaImage>,
}

impl MemoryAtlas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&mut self, region: Region, map: RgbaImage) {
        self.maps.insert(region.id.clone(), map);
        self.regions.push(region);
    }

    pub fn add_point(&mut self, point: SpecialPoint) {
        self.points.push(point);
    }

    pub fn add_template(&mut self, id: &str, raw: RgbaImage) {
        self.templates.insert(id.to_string(), raw);
    }
}

impl AtlasStore for MemoryAtlas {
    fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn special_points(&self) -> &[SpecialPoint] {
        &self.points
    }

    fn large_map_image(&self, region: &Region) -> Result<RgbaImage> {
        match self.maps.get(&region.id) {
            Some(img) => Ok(img.clone()),
            None => bail!("No large map for region {}", region.id),
        }
    }

    fn template(&self, template_id: &str) -> Result<TemplateImage> {
        match self.templates.get(template_id) {
            Some(img) => Ok(TemplateImage::from_rgba(template_id, img.clone())),
            None => bail!("No template {}", template_id),
        }
    }
}
