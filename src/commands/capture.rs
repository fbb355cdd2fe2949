use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use sr_capture::PixelRect;
use sr_data::AtlasStore;
use sr_vision::{BriefMatcher, LargeMapInfo, MinimapAnalyzer, PositionEstimator};

use super::{grab_frame, load_atlas};
use crate::config::Settings;

/// Print every visible window.
pub fn list_windows() -> Result<()> {
    let windows = sr_capture::list_windows()?;
    println!("Found {} windows:", windows.len());
    for w in &windows {
        println!(
            "  \"{}\" ({}) {}x{}{}",
            w.title,
            w.app_name,
            w.width,
            w.height,
            if w.minimized { " [minimized]" } else { "" }
        );
    }
    Ok(())
}

/// Save one game frame, and its minimap crop when asked.
pub fn capture(settings: &Settings, output: &Path, minimap: Option<&Path>) -> Result<()> {
    let frame = grab_frame(settings, None)?;
    frame
        .save(output)
        .with_context(|| format!("Failed to save {}", output.display()))?;
    println!("Captured {}x{} to {}", frame.width(), frame.height(), output.display());

    if let Some(path) = minimap {
        let crop = sr_capture::crop_pixels(&frame, &settings.analyzer.minimap_rect);
        crop.save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        println!("Minimap crop saved to {}", path.display());
    }
    Ok(())
}

/// Locate the player on `region_id` with a full-map search.
pub fn locate(settings: &Settings, region_id: &str, from: Option<&Path>, debug_dir: Option<&Path>) -> Result<()> {
    let atlas = load_atlas(settings)?;
    let region = atlas
        .region(region_id)
        .with_context(|| format!("Unknown region {}", region_id))?;

    let matcher = BriefMatcher::default();
    let map = LargeMapInfo::load(
        &atlas,
        region_id,
        &settings.analyzer,
        settings
            .use_features
            .then_some(&matcher as &dyn sr_vision::FeatureMatcher),
    )?;
    let mut analyzer = MinimapAnalyzer::new(settings.analyzer.clone());
    if settings.use_features {
        analyzer = analyzer.with_feature_matcher(Box::new(BriefMatcher::default()));
    }
    analyzer.load_templates(&atlas, &map.landmark_template_ids());

    let frame = grab_frame(settings, from)?;
    let minimap = analyzer.analyze(&frame, &map.landmark_template_ids(), region.has_other_floor);

    if let Some(dir) = debug_dir {
        save_masks(dir, &minimap)?;
    }

    println!("Region {} ({}x{})", region.name, map.width(), map.height());
    match minimap.facing_angle {
        Some(a) => println!("Facing: {:.1} deg", a),
        None => println!("Facing: not found"),
    }
    if minimap.under_attack {
        println!("Under attack");
    }
    if minimap.enemy_locked {
        println!("Enemy locked on");
    }

    let estimator = PositionEstimator::new(settings.estimator.clone());
    match estimator.cal_character_pos(&minimap, &map, None, settings.movement.run, false) {
        Some(est) => {
            info!("{} fix", est.strategy);
            println!("{}", serde_json::to_string_pretty(&est)?);
        }
        None => {
            warn!("No position on {}", region_id);
            println!("Position: not found");
        }
    }
    Ok(())
}

/// Run the minimap analyzer alone on a frame and dump its masks.
pub fn analyze(settings: &Settings, from: Option<&Path>, output_dir: &Path) -> Result<()> {
    let frame = grab_frame(settings, from)?;
    let analyzer = MinimapAnalyzer::new(settings.analyzer.clone());
    let minimap = analyzer.analyze(&frame, &[], false);
    save_masks(output_dir, &minimap)?;

    let rect: PixelRect = settings.analyzer.minimap_rect;
    println!("Minimap at ({}, {}) {}x{}", rect.x, rect.y, rect.width, rect.height);
    println!(
        "Facing: {}",
        minimap
            .facing_angle
            .map(|a| format!("{:.1} deg", a))
            .unwrap_or_else(|| "not found".into())
    );
    println!("Under attack: {}", minimap.under_attack);
    println!("Enemy locked: {}", minimap.enemy_locked);
    println!("Road pixels: {}", sr_vision::masks::count_nonzero(&minimap.road_mask));
    println!("Masks saved to {}", output_dir.display());
    Ok(())
}

fn save_masks(dir: &Path, minimap: &sr_vision::MiniMapInfo) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    minimap.origin.save(dir.join("minimap.png"))?;
    minimap.arrow_mask.save(dir.join("arrow_mask.png"))?;
    minimap.road_mask.save(dir.join("road_mask.png"))?;
    minimap.landmark_mask.save(dir.join("landmark_mask.png"))?;
    Ok(())
}
