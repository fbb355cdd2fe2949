pub mod capture;
pub mod route;

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::Path;
use tracing::info;

use sr_capture::{Capture, GameWindow};
use sr_data::FileAtlas;

use crate::config::Settings;

pub fn load_atlas(settings: &Settings) -> Result<FileAtlas> {
    let data_dir = settings.resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    FileAtlas::load(&data_dir).with_context(|| format!("Failed to load atlas from {}", data_dir.display()))
}

/// A saved screenshot when `from` is given, else a live frame from the game
/// window.
pub fn grab_frame(settings: &Settings, from: Option<&Path>) -> Result<RgbaImage> {
    match from {
        Some(path) => {
            let img = image::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?
                .to_rgba8();
            // A bare minimap crop is analysed as-is.
            let rect = settings.analyzer.minimap_rect;
            if img.dimensions() == (rect.width, rect.height) {
                return Ok(img);
            }
            Ok(sr_capture::to_reference(img))
        }
        None => GameWindow::new(&settings.window_titles).screenshot(),
    }
}
