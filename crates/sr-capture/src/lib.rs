use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xcap::Window;

pub mod input;
pub mod replay;

pub use input::{DryRunInput, GameInput, InteractKind, Key};
pub use replay::ReplayCapture;

/// Every frame handed to vision code is normalised to this resolution.
pub const REFERENCE_WIDTH: u32 = 1920;
pub const REFERENCE_HEIGHT: u32 = 1080;

/// Pixel rectangle inside a reference-resolution frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint {
            x: (self.x + self.width / 2) as i32,
            y: (self.y + self.height / 2) as i32,
        }
    }
}

/// A point in game-window pixels, used for clicks and drags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

impl ScreenPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Well-known HUD regions for the 1920x1080 reference resolution
pub mod regions {
    use super::PixelRect;

    /// Square around the circular minimap in the top-left corner.
    pub const MINIMAP: PixelRect = PixelRect::new(19, 63, 221, 221);

    /// Prompt shown next to an interactable object ("F" key hint).
    pub const INTERACT_PROMPT: PixelRect = PixelRect::new(1180, 480, 80, 60);
}

/// Source of game frames.
///
/// Implementations block until a frame is available. Frames are returned at
/// the reference resolution.
pub trait Capture {
    fn screenshot(&mut self) -> Result<RgbaImage>;
}

/// Game window titles to search for
pub const DEFAULT_WINDOW_TITLES: &[&str] = &["崩坏：星穹铁道", "honkai: star rail", "starrail"];

/// Summary of a top-level window, used by the `list-windows` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub title: String,
    pub app_name: String,
    pub width: u32,
    pub height: u32,
    pub minimized: bool,
}

/// Enumerate visible windows.
pub fn list_windows() -> Result<Vec<WindowInfo>> {
    let windows = Window::all().context("Failed to enumerate windows")?;
    Ok(windows
        .into_iter()
        .map(|w| WindowInfo {
            title: w.title().unwrap_or_default(),
            app_name: w.app_name().unwrap_or_default(),
            width: w.width().unwrap_or_default(),
            height: w.height().unwrap_or_default(),
            minimized: w.is_minimized().unwrap_or(false),
        })
        .collect())
}

/// Capture backed by a live game window.
pub struct GameWindow {
    titles: Vec<String>,
}

impl GameWindow {
    pub fn new(titles: &[String]) -> Self {
        let titles = if titles.is_empty() {
            DEFAULT_WINDOW_TITLES.iter().map(|t| t.to_string()).collect()
        } else {
            titles.iter().map(|t| t.to_lowercase()).collect()
        };
        Self { titles }
    }

    /// Find the game window by searching window titles
    fn find_window(&self) -> Option<Window> {
        let windows = match Window::all() {
            Ok(w) => w,
            Err(e) => {
                warn!("Failed to enumerate windows: {}", e);
                return None;
            }
        };

        for window in windows {
            let title = match window.title() {
                Ok(t) => t.to_lowercase(),
                Err(_) => continue,
            };
            if self.titles.iter().any(|t| title.contains(t.as_str())) {
                debug!("Found game window: {}", title);
                return Some(window);
            }
        }
        None
    }
}

impl Capture for GameWindow {
    fn screenshot(&mut self) -> Result<RgbaImage> {
        let window = self
            .find_window()
            .with_context(|| format!("No window matching {:?}", self.titles))?;
        let img = window
            .capture_image()
            .context("Failed to capture window image")?;
        Ok(to_reference(img))
    }
}

/// Resize a frame to the reference resolution if needed.
pub fn to_reference(frame: RgbaImage) -> RgbaImage {
    if frame.dimensions() == (REFERENCE_WIDTH, REFERENCE_HEIGHT) {
        return frame;
    }
    debug!(
        "Rescaling frame {}x{} to reference {}x{}",
        frame.width(),
        frame.height(),
        REFERENCE_WIDTH,
        REFERENCE_HEIGHT
    );
    image::imageops::resize(
        &frame,
        REFERENCE_WIDTH,
        REFERENCE_HEIGHT,
        image::imageops::FilterType::Triangle,
    )
}

/// Crop a pixel rectangle, clamped to the frame bounds.
pub fn crop_pixels(frame: &RgbaImage, rect: &PixelRect) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());

    // Clamp to image bounds
    let x = rect.x.min(w.saturating_sub(1));
    let y = rect.y.min(h.saturating_sub(1));
    let rw = rect.width.min(w - x);
    let rh = rect.height.min(h - y);

    image::imageops::crop_imm(frame, x, y, rw, rh).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimap_region_inside_reference_frame() {
        let r = regions::MINIMAP;
        assert!(r.x + r.width <= REFERENCE_WIDTH);
        assert!(r.y + r.height <= REFERENCE_HEIGHT);
        assert_eq!(r.width, r.height, "minimap crop must be square");
    }

    #[test]
    fn test_crop_pixels_clamps() {
        let img = RgbaImage::new(100, 80);
        let cropped = crop_pixels(&img, &PixelRect::new(90, 70, 50, 50));
        assert_eq!(cropped.dimensions(), (10, 10));
    }

    #[test]
    fn test_to_reference_resizes() {
        let img = RgbaImage::new(960, 540);
        let out = to_reference(img);
        assert_eq!(out.dimensions(), (REFERENCE_WIDTH, REFERENCE_HEIGHT));
    }
}
