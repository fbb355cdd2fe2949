//! Coordinate types.
//!
//! Minimap-local and large-map coordinates are different spaces; keeping them
//! in distinct types means a minimap offset can never be passed where a world
//! position is expected.

use serde::{Deserialize, Serialize};

/// Large-map (world) pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
}

impl WorldPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &WorldPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Pixel coordinate inside one minimap crop.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MinimapPoint {
    pub x: f64,
    pub y: f64,
}

impl MinimapPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle `[x1, x2) x [y1, y2)` in large-map pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    /// Corners may be given in any order.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.x1 == self.x2 || self.y1 == self.y2
    }

    pub fn contains(&self, p: &WorldPoint) -> bool {
        p.x >= self.x1 as f64 && p.x < self.x2 as f64 && p.y >= self.y1 as f64 && p.y < self.y2 as f64
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect { x1, y1, x2, y2 })
    }

    /// Clamp to an image of `width` x `height`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        self.intersect(&Rect::new(0, 0, width as i32, height as i32))
    }
}

/// Where the player can be: the last fix plus how far they may have moved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateWindow {
    pub center: WorldPoint,
    /// Maximum travel distance since `center` was measured.
    pub radius: f64,
}

impl CandidateWindow {
    pub fn new(center: WorldPoint, radius: f64) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Search rect for a minimap of `half_extent` pixels (already scaled to
    /// large-map size) around any point in this window, clamped to the map.
    pub fn to_rect(&self, half_extent: f64, map_width: u32, map_height: u32) -> Option<Rect> {
        let pad = self.radius + half_extent;
        Rect::new(
            (self.center.x - pad).floor() as i32,
            (self.center.y - pad).floor() as i32,
            (self.center.x + pad).ceil() as i32 + 1,
            (self.center.y + pad).ceil() as i32 + 1,
        )
        .clamp_to(map_width, map_height)
    }
}

/// Normalise degrees into `[0, 360)`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let a = angle % 360.0;
    let a = if a < 0.0 { a + 360.0 } else { a };
    // -0.0 % 360 and tiny negatives can round up to exactly 360.
    if a >= 360.0 {
        0.0
    } else {
        a
    }
}

/// Smallest absolute difference between two angles in degrees.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let d = normalize_degrees(a - b);
    d.min(360.0 - d)
}
