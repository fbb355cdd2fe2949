//! Generated maps and minimap frames for tests.

use image::{Rgba, RgbaImage};
use sr_data::Region;

use crate::geometry::WorldPoint;
use crate::minimap::render_arrow_mask;

pub const MINIMAP_SIZE: u32 = 61;
pub const BACKGROUND: Rgba<u8> = Rgba([20, 20, 20, 255]);
pub const ROAD: Rgba<u8> = Rgba([58, 58, 58, 255]);
pub const ARROW: Rgba<u8> = Rgba([0, 192, 255, 255]);
/// Half width of a corridor.
const HALF_WIDTH: i32 = 4;

pub fn region(id: &str, width: u32, height: u32) -> Region {
    Region {
        id: id.to_string(),
        planet_id: "test".to_string(),
        area_id: "test".to_string(),
        name: id.to_string(),
        floor: 1,
        width,
        height,
        has_other_floor: false,
    }
}

fn fill(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    for y in y0.max(0)..y1.min(img.height() as i32) {
        for x in x0.max(0)..x1.min(img.width() as i32) {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn stamp_line(img: &mut RgbaImage, from: (i32, i32), to: (i32, i32)) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).max(1);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let cx = from.0 as f64 + (to.0 - from.0) as f64 * t;
        let cy = from.1 as f64 + (to.1 - from.1) as f64 * t;
        for dy in -HALF_WIDTH..=HALF_WIDTH {
            for dx in -HALF_WIDTH..=HALF_WIDTH {
                if dx * dx + dy * dy > HALF_WIDTH * HALF_WIDTH {
                    continue;
                }
                let x = cx.round() as i32 + dx;
                let y = cy.round() as i32 + dy;
                if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                    img.put_pixel(x as u32, y as u32, ROAD);
                }
            }
        }
    }
}

/// Irregular corridors and rooms, all inside the top-left 205x205 pixels.
/// The rest of the map is empty background.
pub fn corridor_map(width: u32, height: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(width, height, BACKGROUND);
    let h = HALF_WIDTH;

    // (y, x_from, x_to)
    for (y, x0, x1) in [(40, 20, 180), (100, 30, 120), (100, 150, 200), (175, 60, 190)] {
        fill(&mut img, x0, y - h, x1, y + h, ROAD);
    }
    // (x, y_from, y_to)
    for (x, y0, y1) in [(100, 40, 200), (40, 40, 130), (160, 20, 110), (190, 100, 175)] {
        fill(&mut img, x - h, y0, x + h, y1, ROAD);
    }
    stamp_line(&mut img, (40, 130), (95, 185));
    stamp_line(&mut img, (120, 60), (150, 90));

    // Rooms.
    fill(&mut img, 120, 120, 146, 151, ROAD);
    fill(&mut img, 20, 150, 46, 191, ROAD);
    fill(&mut img, 104, 130, 120, 138, ROAD);
    img
}

/// A minimap crop centred on `center` with the player arrow at `facing`
/// degrees. Pixels outside the minimap disc are black.
pub fn minimap_frame(map: &RgbaImage, center: WorldPoint, facing: f64) -> RgbaImage {
    let size = MINIMAP_SIZE as i32;
    let c = size / 2;
    let ox = center.x.round() as i32 - c;
    let oy = center.y.round() as i32 - c;
    let radius = c as f64;

    let mut img = RgbaImage::from_fn(MINIMAP_SIZE, MINIMAP_SIZE, |x, y| {
        let d = ((x as f64 - c as f64).powi(2) + (y as f64 - c as f64).powi(2)).sqrt();
        if d > radius {
            return Rgba([0, 0, 0, 255]);
        }
        let wx = ox + x as i32;
        let wy = oy + y as i32;
        if wx >= 0 && wy >= 0 && (wx as u32) < map.width() && (wy as u32) < map.height() {
            *map.get_pixel(wx as u32, wy as u32)
        } else {
            BACKGROUND
        }
    });

    let arrow = render_arrow_mask(MINIMAP_SIZE, 1.0, facing);
    for (x, y, p) in arrow.enumerate_pixels() {
        if p[0] > 0 {
            img.put_pixel(x, y, ARROW);
        }
    }
    img
}

/// Opaque `size` x `size` icon of random grey 4x4 blocks, distinct per
/// `seed`. Gives FAST plenty of corners to lock onto.
pub fn landmark_icon(size: u32, seed: u64) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        let (bx, by) = ((x / 4) as u64, (y / 4) as u64);
        let mut h = seed
            .wrapping_add(bx.wrapping_mul(0x9e37_79b9_7f4a_7c15))
            .wrapping_add(by.wrapping_mul(0xc2b2_ae3d_27d4_eb4f));
        h ^= h >> 30;
        h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        h ^= h >> 27;
        h = h.wrapping_mul(0x94d0_49bb_1331_11eb);
        h ^= h >> 31;
        let v = (h >> 56) as u8;
        Rgba([v, v, v, 255])
    })
}

/// `size` x `size` minimap crop on plain background with `icon` pasted with
/// its top-left corner at `at`.
pub fn minimap_with_icon(size: u32, icon: &RgbaImage, at: (i64, i64)) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, BACKGROUND);
    image::imageops::replace(&mut img, icon, at.0, at.1);
    img
}
