//! Binary mask helpers. A mask is a `GrayImage` where non-zero means set;
//! every helper here writes 0 or 255.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

/// Pixels whose RGB euclidean distance to `color` is at most `tolerance`.
pub fn color_distance_mask(img: &RgbaImage, color: [u8; 3], tolerance: f64) -> GrayImage {
    let tol2 = tolerance * tolerance;
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        let d2: f64 = (0..3)
            .map(|c| (p[c] as f64 - color[c] as f64).powi(2))
            .sum();
        if d2 <= tol2 {
            ON
        } else {
            OFF
        }
    })
}

/// Pixels with luma in `lo..=hi`.
pub fn luma_band(gray: &GrayImage, lo: u8, hi: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        if v >= lo && v <= hi {
            ON
        } else {
            OFF
        }
    })
}

/// Pixels matching an arbitrary RGBA predicate.
pub fn select_pixels(img: &RgbaImage, pred: impl Fn(&image::Rgba<u8>) -> bool) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if pred(img.get_pixel(x, y)) {
            ON
        } else {
            OFF
        }
    })
}

/// Size of every 8-connected component of set pixels, indexed by label.
fn component_sizes(mask: &GrayImage) -> (image::ImageBuffer<Luma<u32>, Vec<u32>>, Vec<usize>) {
    let labels = connected_components(mask, Connectivity::Eight, OFF);
    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0usize; max_label + 1];
    for p in labels.pixels() {
        sizes[p[0] as usize] += 1;
    }
    (labels, sizes)
}

/// Drop connected components smaller than `min_size` pixels.
pub fn remove_small_components(mask: &GrayImage, min_size: usize) -> GrayImage {
    let (labels, sizes) = component_sizes(mask);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0] as usize;
        if label != 0 && sizes[label] >= min_size {
            ON
        } else {
            OFF
        }
    })
}

/// Set every unset component smaller than `max_size` pixels.
pub fn fill_small_holes(mask: &GrayImage, max_size: usize) -> GrayImage {
    let inverted = invert(mask);
    let (labels, sizes) = component_sizes(&inverted);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            return ON;
        }
        let label = labels.get_pixel(x, y)[0] as usize;
        if label != 0 && sizes[label] < max_size {
            ON
        } else {
            OFF
        }
    })
}

/// Chebyshev dilation by `radius` pixels.
pub fn dilate_mask(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    dilate(mask, Norm::LInf, radius)
}

/// Filled disc of `radius` centred in a `size` x `size` image.
pub fn circle_mask(size: u32, radius: f64) -> GrayImage {
    let c = (size as f64 - 1.0) / 2.0;
    GrayImage::from_fn(size, size, |x, y| {
        let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
        if d <= radius {
            ON
        } else {
            OFF
        }
    })
}

/// Ring between `inner` and `outer` radius around the image centre.
pub fn annulus_mask(width: u32, height: u32, inner: f64, outer: f64) -> GrayImage {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    GrayImage::from_fn(width, height, |x, y| {
        let d = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
        if d >= inner && d <= outer {
            ON
        } else {
            OFF
        }
    })
}

pub fn invert(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > 0 {
            OFF
        } else {
            ON
        }
    })
}

fn combine(a: &GrayImage, b: &GrayImage, f: impl Fn(bool, bool) -> bool) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let va = a.get_pixel(x, y)[0] > 0;
        let vb = b.get_pixel_checked(x, y).map(|p| p[0] > 0).unwrap_or(false);
        if f(va, vb) {
            ON
        } else {
            OFF
        }
    })
}

pub fn or(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x || y)
}

pub fn and(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x && y)
}

/// `a` without the pixels set in `b`.
pub fn subtract(a: &GrayImage, b: &GrayImage) -> GrayImage {
    combine(a, b, |x, y| x && !y)
}

pub fn count_nonzero(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}

/// Intersection over union of two same-sized masks. Two empty masks give 0.
pub fn iou(a: &GrayImage, b: &GrayImage) -> f64 {
    let mut inter = 0usize;
    let mut union = 0usize;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let va = pa[0] > 0;
        let vb = pb[0] > 0;
        if va && vb {
            inter += 1;
        }
        if va || vb {
            union += 1;
        }
    }
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Centroid of the set pixels, if any.
pub fn centroid(mask: &GrayImage) -> Option<(f64, f64)> {
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut n = 0usize;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] > 0 {
            sx += x as f64;
            sy += y as f64;
            n += 1;
        }
    }
    (n > 0).then(|| (sx / n as f64, sy / n as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(mask: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mask.put_pixel(x, y, ON);
            }
        }
    }

    #[test]
    fn test_remove_small_components() {
        let mut mask = GrayImage::new(40, 40);
        blob(&mut mask, 2, 2, 3, 3); // 9 px
        blob(&mut mask, 20, 20, 10, 10); // 100 px
        let out = remove_small_components(&mask, 50);
        assert_eq!(count_nonzero(&out), 100);
        assert_eq!(out.get_pixel(3, 3)[0], 0);
    }

    #[test]
    fn test_fill_small_holes_keeps_background() {
        let mut mask = GrayImage::new(30, 30);
        blob(&mut mask, 5, 5, 10, 10);
        mask.put_pixel(9, 9, OFF);
        let out = fill_small_holes(&mask, 50);
        assert_eq!(out.get_pixel(9, 9)[0], 255);
        // The large outside area stays unset.
        assert_eq!(out.get_pixel(25, 25)[0], 0);
    }

    #[test]
    fn test_dilate_grows_by_one() {
        let mut mask = GrayImage::new(9, 9);
        mask.put_pixel(4, 4, ON);
        let out = dilate_mask(&mask, 1);
        assert_eq!(count_nonzero(&out), 9);
    }

    #[test]
    fn test_subtract_and_iou() {
        let mut a = GrayImage::new(10, 10);
        let mut b = GrayImage::new(10, 10);
        blob(&mut a, 0, 0, 4, 4);
        blob(&mut b, 2, 0, 4, 4);
        assert_eq!(count_nonzero(&subtract(&a, &b)), 8);
        assert!((iou(&a, &b) - 8.0 / 24.0).abs() < 1e-9);
        assert_eq!(iou(&GrayImage::new(3, 3), &GrayImage::new(3, 3)), 0.0);
    }

    #[test]
    fn test_color_distance_mask() {
        let mut img = RgbaImage::from_pixel(4, 1, image::Rgba([0, 0, 0, 255]));
        img.put_pixel(1, 0, image::Rgba([10, 190, 250, 255]));
        let mask = color_distance_mask(&img, [0, 192, 255], 30.0);
        assert_eq!(count_nonzero(&mask), 1);
        assert_eq!(mask.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_circle_mask_symmetric() {
        let c = circle_mask(21, 10.0);
        assert_eq!(c.get_pixel(10, 10)[0], 255);
        assert_eq!(c.get_pixel(0, 0)[0], 0);
        assert_eq!(c.get_pixel(0, 10)[0], c.get_pixel(20, 10)[0]);
    }
}
