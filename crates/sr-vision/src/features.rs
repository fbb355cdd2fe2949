//! Keypoint features: FAST-9 corners with BRIEF binary descriptors.
//!
//! The matcher only models translation plus uniform scale, which is all the
//! minimap-to-large-map relation needs (the minimap is north-up).

use image::GrayImage;
use imageproc::corners::corners_fast9;
use std::sync::OnceLock;
use tracing::debug;

/// Half size of the BRIEF sampling patch.
const PATCH_RADIUS: i32 = 8;
const DESCRIPTOR_BITS: usize = 256;
const DESCRIPTOR_WORDS: usize = DESCRIPTOR_BITS / 64;

pub type Descriptor = [u64; DESCRIPTOR_WORDS];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// Keypoints and their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Subset of the features whose keypoint passes `keep`.
    pub fn filter(&self, keep: impl Fn(&Keypoint) -> bool) -> FeatureSet {
        let mut out = FeatureSet::default();
        for (k, d) in self.keypoints.iter().zip(self.descriptors.iter()) {
            if keep(k) {
                out.keypoints.push(*k);
                out.descriptors.push(*d);
            }
        }
        out
    }
}

/// Template-to-source transform found by feature consensus:
/// `source = template * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
    /// Matches agreeing with the transform.
    pub inliers: usize,
}

impl FeatureMatch {
    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }
}

pub trait FeatureMatcher: Send + Sync {
    /// Detect keypoints (only where `mask` is set, if given) and describe them.
    fn detect_and_describe(&self, image: &GrayImage, mask: Option<&GrayImage>) -> FeatureSet;

    /// Find where `template` sits in `source`. `None` when there is no
    /// consistent transform.
    fn match_features(&self, source: &FeatureSet, template: &FeatureSet) -> Option<FeatureMatch>;
}

#[derive(Debug, Clone)]
pub struct BriefMatcher {
    pub fast_threshold: u8,
    pub max_keypoints: usize,
    /// Largest hamming distance accepted for a match.
    pub max_distance: u32,
    /// Lowe ratio between best and second-best distance.
    pub ratio: f64,
    /// Offsets within this many pixels vote for the same transform.
    pub cluster_radius: f64,
}

impl Default for BriefMatcher {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 5000,
            max_distance: 64,
            ratio: 0.8,
            cluster_radius: 3.0,
        }
    }
}

/// PCG32 (XSH-RR), used only to lay out the fixed BRIEF sampling pattern.
struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    const MULTIPLIER: u64 = 6_364_136_223_846_793_005;

    fn new(seed: u64, seq: u64) -> Self {
        let mut rng = Pcg32 {
            state: 0,
            inc: (seq << 1) | 1,
        };
        rng.advance();
        rng.state = rng.state.wrapping_add(seed);
        rng.advance();
        rng
    }

    fn advance(&mut self) {
        self.state = self.state.wrapping_mul(Self::MULTIPLIER).wrapping_add(self.inc);
    }

    fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.advance();
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        (xorshifted >> rot) | (xorshifted << (rot.wrapping_neg() & 31))
    }

    /// Uniform in `-r..=r`.
    fn next_offset(&mut self, r: i32) -> i32 {
        (self.next_u32() % (2 * r as u32 + 1)) as i32 - r
    }
}

type SamplePair = ((i32, i32), (i32, i32));

fn sampling_pattern() -> &'static [SamplePair] {
    static PATTERN: OnceLock<Vec<SamplePair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = Pcg32::new(0x5eed_b41e, 7);
        (0..DESCRIPTOR_BITS)
            .map(|_| {
                (
                    (rng.next_offset(PATCH_RADIUS), rng.next_offset(PATCH_RADIUS)),
                    (rng.next_offset(PATCH_RADIUS), rng.next_offset(PATCH_RADIUS)),
                )
            })
            .collect()
    })
}

fn compute_brief(smoothed: &GrayImage, x: u32, y: u32) -> Option<Descriptor> {
    let r = PATCH_RADIUS as u32;
    if x < r || y < r || x + r >= smoothed.width() || y + r >= smoothed.height() {
        return None;
    }
    let mut desc = [0u64; DESCRIPTOR_WORDS];
    for (i, ((ax, ay), (bx, by))) in sampling_pattern().iter().enumerate() {
        let p1 = smoothed.get_pixel((x as i32 + ax) as u32, (y as i32 + ay) as u32)[0];
        let p2 = smoothed.get_pixel((x as i32 + bx) as u32, (y as i32 + by) as u32)[0];
        if p1 < p2 {
            desc[i / 64] |= 1u64 << (i % 64);
        }
    }
    Some(desc)
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

impl FeatureMatcher for BriefMatcher {
    fn detect_and_describe(&self, image: &GrayImage, mask: Option<&GrayImage>) -> FeatureSet {
        let smoothed = image::imageops::blur(image, 1.2);
        let mut corners = corners_fast9(image, self.fast_threshold);
        corners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut set = FeatureSet::default();
        for corner in corners {
            if let Some(mask) = mask {
                let inside = mask
                    .get_pixel_checked(corner.x, corner.y)
                    .map(|p| p[0] > 0)
                    .unwrap_or(false);
                if !inside {
                    continue;
                }
            }
            if let Some(desc) = compute_brief(&smoothed, corner.x, corner.y) {
                set.keypoints.push(Keypoint {
                    x: corner.x as f32,
                    y: corner.y as f32,
                    score: corner.score,
                });
                set.descriptors.push(desc);
            }
            if set.len() >= self.max_keypoints {
                break;
            }
        }
        set
    }

    fn match_features(&self, source: &FeatureSet, template: &FeatureSet) -> Option<FeatureMatch> {
        if source.is_empty() || template.is_empty() {
            return None;
        }

        // (template point, source point)
        let mut pairs: Vec<((f64, f64), (f64, f64))> = Vec::new();
        for (ti, td) in template.descriptors.iter().enumerate() {
            let mut best = (u32::MAX, 0usize);
            let mut second = u32::MAX;
            for (si, sd) in source.descriptors.iter().enumerate() {
                let d = hamming_distance(td, sd);
                if d < best.0 {
                    second = best.0;
                    best = (d, si);
                } else if d < second {
                    second = d;
                }
            }
            if best.0 > self.max_distance {
                continue;
            }
            if second != u32::MAX && best.0 as f64 >= self.ratio * second as f64 {
                continue;
            }
            let tk = template.keypoints[ti];
            let sk = source.keypoints[best.1];
            pairs.push(((tk.x as f64, tk.y as f64), (sk.x as f64, sk.y as f64)));
        }

        if pairs.len() < 2 {
            return None;
        }

        let scale = estimate_scale(&pairs);
        let offsets: Vec<(f64, f64)> = pairs
            .iter()
            .map(|((tx, ty), (sx, sy))| (sx - tx * scale, sy - ty * scale))
            .collect();

        let r2 = self.cluster_radius * self.cluster_radius;
        let near = |a: &(f64, f64), b: &(f64, f64)| (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2) <= r2;
        let seed = offsets
            .iter()
            .max_by_key(|o| offsets.iter().filter(|p| near(*o, *p)).count())?;
        let inliers: Vec<&(f64, f64)> = offsets.iter().filter(|p| near(seed, *p)).collect();
        let n = inliers.len() as f64;
        let offset_x = inliers.iter().map(|p| p.0).sum::<f64>() / n;
        let offset_y = inliers.iter().map(|p| p.1).sum::<f64>() / n;

        debug!(
            "feature match: {} pairs, {} inliers, scale {:.3}",
            pairs.len(),
            inliers.len(),
            scale
        );
        Some(FeatureMatch {
            offset_x,
            offset_y,
            scale,
            inliers: inliers.len(),
        })
    }
}

/// Median ratio of source to template distances over match pairs.
fn estimate_scale(pairs: &[((f64, f64), (f64, f64))]) -> f64 {
    const MAX_PAIRS: usize = 60;
    let pairs = &pairs[..pairs.len().min(MAX_PAIRS)];
    let mut ratios = Vec::new();
    for i in 0..pairs.len() {
        for j in i + 1..pairs.len() {
            let (ti, si) = pairs[i];
            let (tj, sj) = pairs[j];
            let td = ((ti.0 - tj.0).powi(2) + (ti.1 - tj.1).powi(2)).sqrt();
            if td < 5.0 {
                continue;
            }
            let sd = ((si.0 - sj.0).powi(2) + (si.1 - sj.1).powi(2)).sqrt();
            ratios.push(sd / td);
        }
    }
    if ratios.is_empty() {
        return 1.0;
    }
    ratios.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ratios[ratios.len() / 2]
}
