use image::GrayImage;
use imageproc::template_matching::{match_template, MatchTemplateMethod};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Most candidates a single template search will report.
const MAX_CANDIDATES: usize = 32;

/// Location and quality of one match of a template inside a source image.
///
/// `confidence` is on whatever scale the producing primitive uses (NCC score
/// or feature inlier count). Never compare confidences from different
/// primitives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub confidence: f64,
    /// Top-left corner in source pixels.
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub angle: Option<f64>,
    pub scale: Option<f64>,
}

impl MatchResult {
    pub fn new(confidence: f64, x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            confidence,
            x,
            y,
            w,
            h,
            angle: None,
            scale: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Match results with near-duplicate suppression.
///
/// Invariant: no two kept results have centres closer than `merge_distance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResultList {
    merge_distance: f64,
    items: Vec<MatchResult>,
}

impl MatchResultList {
    pub fn new(merge_distance: f64) -> Self {
        Self {
            merge_distance,
            items: Vec::new(),
        }
    }

    /// Insert `result`, merging it with any kept result within
    /// `merge_distance`. The higher confidence survives; on a tie the
    /// result already in the list is kept.
    pub fn push(&mut self, result: MatchResult) {
        let (cx, cy) = result.center();
        let near = |r: &MatchResult| {
            let (rx, ry) = r.center();
            ((rx - cx).powi(2) + (ry - cy).powi(2)).sqrt() < self.merge_distance
        };

        if self
            .items
            .iter()
            .any(|r| near(r) && r.confidence >= result.confidence)
        {
            return;
        }
        self.items.retain(|r| !near(r));
        self.items.push(result);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchResult> {
        self.items.iter()
    }

    pub fn max(&self) -> Option<&MatchResult> {
        self.items.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Template search over grayscale rasters.
pub trait TemplateMatcher: Send + Sync {
    /// All placements of `template` inside `source` scoring at least
    /// `threshold`. Pixels where `mask` is zero are ignored.
    fn match_template(
        &self,
        source: &GrayImage,
        template: &GrayImage,
        threshold: f64,
        mask: Option<&GrayImage>,
    ) -> MatchResultList;
}

/// Normalized cross-correlation matcher.
///
/// Unmasked searches go through `imageproc` (normalized cross-correlation).
/// Masked searches use a zero-mean NCC restricted to the mask pixels.
#[derive(Debug, Clone, Default)]
pub struct NccMatcher;

impl TemplateMatcher for NccMatcher {
    fn match_template(
        &self,
        source: &GrayImage,
        template: &GrayImage,
        threshold: f64,
        mask: Option<&GrayImage>,
    ) -> MatchResultList {
        let (tw, th) = template.dimensions();
        let mut out = MatchResultList::new((tw.min(th) as f64 / 2.0).max(1.0));
        if tw == 0 || th == 0 || tw > source.width() || th > source.height() {
            return out;
        }

        let (scores, sw) = match mask {
            Some(mask) => masked_ncc_scores(source, template, mask),
            None => {
                let result = match_template(source, template, MatchTemplateMethod::CrossCorrelationNormalized);
                let w = result.width();
                (result.into_raw(), w)
            }
        };

        let mut candidates: Vec<(usize, f32)> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_finite() && **s as f64 >= threshold)
            .map(|(i, s)| (i, *s))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (i, score) in candidates.into_iter() {
            let x = (i as u32 % sw) as f64;
            let y = (i as u32 / sw) as f64;
            out.push(MatchResult::new(score as f64, x, y, tw as f64, th as f64));
            if out.len() >= MAX_CANDIDATES {
                break;
            }
        }

        debug!(
            "template {}x{} in {}x{}: {} candidate(s) >= {:.2}",
            tw,
            th,
            source.width(),
            source.height(),
            out.len(),
            threshold
        );
        out
    }
}

/// Zero-mean NCC of `template` at every placement inside `source`, using only
/// template pixels where `mask` is non-zero. Returns row-major scores and the
/// score-map width. Degenerate placements (flat source or flat template) give
/// NaN.
fn masked_ncc_scores(source: &GrayImage, template: &GrayImage, mask: &GrayImage) -> (Vec<f32>, u32) {
    let (sw, sh) = source.dimensions();
    let (tw, th) = template.dimensions();
    let out_w = sw - tw + 1;
    let out_h = sh - th + 1;

    // Template pixels as (offset in source row-major, zero-mean value).
    let mut taps: Vec<(usize, f64)> = Vec::new();
    let mut sum = 0.0;
    for y in 0..th {
        for x in 0..tw {
            let in_mask = mask
                .get_pixel_checked(x, y)
                .map(|p| p[0] > 0)
                .unwrap_or(false);
            if in_mask {
                let v = template.get_pixel(x, y)[0] as f64;
                taps.push(((y * sw + x) as usize, v));
                sum += v;
            }
        }
    }

    let n = taps.len() as f64;
    if taps.is_empty() {
        return (vec![f32::NAN; (out_w * out_h) as usize], out_w);
    }
    let mean = sum / n;
    let mut t_var = 0.0;
    for tap in taps.iter_mut() {
        tap.1 -= mean;
        t_var += tap.1 * tap.1;
    }

    let src: Vec<f64> = source.pixels().map(|p| p[0] as f64).collect();
    let mut scores = Vec::with_capacity((out_w * out_h) as usize);
    for y in 0..out_h {
        for x in 0..out_w {
            let base = (y * sw + x) as usize;
            let mut s = 0.0;
            let mut s2 = 0.0;
            let mut cross = 0.0;
            for &(off, t) in &taps {
                let v = src[base + off];
                s += v;
                s2 += v * v;
                cross += v * t;
            }
            let s_var = s2 - s * s / n;
            let denom = (t_var * s_var).sqrt();
            if denom < 1e-10 {
                scores.push(f32::NAN);
            } else {
                scores.push((cross / denom) as f32);
            }
        }
    }
    (scores, out_w)
}
