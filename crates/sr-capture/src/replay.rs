use crate::{to_reference, Capture};
use anyhow::{Context, Result};
use image::RgbaImage;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

/// Plays back previously recorded frames through the same interface as a
/// live window.
///
/// Once the recording is exhausted the last frame keeps being returned, so a
/// controller reading from a replay sees a frozen game rather than an error.
pub struct ReplayCapture {
    frames: VecDeque<RgbaImage>,
    last: Option<RgbaImage>,
    served: usize,
}

impl ReplayCapture {
    pub fn from_frames(frames: Vec<RgbaImage>) -> Self {
        Self {
            frames: frames.into(),
            last: None,
            served: 0,
        }
    }

    /// Load every `.png` in `dir`, ordered by file name.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("png"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?
                .to_rgba8();
            frames.push(to_reference(img));
        }

        info!("Replay loaded {} frame(s) from {}", frames.len(), dir.display());
        Ok(Self::from_frames(frames))
    }

    /// Number of frames handed out so far.
    pub fn served(&self) -> usize {
        self.served
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl Capture for ReplayCapture {
    fn screenshot(&mut self) -> Result<RgbaImage> {
        if let Some(frame) = self.frames.pop_front() {
            self.last = Some(frame.clone());
            self.served += 1;
            return Ok(frame);
        }
        debug!("Replay exhausted, repeating last frame");
        self.served += 1;
        self.last.clone().context("Replay has no frames")
    }
}
