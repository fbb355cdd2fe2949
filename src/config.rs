//! Persistent settings.
//!
//! Stored as JSON in the platform config directory. Every section falls back
//! to its defaults, so a partial file is fine.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sr_move::{BattleConfig, MoveConfig};
use sr_vision::{AnalyzerConfig, EstimatorConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Atlas directory (`map/`, `template/`). Found next to the executable
    /// when unset.
    pub data_dir: Option<PathBuf>,
    /// Lower-case substrings of the game window title.
    pub window_titles: Vec<String>,
    /// Prepared large maps kept in memory.
    pub map_cache_size: usize,
    /// Describe large maps with BRIEF features (slower to load).
    pub use_features: bool,
    /// A failed route is retried this many times in total.
    pub max_route_attempts: u32,
    pub analyzer: AnalyzerConfig,
    pub estimator: EstimatorConfig,
    pub movement: MoveConfig,
    pub battle: BattleConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            window_titles: Vec::new(),
            map_cache_size: 4,
            use_features: false,
            max_route_attempts: 2,
            analyzer: AnalyzerConfig::default(),
            estimator: EstimatorConfig::default(),
            movement: MoveConfig::default(),
            battle: BattleConfig::default(),
        }
    }
}

impl Settings {
    pub fn path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("config_dir() unavailable")?;
        Ok(base.join("sr-autopilot").join("settings.json"))
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// broken.
    pub fn load_or_default() -> Self {
        match Self::path().and_then(|p| Self::load_from(&p)) {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load settings; using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
        let settings = serde_json::from_str(&json).with_context(|| format!("parse {:?}", path))?;
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize settings")?;
        fs::write(path, json).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    /// The configured data directory, else `data/` next to the executable
    /// or at the project root, else `./data`.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()));
        if let Some(dir) = exe_dir {
            for candidate in dir.ancestors().take(4) {
                let data = candidate.join("data");
                if data.join("map").exists() {
                    return data;
                }
            }
        }
        PathBuf::from("data")
    }
}
