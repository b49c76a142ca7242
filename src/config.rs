//! Settings module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user file overrides any subset of keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [render]
//! analysis_long_edge = 1024   # Detection runs on a downsampled copy
//! master_long_edge = 3072     # Kept master for later re-crops
//! master_quality = 88
//! render_quality = 85
//! quality_floor = 65
//! quality_step = 5
//! master_max_bytes = 2500000
//! small_max_bytes = 450000
//! medium_max_bytes = 650000
//! large_max_bytes = 900000
//!
//! [render.targets]
//! small = { width = 510, height = 510 }
//! medium = { width = 1092, height = 510 }
//! large = { width = 1092, height = 1146 }
//!
//! [focus.face]
//! base = 3.0
//! per_area = 2.0
//!
//! [scoring]
//! sharpness_normaliser = 18.0
//! extreme_zoom_area = 0.14
//!
//! [shuffle]
//! batch_size = 6
//! rotation_minutes = 60
//!
//! [shuffle.rules]
//! include_screenshots = false
//! minimum_pixel_dimension = 800
//! sort_order = "newest_first"
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override only the values you want:
//!
//! ```toml
//! [scoring]
//! tight_area = 0.25
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::candidates::ShuffleRules;
use crate::focus::FocusWeights;
use crate::imaging::{EncodeParams, Quality};
use crate::scorer::ScorerConfig;
use crate::types::{RenderTargets, SizeClass};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from `config.toml`.
///
/// Resolved once and passed explicitly into the pipeline, the scorer and
/// the shuffle engine. Nothing in the library reads it implicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Output sizes, byte budgets and encode qualities.
    pub render: RenderConfig,
    /// Focus box weighting per detection kind.
    pub focus: FocusWeights,
    /// Quality scorer constants.
    pub scoring: ScorerConfig,
    /// Shuffle pool settings.
    pub shuffle: ShuffleConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.render;
        for size in SizeClass::ALL {
            let px = r.targets.get(size);
            if px.width > 8192 || px.height > 8192 {
                return Err(ConfigError::Validation(format!(
                    "render.targets.{size} must be at most 8192 px per side"
                )));
            }
            if r.max_bytes(size) == 0 {
                return Err(ConfigError::Validation(format!(
                    "render.{size}_max_bytes must be non-zero"
                )));
            }
        }
        if r.analysis_long_edge < 64 || r.master_long_edge < 64 {
            return Err(ConfigError::Validation(
                "render.analysis_long_edge and render.master_long_edge must be at least 64".into(),
            ));
        }
        for (name, q) in [
            ("master_quality", r.master_quality),
            ("render_quality", r.render_quality),
            ("quality_floor", r.quality_floor),
        ] {
            if !(1..=100).contains(&q) {
                return Err(ConfigError::Validation(format!(
                    "render.{name} must be 1-100"
                )));
            }
        }
        if r.quality_step == 0 {
            return Err(ConfigError::Validation(
                "render.quality_step must be non-zero".into(),
            ));
        }
        self.scoring.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Output sizes, budgets and encode qualities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub targets: RenderTargets,
    pub analysis_long_edge: u32,
    pub master_long_edge: u32,
    pub master_quality: u32,
    pub render_quality: u32,
    pub quality_floor: u32,
    pub quality_step: u32,
    pub master_max_bytes: usize,
    pub small_max_bytes: usize,
    pub medium_max_bytes: usize,
    pub large_max_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            targets: RenderTargets::default(),
            analysis_long_edge: 1024,
            master_long_edge: 3072,
            master_quality: 88,
            render_quality: 85,
            quality_floor: 65,
            quality_step: 5,
            master_max_bytes: 2_500_000,
            small_max_bytes: 450_000,
            medium_max_bytes: 650_000,
            large_max_bytes: 900_000,
        }
    }
}

impl RenderConfig {
    pub fn max_bytes(&self, size: SizeClass) -> usize {
        match size {
            SizeClass::Small => self.small_max_bytes,
            SizeClass::Medium => self.medium_max_bytes,
            SizeClass::Large => self.large_max_bytes,
        }
    }

    fn params(&self, start: u32, max_bytes: usize) -> EncodeParams {
        EncodeParams {
            floor: Quality::new(self.quality_floor),
            step: self.quality_step,
            ..EncodeParams::new(Quality::new(start), max_bytes)
        }
    }

    pub fn encode_params(&self, size: SizeClass) -> EncodeParams {
        self.params(self.render_quality, self.max_bytes(size))
    }

    pub fn master_encode_params(&self) -> EncodeParams {
        self.params(self.master_quality, self.master_max_bytes)
    }
}

/// Memories pool limits. Values are clamped when used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoriesConfig {
    /// How many calendar years to look back (1-50).
    pub years_back: u32,
    /// Candidates kept per year before interleaving (1-250).
    pub per_year_limit: usize,
    /// Maximum manifest entries (1-2000).
    pub max_entries: usize,
    /// Rotation interval for memories pools.
    pub rotation_minutes: i64,
}

impl Default for MemoriesConfig {
    fn default() -> Self {
        Self {
            years_back: 20,
            per_year_limit: 40,
            max_entries: 200,
            rotation_minutes: 1440,
        }
    }
}

/// Shuffle pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShuffleConfig {
    /// Entries prepared per batch pass (0-50).
    pub batch_size: usize,
    /// Rotation interval for album pools; 0 disables scheduled rotation.
    pub rotation_minutes: i64,
    pub memories: MemoriesConfig,
    pub rules: ShuffleRules,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            rotation_minutes: 60,
            memories: MemoriesConfig::default(),
            rules: ShuffleRules::default(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Settings::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path` (if given and present) over stock defaults.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = match path {
        Some(p) => load_raw_config(p)?,
        None => None,
    };
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Smart Photo Configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Long edge of the copy subject detection runs on.
analysis_long_edge = 1024

# Long edge of the kept master used for later re-crops.
master_long_edge = 3072

# JPEG start qualities. Encoding steps down by quality_step (never below
# quality_floor, at most 6 attempts) until the output fits its byte budget.
master_quality = 88
render_quality = 85
quality_floor = 65
quality_step = 5

# Byte budgets.
master_max_bytes = 2500000
small_max_bytes = 450000
medium_max_bytes = 650000
large_max_bytes = 900000

# Output pixel sizes.
[render.targets]
small = { width = 510, height = 510 }
medium = { width = 1092, height = 510 }
large = { width = 1092, height = 1146 }

# ---------------------------------------------------------------------------
# Focus weighting: weight = base + area * per_area
# ---------------------------------------------------------------------------
[focus]
face = { base = 3.0, per_area = 2.0 }
human = { base = 2.7, per_area = 1.8 }
animal = { base = 2.4, per_area = 1.5 }
saliency = { base = 1.0, per_area = 1.0 }

# ---------------------------------------------------------------------------
# Quality scoring (empirically tuned; total is clamped to [-10, 10])
# ---------------------------------------------------------------------------
[scoring]
thumbnail_long_edge = 512
face_bonus = 1.0
face_bonus_cap = 2.4
animal_bonus = 0.8
animal_bonus_cap = 1.6
sharpness_normaliser = 18.0
sharpness_weight = 1.6
blurry_below = 0.12
blurry_penalty = 0.8
dark_level = 20
bright_level = 235
exposure_fraction = 0.65
exposure_penalty = 1.4
contrast_normaliser = 64.0
flat_below = 0.08
flat_penalty = 0.6
extreme_zoom_area = 0.14
extreme_zoom_penalty = 1.4
zoom_area = 0.22
zoom_penalty = 0.9
tight_area = 0.30
tight_penalty = 0.4

# ---------------------------------------------------------------------------
# Shuffle pools
# ---------------------------------------------------------------------------
[shuffle]
# Entries prepared per batch pass.
batch_size = 6
# Album rotation interval in minutes (0 = only advance on request).
rotation_minutes = 60

[shuffle.memories]
years_back = 20
per_year_limit = 40
max_entries = 200
rotation_minutes = 1440

[shuffle.rules]
include_screenshots = false
# Shorter side must be at least this many pixels (200-4000).
minimum_pixel_dimension = 800
# newest_first, oldest_first or random
sort_order = "newest_first"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers when preparing several pools.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
