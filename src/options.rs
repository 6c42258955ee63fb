use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const MAX_TARGET_COLORS: usize = 1024;
pub const MAX_KMEANS_ITERATIONS: usize = 64;
pub const MAX_SMOOTHING_PASSES: usize = 16;
pub const MAX_MERGE_PASSES: usize = 64;
pub const MAX_ZOOM_LEVELS: u32 = 12;
pub const DEFAULT_SOURCE_IMAGE_MAX_BYTES: usize = 1 << 20;

/// Color quantization strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Sampled k-means over RGB.
    #[default]
    #[serde(rename = "local-kmeans")]
    KMeans,
    /// Per-channel posterization, keeping the most populous buckets.
    #[serde(rename = "local-posterize")]
    Posterize,
    /// Superpixel-like clustering over color and position.
    #[serde(rename = "organic-slic")]
    Organic,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::KMeans, Algorithm::Posterize, Algorithm::Organic];

    pub fn id(self) -> &'static str {
        match self {
            Algorithm::KMeans => "local-kmeans",
            Algorithm::Posterize => "local-posterize",
            Algorithm::Organic => "organic-slic",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Algorithm::KMeans => "Local palette clustering (k-means)",
            Algorithm::Posterize => "Local posterize & merge",
            Algorithm::Organic => "Organic superpixels (curved gradients)",
        }
    }

    /// Lenient lookup: anything unrecognised resolves to the default algorithm.
    pub fn from_name(name: &str) -> Algorithm {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim();
        Algorithm::ALL
            .into_iter()
            .find(|a| a.id() == key)
            .ok_or_else(|| Error::UnknownAlgorithm(key.to_owned()))
    }
}

fn lenient_algorithm<'de, D>(deserializer: D) -> std::result::Result<Algorithm, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(Algorithm::from_name(&name))
}

/// Knobs for a single generation run.
///
/// Every field has a default so a partial JSON document is a valid
/// configuration. Call [`GenerationOptions::normalized`] before use; the
/// pipeline does this itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationOptions {
    /// Unknown names fall back to the default algorithm.
    #[serde(deserialize_with = "lenient_algorithm")]
    pub algorithm: Algorithm,
    pub target_colors: usize,
    pub min_region: usize,
    pub max_merge_passes: usize,
    /// Regions whose perimeter/area ratio reaches this value are merged
    /// regardless of size. `None` disables the check.
    pub max_perimeter_to_area_ratio: Option<f64>,
    pub sample_rate: f64,
    pub kmeans_iterations: usize,
    pub smoothing_passes: usize,
    /// Seed for the sampling fallbacks. `None` draws from the OS.
    pub seed: Option<u64>,
    pub vector_scene: bool,
    pub max_zoom_levels: u32,
    /// Byte budget for the encoded source image. Zero encodes once at the
    /// highest quality without a budget.
    pub source_image_max_bytes: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::KMeans,
            target_colors: 16,
            min_region: 1,
            max_merge_passes: 6,
            max_perimeter_to_area_ratio: None,
            sample_rate: 1.0,
            kmeans_iterations: 1,
            smoothing_passes: 0,
            seed: None,
            vector_scene: false,
            max_zoom_levels: 6,
            source_image_max_bytes: DEFAULT_SOURCE_IMAGE_MAX_BYTES,
        }
    }
}

impl GenerationOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(text)?.normalized())
    }

    /// Clamp every field into the range the stages accept.
    pub fn normalized(&self) -> Self {
        let sample_rate = if self.sample_rate.is_finite() {
            self.sample_rate.clamp(0.05, 1.0)
        } else {
            1.0
        };
        let ratio = self
            .max_perimeter_to_area_ratio
            .filter(|r| r.is_finite() && *r > 0.0);
        Self {
            algorithm: self.algorithm,
            target_colors: self.target_colors.clamp(1, MAX_TARGET_COLORS),
            min_region: self.min_region.max(1),
            max_merge_passes: self.max_merge_passes.clamp(1, MAX_MERGE_PASSES),
            max_perimeter_to_area_ratio: ratio,
            sample_rate,
            kmeans_iterations: self.kmeans_iterations.clamp(1, MAX_KMEANS_ITERATIONS),
            smoothing_passes: self.smoothing_passes.min(MAX_SMOOTHING_PASSES),
            seed: self.seed,
            vector_scene: self.vector_scene,
            max_zoom_levels: self.max_zoom_levels.min(MAX_ZOOM_LEVELS),
            source_image_max_bytes: self.source_image_max_bytes,
        }
    }
}
