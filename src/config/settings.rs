//! Detection thresholds and tuning knobs
//!
//! Every threshold used by the matcher, the banned-state classifier and the
//! gate monitor lives here. Components receive the sub-structure they need
//! at construction and never read global state.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::vision::VisionError;

/// Main settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local feature extraction parameters
    pub features: FeatureSettings,
    /// Identity matching thresholds
    pub matcher: MatcherSettings,
    /// Banned-state heuristics
    pub banned: BannedSettings,
    /// Context belt geometry
    pub belt: BeltSettings,
    /// Gate/trigger monitor tuning
    pub gate: GateSettings,
    /// Maximum number of clean identities handed to overlay consumers
    pub clean_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            features: FeatureSettings::default(),
            matcher: MatcherSettings::default(),
            banned: BannedSettings::default(),
            belt: BeltSettings::default(),
            gate: GateSettings::default(),
            clean_limit: 4,
        }
    }
}

impl Settings {
    /// Settings for gating on a whole game window rather than a fixed
    /// anchor crop. The anchor is searched over the entire frame, and since
    /// whole-window correlation peaks lower the gate thresholds are relaxed
    /// and a single extra hit is dropped.
    pub fn window_preset() -> Self {
        Self {
            gate: GateSettings {
                search: GateSearch::Window,
                enter_threshold: 0.78,
                stay_threshold: 0.70,
                hits_required: 2,
                misses_required: 3,
                cooldown_ms: 5000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load settings from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VisionError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_json::from_str(&text).map_err(|e| {
            VisionError::ConfigurationError(format!("invalid settings {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject threshold combinations that would make a component meaningless
    pub fn validate(&self) -> Result<(), VisionError> {
        let bad = |msg: &str| Err(VisionError::ConfigurationError(msg.to_string()));

        if !(0.0..=1.0).contains(&self.matcher.lowe_ratio) || self.matcher.lowe_ratio == 0.0 {
            return bad("matcher.lowe_ratio must be in (0, 1]");
        }
        if self.matcher.min_score_margin < 0.0 {
            return bad("matcher.min_score_margin must not be negative");
        }
        if self.features.max_features == 0 {
            return bad("features.max_features must be positive");
        }
        if self.features.pyramid_levels == 0 || self.features.scale_factor <= 1.0 {
            return bad("features pyramid needs at least one level and a scale factor above 1");
        }
        if self.gate.stay_threshold > self.gate.enter_threshold {
            return bad("gate.stay_threshold must not exceed gate.enter_threshold");
        }
        if self.gate.hits_required == 0 || self.gate.misses_required == 0 {
            return bad("gate hit/miss requirements must be positive");
        }
        if self.gate.poll_interval_ms == 0 {
            return bad("gate.poll_interval_ms must be positive");
        }
        if self.belt.width_ratio <= 0.0 || self.belt.vertical_pad < 0.0 {
            return bad("belt geometry must be positive");
        }
        Ok(())
    }
}

/// Keypoint detector and descriptor parameters.
///
/// Templates and slot crops must be processed with identical values, so a
/// single instance is shared by the library loader and the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Cap on keypoints kept per image (strongest first)
    pub max_features: usize,
    /// FAST-9 intensity threshold
    pub fast_threshold: u8,
    /// Number of pyramid levels, including the full-resolution one
    pub pyramid_levels: usize,
    /// Downscale factor between consecutive levels
    pub scale_factor: f32,
    /// Gaussian sigma applied before sampling descriptors
    pub blur_sigma: f32,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            max_features: 600,
            fast_threshold: 20,
            pyramid_levels: 3,
            scale_factor: 1.25,
            blur_sigma: 1.0,
        }
    }
}

/// Identity selection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherSettings {
    /// Ratio test: best distance must be below this fraction of the second best
    pub lowe_ratio: f32,
    /// Minimum accepted correspondences for the winning identity
    pub min_inliers: usize,
    /// Minimum gap between the winner and the runner-up identity
    pub min_score_margin: f64,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            lowe_ratio: 0.75,
            min_inliers: 8,
            min_score_margin: 5.0,
        }
    }
}

/// Banned/excluded-state thresholds.
///
/// These are empirical values for one UI palette; keep them tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannedSettings {
    /// Marker correlation needed for a direct hit
    pub marker_threshold: f64,
    /// Fraction of red belt pixels that counts as a ribbon
    pub red_ratio_threshold: f64,
    /// Portrait mean saturation at or below this is "desaturated" (0-255)
    pub saturation_threshold: f64,
    /// Portrait mean value at or below this is "dim" (0-255)
    pub value_threshold: f64,
    /// Optional: also require saturation <= ratio * second-lowest slot saturation
    pub relative_saturation_ratio: Option<f64>,
}

impl Default for BannedSettings {
    fn default() -> Self {
        Self {
            marker_threshold: 0.70,
            red_ratio_threshold: 0.035,
            saturation_threshold: 80.0,
            value_threshold: 150.0,
            relative_saturation_ratio: None,
        }
    }
}

/// Geometry of the context belt derived from each slot rectangle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeltSettings {
    /// Belt width as a fraction of the slot width
    pub width_ratio: f64,
    /// Vertical padding above and below, as a fraction of the slot height
    pub vertical_pad: f64,
}

impl Default for BeltSettings {
    fn default() -> Self {
        Self {
            width_ratio: 0.6,
            vertical_pad: 0.20,
        }
    }
}

/// Where the gate looks for its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateSearch {
    /// Inside the calibrated anchor rectangle, grown by `search_margin`
    #[default]
    Anchor,
    /// Anywhere in the frame
    Window,
}

/// Gate/trigger monitor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Score needed to count a hit while watching
    pub enter_threshold: f64,
    /// Score needed to count a hit while triggered
    pub stay_threshold: f64,
    /// Consecutive hits before firing
    pub hits_required: u32,
    /// Consecutive misses before releasing
    pub misses_required: u32,
    /// Sampling period (ms)
    pub poll_interval_ms: u64,
    /// Quiet period after a release during which samples are ignored (ms)
    pub cooldown_ms: u64,
    /// Search area for the anchor
    pub search: GateSearch,
    /// Extra pixels searched around the anchor rectangle
    pub search_margin: u32,
    /// Emit a gate score event every this many samples (0 disables)
    pub score_report_every: u32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            enter_threshold: 0.86,
            stay_threshold: 0.80,
            hits_required: 3,
            misses_required: 3,
            poll_interval_ms: 333,
            cooldown_ms: 2000,
            search: GateSearch::Anchor,
            search_margin: 0,
            score_report_every: 9,
        }
    }
}
