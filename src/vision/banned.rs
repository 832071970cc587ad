//! Banned/excluded slot classifier
//!
//! A slot is banned when the configured marker appears in its context belt,
//! or when the belt carries a red ribbon while the portrait itself is dim
//! and desaturated. Metrics are reported whatever the verdict.

use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

use super::correlation::CorrelationTemplate;
use crate::config::BannedSettings;

/// Measurements taken from one slot and its belt
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotMetrics {
    /// Mean HSV saturation of the portrait (0-255)
    pub sat_mean: f64,
    /// Mean HSV value of the portrait (0-255)
    pub val_mean: f64,
    /// Fraction of belt pixels classified as red
    pub red_ratio_ctx: f64,
    /// Peak marker correlation inside the belt, 0 without a marker
    pub banned_marker_score: f64,
}

/// Which signal produced a banned verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanReason {
    Marker,
    RibbonAndDim,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BannedVerdict {
    pub banned: bool,
    pub reason: Option<BanReason>,
    pub metrics: SlotMetrics,
}

/// Convert 8-bit RGB to HSV with H in [0, 180) and S, V in [0, 255]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = ((h / 2.0).round() as u32 % 180) as u8;
    (h, s.round() as u8, max as u8)
}

fn is_red(h: u8, s: u8, v: u8) -> bool {
    (h <= 10 || h >= 170) && s >= 100 && v >= 100
}

/// Fraction of pixels in the red hue bands; 0 for an empty image
pub fn red_ratio(image: &RgbaImage) -> f64 {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let red = image
        .pixels()
        .filter(|p| {
            let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
            is_red(h, s, v)
        })
        .count();
    red as f64 / total as f64
}

/// Mean saturation and value of an image
pub fn saturation_value_means(image: &RgbaImage) -> (f64, f64) {
    let total = image.width() as usize * image.height() as usize;
    if total == 0 {
        return (0.0, 0.0);
    }
    let (mut s_sum, mut v_sum) = (0u64, 0u64);
    for p in image.pixels() {
        let (_, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        s_sum += s as u64;
        v_sum += v as u64;
    }
    (s_sum as f64 / total as f64, v_sum as f64 / total as f64)
}

/// Second-lowest portrait saturation of a pass, the baseline for the
/// relative dimming rule
pub fn relative_saturation_reference(metrics: &[SlotMetrics]) -> Option<f64> {
    let mut sats: Vec<f64> = metrics.iter().map(|m| m.sat_mean).collect();
    if sats.len() < 2 {
        return None;
    }
    sats.sort_by(|a, b| a.total_cmp(b));
    Some(sats[1])
}

pub struct BannedClassifier {
    settings: BannedSettings,
    marker: Option<CorrelationTemplate>,
}

impl BannedClassifier {
    pub fn new(settings: BannedSettings, marker: Option<GrayImage>) -> Self {
        if let Some(m) = &marker {
            log::debug!("Banned marker loaded ({}x{})", m.width(), m.height());
        }
        Self {
            settings,
            marker: marker.as_ref().map(CorrelationTemplate::new),
        }
    }

    pub fn settings(&self) -> &BannedSettings {
        &self.settings
    }

    pub fn has_marker(&self) -> bool {
        self.marker.is_some()
    }

    /// Compute every metric for a slot crop and its optional belt crop
    pub fn measure(&self, slot: &RgbaImage, belt: Option<&RgbaImage>) -> SlotMetrics {
        let (sat_mean, val_mean) = saturation_value_means(slot);
        let (red_ratio_ctx, banned_marker_score) = match belt {
            Some(belt) => {
                let marker_score = self
                    .marker
                    .as_ref()
                    .map(|m| m.peak(&image::imageops::grayscale(belt)))
                    .unwrap_or(0.0);
                (red_ratio(belt), marker_score)
            }
            None => (0.0, 0.0),
        };
        SlotMetrics {
            sat_mean,
            val_mean,
            red_ratio_ctx,
            banned_marker_score,
        }
    }

    /// Turn metrics into a verdict.
    ///
    /// `relative_reference` is the pass-wide saturation baseline; it is only
    /// consulted when the relative rule is enabled, and a missing baseline
    /// leaves the absolute thresholds in charge.
    pub fn decide(&self, metrics: SlotMetrics, relative_reference: Option<f64>) -> BannedVerdict {
        let s = &self.settings;

        let marker_hit = self.marker.is_some() && metrics.banned_marker_score >= s.marker_threshold;
        let ribbon_hit = metrics.red_ratio_ctx >= s.red_ratio_threshold;
        let mut dim_hit =
            metrics.sat_mean <= s.saturation_threshold && metrics.val_mean <= s.value_threshold;
        if let (Some(ratio), Some(reference)) = (s.relative_saturation_ratio, relative_reference) {
            dim_hit &= metrics.sat_mean <= ratio * reference;
        }

        let reason = if marker_hit {
            Some(BanReason::Marker)
        } else if ribbon_hit && dim_hit {
            Some(BanReason::RibbonAndDim)
        } else {
            None
        };

        BannedVerdict {
            banned: reason.is_some(),
            reason,
            metrics,
        }
    }

    /// Classify one slot using only the absolute thresholds
    pub fn classify_slot(&self, slot: &RgbaImage, belt: Option<&RgbaImage>) -> BannedVerdict {
        self.decide(self.measure(slot, belt), None)
    }
}
