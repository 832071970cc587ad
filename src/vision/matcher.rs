//! Slot identity matching
//!
//! Each slot crop is compared against every variant of every identity in the
//! library. The winner must clear both an absolute correspondence count and
//! a margin over the best other identity; anything less is reported as
//! unknown.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::features::FeatureSet;
use super::templates::TemplateLibrary;
use crate::config::MatcherSettings;

/// Matcher verdict for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMatch {
    /// Winning identity key, `None` when unknown
    pub identity: Option<String>,
    /// Accepted correspondences of the top identity
    pub score: usize,
    /// Accepted correspondences of the best other identity
    pub runner_up: usize,
    /// Top identity key even when rejected, for diagnostics
    pub candidate: Option<String>,
    /// Index of the winning variant within the identity
    pub variant: Option<usize>,
}

impl SlotMatch {
    fn unknown() -> Self {
        Self {
            identity: None,
            score: 0,
            runner_up: 0,
            candidate: None,
            variant: None,
        }
    }

    /// No identity cleared the inlier and margin checks
    pub fn is_unknown(&self) -> bool {
        self.identity.is_none()
    }

    /// Lead of the top score over the runner-up
    pub fn margin(&self) -> f64 {
        self.score as f64 - self.runner_up as f64
    }
}

/// Picks the best identity per slot with margin rejection
#[derive(Debug, Clone)]
pub struct SlotMatcher {
    settings: MatcherSettings,
}

impl SlotMatcher {
    pub fn new(settings: MatcherSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    /// Match a cropped slot image against the library
    pub fn match_slot(&self, slot: &RgbaImage, library: &TemplateLibrary) -> SlotMatch {
        let features = library.extractor().extract_rgba(slot);
        self.match_features(&features, library)
    }

    /// Match precomputed slot features against the library
    pub fn match_features(&self, slot: &FeatureSet, library: &TemplateLibrary) -> SlotMatch {
        if slot.is_empty() {
            return SlotMatch::unknown();
        }

        // (score, identity index, variant index)
        let mut top: Option<(usize, usize, Option<usize>)> = None;
        let mut runner_up = 0usize;

        for (i, identity) in library.identities().iter().enumerate() {
            let (score, variant) = identity.best_variant_score(slot, self.settings.lowe_ratio);
            match top {
                Some((best, _, _)) if score <= best => {
                    runner_up = runner_up.max(score);
                }
                Some((best, _, _)) => {
                    runner_up = best;
                    top = Some((score, i, variant));
                }
                None => top = Some((score, i, variant)),
            }
        }

        let Some((score, index, variant)) = top else {
            return SlotMatch::unknown();
        };
        let candidate = library.identities()[index].key().to_string();

        let accepted = score >= self.settings.min_inliers
            && (score as f64 - runner_up as f64) >= self.settings.min_score_margin;

        if !accepted {
            log::debug!(
                "Rejected {} (score {}, runner-up {})",
                candidate,
                score,
                runner_up
            );
        }

        SlotMatch {
            identity: accepted.then(|| candidate.clone()),
            score,
            runner_up,
            candidate: Some(candidate),
            variant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSettings;
    use crate::vision::features::tests::block_texture;
    use crate::vision::features::FeatureExtractor;
    use crate::vision::templates::Identity;
    use image::{GrayImage, Luma, Rgba};

    fn library(entries: Vec<(&str, Vec<GrayImage>)>) -> TemplateLibrary {
        let extractor = FeatureExtractor::new(FeatureSettings::default());
        let identities = entries
            .into_iter()
            .map(|(key, images)| {
                let images = images
                    .into_iter()
                    .enumerate()
                    .map(|(i, img)| (format!("v{}", i), img))
                    .collect();
                Identity::from_images(key, images, &extractor)
            })
            .collect();
        TemplateLibrary::from_identities(identities, extractor).unwrap()
    }

    fn rgba(gray: &GrayImage) -> RgbaImage {
        image::DynamicImage::ImageLuma8(gray.clone()).to_rgba8()
    }

    #[test]
    fn test_exact_portrait_resolves() {
        let lib = library(vec![
            ("alpha", vec![block_texture(96, 96, 8, 1)]),
            ("beta", vec![block_texture(96, 96, 8, 2)]),
        ]);
        let matcher = SlotMatcher::new(MatcherSettings::default());

        let result = matcher.match_slot(&rgba(&block_texture(96, 96, 8, 2)), &lib);
        assert_eq!(result.identity.as_deref(), Some("beta"));
        assert!(result.score >= 8);
        assert!(result.margin() >= 5.0);
    }

    #[test]
    fn test_blank_slot_is_unknown() {
        let lib = library(vec![("alpha", vec![block_texture(96, 96, 8, 1)])]);
        let matcher = SlotMatcher::new(MatcherSettings::default());

        let blank = RgbaImage::from_pixel(96, 96, Rgba([30, 30, 30, 255]));
        let result = matcher.match_slot(&blank, &lib);
        assert!(result.is_unknown());
        assert_eq!(result.score, 0);
        assert_eq!(result.candidate, None);
    }

    #[test]
    fn test_identical_identities_tie_to_unknown() {
        let art = block_texture(96, 96, 8, 5);
        let lib = library(vec![("twin-a", vec![art.clone()]), ("twin-b", vec![art.clone()])]);
        let matcher = SlotMatcher::new(MatcherSettings::default());

        let result = matcher.match_slot(&rgba(&art), &lib);
        assert!(result.is_unknown());
        assert_eq!(result.score, result.runner_up);
        assert_eq!(result.candidate.as_deref(), Some("twin-a"));
    }

    #[test]
    fn test_single_identity_margin_against_zero() {
        let art = block_texture(96, 96, 8, 6);
        let lib = library(vec![("solo", vec![art.clone()])]);
        let matcher = SlotMatcher::new(MatcherSettings::default());

        let result = matcher.match_slot(&rgba(&art), &lib);
        assert_eq!(result.runner_up, 0);
        assert_eq!(result.identity.as_deref(), Some("solo"));
    }

    #[test]
    fn test_min_inliers_rejects_weak_match() {
        let art = block_texture(96, 96, 8, 7);
        let lib = library(vec![("solo", vec![art.clone()])]);
        let matcher = SlotMatcher::new(MatcherSettings {
            min_inliers: 100_000,
            ..MatcherSettings::default()
        });
        assert!(matcher.match_slot(&rgba(&art), &lib).is_unknown());
    }

    #[test]
    fn test_raising_margin_never_unlocks_matches() {
        let lib = library(vec![
            ("alpha", vec![block_texture(96, 96, 8, 11)]),
            ("beta", vec![block_texture(96, 96, 8, 12)]),
            ("gamma", vec![block_texture(96, 96, 8, 13)]),
        ]);
        let slots: Vec<RgbaImage> = (10..15).map(|s| rgba(&block_texture(96, 96, 8, s))).collect();

        let mut previous: Option<Vec<bool>> = None;
        for margin in [0.0, 5.0, 20.0, 80.0, 1000.0] {
            let matcher = SlotMatcher::new(MatcherSettings {
                min_score_margin: margin,
                ..MatcherSettings::default()
            });
            let resolved: Vec<bool> = slots
                .iter()
                .map(|s| !matcher.match_slot(s, &lib).is_unknown())
                .collect();
            if let Some(prev) = &previous {
                for (now, before) in resolved.iter().zip(prev) {
                    assert!(!now || *before, "margin {} resolved a new slot", margin);
                }
            }
            previous = Some(resolved);
        }
        assert!(previous.unwrap().iter().all(|r| !r));
    }

    #[test]
    fn test_names_do_not_influence_matching() {
        // "sol" is a prefix of "solaris"; only pixels decide
        let lib = library(vec![
            ("sol", vec![block_texture(96, 96, 8, 21)]),
            ("solaris", vec![block_texture(96, 96, 8, 22)]),
        ]);
        let matcher = SlotMatcher::new(MatcherSettings::default());

        let long = matcher.match_slot(&rgba(&block_texture(96, 96, 8, 22)), &lib);
        assert_eq!(long.identity.as_deref(), Some("solaris"));
        let short = matcher.match_slot(&rgba(&block_texture(96, 96, 8, 21)), &lib);
        assert_eq!(short.identity.as_deref(), Some("sol"));
    }

    #[test]
    fn test_blank_template_never_wins() {
        let lib = library(vec![
            ("blank", vec![GrayImage::from_pixel(96, 96, Luma([50]))]),
            ("real", vec![block_texture(96, 96, 8, 31)]),
        ]);
        let matcher = SlotMatcher::new(MatcherSettings::default());
        let result = matcher.match_slot(&rgba(&block_texture(96, 96, 8, 31)), &lib);
        assert_eq!(result.identity.as_deref(), Some("real"));
        assert_eq!(result.runner_up, 0);
    }
}
