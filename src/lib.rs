//! Draft Lens - draft-screen portrait identification
//!
//! This library recognises which known portrait occupies each calibrated
//! slot of a game's draft screen, decides whether a slot is banned, and
//! gates the expensive recognition pass behind a cheap anchor check so it
//! can run against a live capture.
//!
//! ## Layout
//!
//! - `config`: thresholds and calibrated regions
//! - `vision`: features, template library, matcher, banned classifier
//! - `detection`: pass results, actionable view, debug overlay
//! - `monitor`: gate state machine and the polling loop

pub mod config;
pub mod detection;
pub mod monitor;
pub mod vision;

use image::{GrayImage, RgbaImage};
use std::path::Path;
use std::sync::Arc;

use crate::config::{CalibrationConfig, Settings};
use crate::detection::{DetectionResult, PassReport, SlotOutcome};
use crate::monitor::PassRunner;
use crate::vision::banned::relative_saturation_reference;
use crate::vision::capture::now_ms;
use crate::vision::{
    crop_region, BannedClassifier, Frame, SlotMatcher, SlotMetrics, TemplateLibrary, VisionError,
};

/// Everything needed to run a detection pass
pub struct DraftScanner {
    settings: Settings,
    calibration: CalibrationConfig,
    library: Arc<TemplateLibrary>,
    matcher: SlotMatcher,
    classifier: BannedClassifier,
}

impl DraftScanner {
    /// Build a scanner from already loaded parts
    pub fn new(
        settings: Settings,
        calibration: CalibrationConfig,
        library: Arc<TemplateLibrary>,
        banned_marker: Option<GrayImage>,
    ) -> Result<Self, VisionError> {
        settings.validate()?;
        calibration.validate()?;

        if library.extractor().settings() != &settings.features {
            log::warn!("Template library was built with different feature settings");
        }

        Ok(Self {
            matcher: SlotMatcher::new(settings.matcher.clone()),
            classifier: BannedClassifier::new(settings.banned.clone(), banned_marker),
            settings,
            calibration,
            library,
        })
    }

    /// Load templates, calibration and the optional marker from disk
    pub fn from_paths(
        settings: Settings,
        templates_dir: &Path,
        roi_config: &Path,
        banned_marker: Option<&Path>,
    ) -> Result<Self, VisionError> {
        let calibration = CalibrationConfig::load(roi_config)?;
        let library = TemplateLibrary::load(templates_dir, &settings.features)?;
        let marker = match banned_marker {
            Some(path) => config::calibration::load_banned_marker(path)?,
            None => None,
        };
        Self::new(settings, calibration, Arc::new(library), marker)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        &self.calibration
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    /// Run one pass over a frame, stamped with the current time
    pub fn scan(&self, frame: &RgbaImage) -> Result<PassReport, VisionError> {
        self.scan_at(frame, now_ms())
    }

    /// Run one pass over a frame.
    ///
    /// Every calibrated slot yields exactly one outcome, in slot order. A
    /// slot that does not fit the frame becomes a failed outcome and the
    /// remaining slots are still evaluated.
    pub fn scan_at(&self, frame: &RgbaImage, timestamp_ms: u64) -> Result<PassReport, VisionError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidFrameData);
        }

        struct Measured {
            index: usize,
            roi: config::Rect,
            belt: Option<config::Rect>,
            metrics: SlotMetrics,
            matched: vision::SlotMatch,
        }

        let mut slots: Vec<Result<Measured, SlotOutcome>> = Vec::new();
        for region in self.calibration.slot_regions(width, height) {
            let slot = match crop_region(frame, &region.rect) {
                Ok(slot) => slot,
                Err(e) => {
                    log::warn!("Slot {} skipped: {}", region.index, e);
                    slots.push(Err(SlotOutcome::Failed {
                        slot: region.index,
                        rect: region.rect,
                        reason: e.to_string(),
                    }));
                    continue;
                }
            };

            let belt = region.rect.context_belt(&self.settings.belt, width, height);
            let belt_image = belt.and_then(|b| crop_region(frame, &b).ok());

            let metrics = self.classifier.measure(&slot, belt_image.as_ref());
            let matched = self.matcher.match_slot(&slot, &self.library);
            log::debug!(
                "Slot {}: {:?} score {} runner-up {}",
                region.index,
                matched.candidate,
                matched.score,
                matched.runner_up
            );

            slots.push(Ok(Measured {
                index: region.index,
                roi: region.rect,
                belt,
                metrics,
                matched,
            }));
        }

        let reference = relative_saturation_reference(
            &slots
                .iter()
                .filter_map(|s| s.as_ref().ok().map(|m| m.metrics))
                .collect::<Vec<_>>(),
        );

        let results = slots
            .into_iter()
            .map(|slot| match slot {
                Ok(m) => {
                    let verdict = self.classifier.decide(m.metrics, reference);
                    SlotOutcome::Detected(DetectionResult::new(
                        m.index, m.roi, m.belt, m.matched, verdict,
                    ))
                }
                Err(failed) => failed,
            })
            .collect();

        Ok(PassReport {
            frame_width: width,
            frame_height: height,
            timestamp_ms,
            results,
        })
    }
}

impl PassRunner for DraftScanner {
    fn run_pass(&self, frame: &Frame) -> Result<PassReport, VisionError> {
        self.scan_at(&frame.image, frame.captured_at_ms)
    }

    fn clean_limit(&self) -> usize {
        self.settings.clean_limit
    }
}
