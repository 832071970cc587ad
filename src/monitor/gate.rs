//! Gate state machine and anchor probe
//!
//! The gate decides when the draft screen is showing. It is fed one anchor
//! correlation score per poll and fires at most once per appearance of the
//! screen.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::{GateAnchor, GateSearch, GateSettings, Rect};
use crate::vision::correlation::CorrelationTemplate;
use crate::vision::{crop_region, Frame, VisionError};

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateState {
    /// Not started
    Idle,
    /// Waiting for the anchor to appear
    Watching,
    /// Anchor present, pass already fired
    Triggered,
    /// Anchor just left; samples are ignored until the deadline
    Cooldown,
}

/// What a sample did to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateTransition {
    None,
    /// Entered `Triggered`: run one detection pass
    Fire,
    /// Left `Triggered`
    Release,
}

/// Hysteresis counter over anchor scores.
///
/// Only the polling loop owns and mutates it.
#[derive(Debug, Clone)]
pub struct GateMachine {
    settings: GateSettings,
    state: GateState,
    hits: u32,
    misses: u32,
    cooldown_until: Option<Instant>,
}

impl GateMachine {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings,
            state: GateState::Idle,
            hits: 0,
            misses: 0,
            cooldown_until: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Begin watching
    pub fn start(&mut self) {
        if self.state == GateState::Idle {
            self.state = GateState::Watching;
        }
    }

    /// Forget all progress, e.g. when the capture target disappears
    pub fn reset(&mut self) {
        if self.state != GateState::Idle {
            self.state = GateState::Watching;
        }
        self.hits = 0;
        self.misses = 0;
        self.cooldown_until = None;
    }

    /// Current hit threshold: lower once triggered
    fn threshold(&self) -> f64 {
        if self.state == GateState::Triggered {
            self.settings.stay_threshold
        } else {
            self.settings.enter_threshold
        }
    }

    /// Feed one sample. `None` is a failed sample and counts as a miss.
    pub fn observe(&mut self, score: Option<f64>, now: Instant) -> GateTransition {
        match self.state {
            GateState::Idle => return GateTransition::None,
            GateState::Cooldown => match self.cooldown_until {
                Some(until) if now < until => return GateTransition::None,
                _ => {
                    self.state = GateState::Watching;
                    self.cooldown_until = None;
                }
            },
            GateState::Watching | GateState::Triggered => {}
        }

        let hit = score.is_some_and(|s| s >= self.threshold());
        if hit {
            self.hits = self.hits.saturating_add(1);
            self.misses = 0;
        } else {
            self.misses = self.misses.saturating_add(1);
            self.hits = 0;
        }

        match self.state {
            GateState::Watching if self.hits >= self.settings.hits_required => {
                self.state = GateState::Triggered;
                self.misses = 0;
                GateTransition::Fire
            }
            GateState::Triggered if self.misses >= self.settings.misses_required => {
                self.hits = 0;
                self.misses = 0;
                if self.settings.cooldown_ms > 0 {
                    self.state = GateState::Cooldown;
                    let cooldown = Duration::from_millis(self.settings.cooldown_ms);
                    self.cooldown_until = Some(now + cooldown);
                } else {
                    self.state = GateState::Watching;
                }
                GateTransition::Release
            }
            _ => GateTransition::None,
        }
    }
}

/// Source of gate scores for a frame
pub trait GateProbe: Send {
    fn score(&mut self, frame: &Frame) -> Result<f64, VisionError>;
}

/// Correlates the calibrated anchor crop against each frame.
///
/// The scaled reference is cached per frame size.
pub struct AnchorProbe {
    anchor: GateAnchor,
    search: GateSearch,
    search_margin: u32,
    cached: Option<((u32, u32), Rect, CorrelationTemplate)>,
}

impl AnchorProbe {
    /// Probe that searches the anchor rectangle grown by `search_margin`
    pub fn new(anchor: GateAnchor, search_margin: u32) -> Self {
        Self {
            anchor,
            search: GateSearch::Anchor,
            search_margin,
            cached: None,
        }
    }

    /// Probe configured from the gate's search settings
    pub fn from_settings(anchor: GateAnchor, settings: &GateSettings) -> Self {
        Self::new(anchor, settings.search_margin).with_search(settings.search)
    }

    pub fn with_search(mut self, search: GateSearch) -> Self {
        self.search = search;
        self
    }

    /// Peak anchor correlation inside the search area
    pub fn score_image(&mut self, image: &RgbaImage) -> Result<f64, VisionError> {
        let size = image.dimensions();
        let stale = !matches!(&self.cached, Some((cached_size, _, _)) if *cached_size == size);
        if stale {
            let (rect, reference) = self.anchor.scaled_to(size.0, size.1);
            // a window search only needs the reference itself to fit
            if self.search == GateSearch::Anchor && !rect.fits_within(size.0, size.1) {
                return Err(VisionError::RegionOutOfBounds {
                    rect,
                    frame_width: size.0,
                    frame_height: size.1,
                });
            }
            log::debug!("Gate anchor for {}x{} frames: {}", size.0, size.1, rect);
            self.cached = Some((size, rect, CorrelationTemplate::new(&reference)));
        }

        let Some((_, rect, template)) = &self.cached else {
            return Ok(0.0);
        };
        let gray = match self.search {
            GateSearch::Anchor => {
                let search = rect.expanded(self.search_margin, size.0, size.1);
                image::imageops::grayscale(&crop_region(image, &search)?)
            }
            GateSearch::Window => image::imageops::grayscale(image),
        };
        Ok(template.peak(&gray))
    }
}

impl GateProbe for AnchorProbe {
    fn score(&mut self, frame: &Frame) -> Result<f64, VisionError> {
        self.score_image(&frame.image)
    }
}
