//! Detection pass results
//!
//! A pass produces one [`SlotOutcome`] per calibrated slot, in slot order.
//! Reports are immutable once built; the assembler and overlay only read
//! them.

pub mod assembler;
pub mod overlay;

use serde::{Deserialize, Serialize};

use crate::config::Rect;
use crate::vision::{BanReason, BannedVerdict, SlotMatch, SlotMetrics};

pub use assembler::{ActionableSlot, ActionableSummary, MatchRecord};
pub use overlay::annotate;

/// Raw verdict for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Index of the slot in the calibration
    pub slot: usize,
    /// Matcher verdict, kept even when the slot is banned
    pub identity: Option<String>,
    /// Inlier count of the best identity
    pub score: usize,
    /// Inlier count of the best other identity
    pub runner_up: usize,
    pub banned: bool,
    /// Which rule flagged the slot
    pub ban_reason: Option<BanReason>,
    /// Colour measurements behind the banned verdict
    pub metrics: SlotMetrics,
    /// Slot rectangle in frame pixels
    pub roi: Rect,
    /// Context belt right of the slot, if any of it is on screen
    pub belt: Option<Rect>,
}

impl DetectionResult {
    pub fn new(
        slot: usize,
        roi: Rect,
        belt: Option<Rect>,
        matched: SlotMatch,
        verdict: BannedVerdict,
    ) -> Self {
        Self {
            slot,
            identity: matched.identity,
            score: matched.score,
            runner_up: matched.runner_up,
            banned: verdict.banned,
            ban_reason: verdict.reason,
            metrics: verdict.metrics,
            roi,
            belt,
        }
    }
}

/// Per-slot entry of a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotOutcome {
    Detected(DetectionResult),
    /// The slot could not be evaluated on this frame
    Failed {
        slot: usize,
        rect: Rect,
        reason: String,
    },
}

impl SlotOutcome {
    /// Slot index, whatever the outcome
    pub fn slot(&self) -> usize {
        match self {
            SlotOutcome::Detected(result) => result.slot,
            SlotOutcome::Failed { slot, .. } => *slot,
        }
    }

    /// The verdict, if the slot was evaluated
    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            SlotOutcome::Detected(result) => Some(result),
            SlotOutcome::Failed { .. } => None,
        }
    }
}

/// Everything one detection pass produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Milliseconds since the UNIX epoch
    pub timestamp_ms: u64,
    pub results: Vec<SlotOutcome>,
}

impl PassReport {
    /// Successfully evaluated slots
    pub fn detected(&self) -> impl Iterator<Item = &DetectionResult> {
        self.results.iter().filter_map(SlotOutcome::result)
    }

    /// Slots that could not be evaluated
    pub fn failure_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, SlotOutcome::Failed { .. }))
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
