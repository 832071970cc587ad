//! Vision and image processing module
//!
//! Feature extraction, the portrait template library, slot identity
//! matching and the banned-state classifier. Everything here is a pure
//! function of pixels plus immutable settings.

pub mod banned;
pub mod capture;
pub mod correlation;
pub mod features;
pub mod matcher;
pub mod templates;

use crate::config::Rect;

pub use banned::{BanReason, BannedClassifier, BannedVerdict, SlotMetrics};
pub use capture::{crop_region, CaptureSource, DirectorySource, Frame};
pub use features::{Descriptor, FeatureExtractor, FeatureSet, Keypoint};
pub use matcher::{SlotMatch, SlotMatcher};
pub use templates::{Identity, LoadMode, TemplateLibrary, Variant};

/// Vision system errors
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
    #[error("Failed to load template library: {0}")]
    LoadError(String),
    #[error("Region {rect} does not fit inside a {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        rect: Rect,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("Capture failed: {0}")]
    CaptureError(String),
    #[error("Invalid frame data")]
    InvalidFrameData,
}

impl VisionError {
    /// Errors that only invalidate the current frame; the monitor keeps polling
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VisionError::RegionOutOfBounds { .. }
                | VisionError::CaptureError(_)
                | VisionError::InvalidFrameData
        )
    }
}
