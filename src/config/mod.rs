//! Configuration module
//!
//! Handles detection thresholds and the calibration data that locates
//! slots, the gate anchor and the banned marker on screen.

pub mod calibration;
pub mod settings;

pub use calibration::{validate_regions, CalibrationConfig, GateAnchor, Rect, SlotRegion};
pub use settings::{
    BannedSettings, BeltSettings, FeatureSettings, GateSearch, GateSettings, MatcherSettings,
    Settings,
};
