//! Calibrated screen regions
//!
//! Slot rectangles, the gate anchor and the optional banned marker are
//! produced by an offline calibration tool and loaded read-only here.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::settings::BeltSettings;
use crate::vision::VisionError;

/// Axis-aligned rectangle in frame pixel coordinates.
///
/// Serialized as a four-integer array `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u32; 4]", into = "[u32; 4]")]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TryFrom<[u32; 4]> for Rect {
    type Error = String;

    fn try_from([x, y, width, height]: [u32; 4]) -> Result<Self, Self::Error> {
        if width == 0 || height == 0 {
            return Err(format!(
                "rectangle [{}, {}, {}, {}] has zero size",
                x, y, width, height
            ));
        }
        Ok(Self::new(x, y, width, height))
    }
}

impl From<Rect> for [u32; 4] {
    fn from(rect: Rect) -> Self {
        [rect.x, rect.y, rect.width, rect.height]
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x={} y={} w={} h={}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies entirely inside a frame of the given size
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        !self.is_empty()
            && self.right() <= frame_width as u64
            && self.bottom() <= frame_height as u64
    }

    /// Scale from calibration resolution to another resolution, rounding
    /// each component. Width and height never collapse below one pixel.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        let round = |v: u32, s: f64| (v as f64 * s).round().max(0.0) as u32;
        Self {
            x: round(self.x, sx),
            y: round(self.y, sy),
            width: round(self.width, sx).max(1),
            height: round(self.height, sy).max(1),
        }
    }

    /// Grow by `margin` on every side, clamped to the frame
    pub fn expanded(&self, margin: u32, frame_width: u32, frame_height: u32) -> Self {
        let x0 = self.x.saturating_sub(margin);
        let y0 = self.y.saturating_sub(margin);
        let x1 = (self.right() + margin as u64).min(frame_width as u64) as u32;
        let y1 = (self.bottom() + margin as u64).min(frame_height as u64) as u32;
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Derive the context belt: a strip immediately right of the slot,
    /// padded vertically, clamped to the frame. `None` when clamping leaves
    /// nothing.
    pub fn context_belt(
        &self,
        belt: &BeltSettings,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Rect> {
        let w = self.width as f64;
        let h = self.height as f64;

        let x0 = self.right();
        let x1 = ((self.right() as f64 + belt.width_ratio * w) as u64).min(frame_width as u64);
        let y0 = (self.y as f64 - belt.vertical_pad * h).max(0.0) as u64;
        let y1 = ((self.y as f64 + (1.0 + belt.vertical_pad) * h) as u64).min(frame_height as u64);

        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(Rect::new(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

/// One calibrated draft slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRegion {
    /// Position in declaration order (0-based)
    pub index: usize,
    /// Rectangle in frame coordinates
    pub rect: Rect,
}

/// Persisted slot calibration (`roi_config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Slot rectangles in declaration order
    pub rois: Vec<Rect>,
    /// Resolution `[width, height]` the rectangles were drawn at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_size: Option<[u32; 2]>,
    /// Screenshot used for calibration. Its size stands in for a missing
    /// `base_size`; relative paths resolve against the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_path: Option<String>,
}

impl CalibrationConfig {
    /// Build directly from rectangles
    pub fn new(rois: Vec<Rect>) -> Self {
        Self {
            rois,
            base_size: None,
            screen_path: None,
        }
    }

    /// Attach the calibration resolution
    pub fn with_base_size(mut self, width: u32, height: u32) -> Self {
        self.base_size = Some([width, height]);
        self
    }

    /// Load and validate a calibration file
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VisionError::ConfigurationError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&text)
            .map_err(|e| VisionError::ConfigurationError(format!("{}: {}", path.display(), e)))?;
        if config.base_size.is_none() {
            config.base_size_from_screen(path.parent());
        }
        Ok(config)
    }

    /// The calibration screenshot, resolved against `config_dir` when the
    /// path is relative and not found as given
    pub fn screen_file(&self, config_dir: Option<&Path>) -> Option<PathBuf> {
        let screen = PathBuf::from(self.screen_path.as_ref()?);
        match config_dir {
            Some(dir) if screen.is_relative() && !screen.exists() => Some(dir.join(screen)),
            _ => Some(screen),
        }
    }

    /// Take `base_size` from the calibration screenshot's dimensions
    fn base_size_from_screen(&mut self, config_dir: Option<&Path>) {
        let Some(screen) = self.screen_file(config_dir) else {
            return;
        };
        match image::image_dimensions(&screen) {
            Ok((w, h)) if w > 0 && h > 0 => {
                log::debug!("Calibration base size {}x{} from {}", w, h, screen.display());
                self.base_size = Some([w, h]);
            }
            Ok(_) => log::warn!("Calibration screenshot {} is empty", screen.display()),
            Err(e) => log::warn!(
                "No base size: cannot read calibration screenshot {}: {}",
                screen.display(),
                e
            ),
        }
    }

    /// Parse and validate calibration JSON
    pub fn from_json(text: &str) -> Result<Self, VisionError> {
        let config: CalibrationConfig = serde_json::from_str(text)
            .map_err(|e| VisionError::ConfigurationError(format!("malformed calibration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        if self.rois.is_empty() {
            return Err(VisionError::ConfigurationError(
                "calibration defines no slot regions".to_string(),
            ));
        }
        if let Some(rect) = self.rois.iter().find(|r| r.is_empty()) {
            return Err(VisionError::ConfigurationError(format!(
                "slot rectangle has zero size: {}",
                rect
            )));
        }
        if let Some([w, h]) = self.base_size {
            if w == 0 || h == 0 {
                return Err(VisionError::ConfigurationError(
                    "base_size must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Scale factors from calibration resolution to the given frame size
    pub fn scale_for(&self, frame_width: u32, frame_height: u32) -> (f64, f64) {
        scale_factors(self.base_size, frame_width, frame_height)
    }

    /// Slot regions in the coordinates of a frame of the given size
    pub fn slot_regions(&self, frame_width: u32, frame_height: u32) -> Vec<SlotRegion> {
        let (sx, sy) = self.scale_for(frame_width, frame_height);
        self.rois
            .iter()
            .enumerate()
            .map(|(index, rect)| SlotRegion {
                index,
                rect: if self.base_size.is_some() {
                    rect.scaled(sx, sy)
                } else {
                    *rect
                },
            })
            .collect()
    }
}

/// Check every region against the frame and report the first that does not fit
pub fn validate_regions(
    regions: &[SlotRegion],
    frame_width: u32,
    frame_height: u32,
) -> Result<(), VisionError> {
    match regions
        .iter()
        .find(|r| !r.rect.fits_within(frame_width, frame_height))
    {
        Some(region) => Err(VisionError::RegionOutOfBounds {
            rect: region.rect,
            frame_width,
            frame_height,
        }),
        None => Ok(()),
    }
}

fn scale_factors(base_size: Option<[u32; 2]>, frame_width: u32, frame_height: u32) -> (f64, f64) {
    match base_size {
        Some([bw, bh]) if bw > 0 && bh > 0 => (
            frame_width as f64 / bw as f64,
            frame_height as f64 / bh as f64,
        ),
        _ => (1.0, 1.0),
    }
}

/// Persisted anchor rectangle (`anchor_config.json`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct AnchorConfig {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Small calibrated crop used to decide whether the draft screen is showing
#[derive(Debug, Clone)]
pub struct GateAnchor {
    /// Where the reference crop was taken, in calibration coordinates
    pub rect: Rect,
    /// Grayscale reference crop
    pub reference: GrayImage,
    /// Resolution the anchor was calibrated at
    pub base_size: Option<[u32; 2]>,
}

impl GateAnchor {
    pub fn new(rect: Rect, reference: GrayImage) -> Self {
        Self {
            rect,
            reference,
            base_size: None,
        }
    }

    pub fn with_base_size(mut self, base_size: Option<[u32; 2]>) -> Self {
        self.base_size = base_size;
        self
    }

    /// Load `anchor_config.json` plus the reference image
    pub fn load(config_path: &Path, image_path: &Path) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(config_path).map_err(|e| {
            VisionError::ConfigurationError(format!(
                "cannot read {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let cfg: AnchorConfig = serde_json::from_str(&text).map_err(|e| {
            VisionError::ConfigurationError(format!(
                "malformed anchor config {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let rect = Rect::try_from([cfg.x, cfg.y, cfg.w, cfg.h])
            .map_err(VisionError::ConfigurationError)?;

        let reference = image::open(image_path)
            .map_err(|e| {
                VisionError::ConfigurationError(format!(
                    "cannot decode anchor {}: {}",
                    image_path.display(),
                    e
                ))
            })?
            .to_luma8();

        if reference.width() == 0 || reference.height() == 0 {
            return Err(VisionError::ConfigurationError(format!(
                "anchor image {} is empty",
                image_path.display()
            )));
        }

        Ok(Self::new(rect, reference))
    }

    /// Anchor rectangle and reference crop resized for a frame of the given size
    pub fn scaled_to(&self, frame_width: u32, frame_height: u32) -> (Rect, GrayImage) {
        let (sx, sy) = scale_factors(self.base_size, frame_width, frame_height);
        let rect = self.rect.scaled(sx, sy);
        let reference = if (sx - 1.0).abs() < f64::EPSILON && (sy - 1.0).abs() < f64::EPSILON {
            self.reference.clone()
        } else {
            let w = ((self.reference.width() as f64 * sx).round() as u32).max(1);
            let h = ((self.reference.height() as f64 * sy).round() as u32).max(1);
            image::imageops::resize(
                &self.reference,
                w,
                h,
                image::imageops::FilterType::Triangle,
            )
        };
        (rect, reference)
    }
}

/// Load the optional banned-marker reference. A missing file is not an error.
pub fn load_banned_marker(path: &Path) -> Result<Option<GrayImage>, VisionError> {
    if !path.exists() {
        log::debug!("No banned marker at {}", path.display());
        return Ok(None);
    }
    let marker = image::open(path)
        .map_err(|e| {
            VisionError::ConfigurationError(format!(
                "cannot decode banned marker {}: {}",
                path.display(),
                e
            ))
        })?
        .to_luma8();
    Ok(Some(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_json_roundtrip_shape() {
        let rect = Rect::new(10, 20, 30, 40);
        assert_eq!(serde_json::to_string(&rect).unwrap(), "[10,20,30,40]");
    }

    #[test]
    fn test_calibration_parsing() {
        let config = CalibrationConfig::from_json(
            r#"{"screen_path": "shot.png", "rois": [[0,0,10,10],[20,0,10,10]], "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(config.rois.len(), 2);
        assert_eq!(config.screen_path.as_deref(), Some("shot.png"));
    }

    #[test]
    fn test_calibration_rejects_bad_input() {
        assert!(CalibrationConfig::from_json(r#"{"rois": []}"#).is_err());
        assert!(CalibrationConfig::from_json(r#"{"rois": [[0,0,0,10]]}"#).is_err());
        assert!(CalibrationConfig::from_json(r#"{"rois": [[0,0,10]]}"#).is_err());
        assert!(CalibrationConfig::from_json(r#"{"rois": [[-1,0,10,10]]}"#).is_err());
        assert!(CalibrationConfig::from_json(r#"{"slots": [[0,0,10,10]]}"#).is_err());
    }

    #[test]
    fn test_slot_regions_scale_with_base_size() {
        let config =
            CalibrationConfig::new(vec![Rect::new(100, 50, 40, 20)]).with_base_size(1000, 500);
        let regions = config.slot_regions(2000, 1000);
        assert_eq!(regions[0].index, 0);
        assert_eq!(regions[0].rect, Rect::new(200, 100, 80, 40));

        let unscaled = CalibrationConfig::new(vec![Rect::new(100, 50, 40, 20)]);
        assert_eq!(unscaled.slot_regions(2000, 1000)[0].rect, Rect::new(100, 50, 40, 20));
    }

    #[test]
    fn test_base_size_falls_back_to_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::new(400, 90)
            .save(dir.path().join("screen.png"))
            .unwrap();
        let path = dir.path().join("roi_config.json");
        std::fs::write(&path, r#"{"rois": [[10,20,48,48]], "screen_path": "screen.png"}"#)
            .unwrap();

        let config = CalibrationConfig::load(&path).unwrap();
        assert_eq!(config.base_size, Some([400, 90]));
        assert_eq!(config.slot_regions(800, 180)[0].rect, Rect::new(20, 40, 96, 96));

        // an explicit base size wins over the screenshot
        std::fs::write(
            &path,
            r#"{"rois": [[10,20,48,48]], "screen_path": "screen.png", "base_size": [800, 180]}"#,
        )
        .unwrap();
        let config = CalibrationConfig::load(&path).unwrap();
        assert_eq!(config.base_size, Some([800, 180]));

        // an unreadable screenshot leaves the rectangles unscaled
        std::fs::write(&path, r#"{"rois": [[10,20,48,48]], "screen_path": "gone.png"}"#).unwrap();
        let config = CalibrationConfig::load(&path).unwrap();
        assert_eq!(config.base_size, None);
        assert_eq!(config.slot_regions(800, 180)[0].rect, Rect::new(10, 20, 48, 48));
    }

    #[test]
    fn test_context_belt_geometry() {
        let belt = BeltSettings::default();
        let slot = Rect::new(100, 100, 100, 50);
        let ctx = slot.context_belt(&belt, 1000, 1000).unwrap();
        assert_eq!(ctx, Rect::new(200, 90, 60, 70));

        // Clamped to the frame edge
        let ctx = slot.context_belt(&belt, 230, 1000).unwrap();
        assert_eq!(ctx.width, 30);

        // Nothing left to the right
        assert!(slot.context_belt(&belt, 200, 1000).is_none());
    }

    #[test]
    fn test_validate_regions() {
        let regions = vec![
            SlotRegion {
                index: 0,
                rect: Rect::new(0, 0, 10, 10),
            },
            SlotRegion {
                index: 1,
                rect: Rect::new(95, 0, 10, 10),
            },
        ];
        assert!(validate_regions(&regions[..1], 100, 100).is_ok());
        match validate_regions(&regions, 100, 100) {
            Err(VisionError::RegionOutOfBounds { rect, .. }) => assert_eq!(rect.x, 95),
            other => panic!("expected out of bounds, got {:?}", other),
        }
    }

    #[test]
    fn test_expanded_is_clamped() {
        let rect = Rect::new(5, 5, 10, 10);
        assert_eq!(rect.expanded(10, 20, 100), Rect::new(0, 0, 20, 25));
    }
}
