//! Frame intake
//!
//! Frames arrive from an external capture collaborator, either as raw RGBA
//! buffers or through a [`CaptureSource`]. Screen and window capture
//! backends live outside this crate; [`DirectorySource`] replays saved
//! screenshots for offline runs.

use image::{ImageBuffer, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::VisionError;
use crate::config::Rect;

/// One captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixels, shared so detection workers can hold the frame cheaply
    pub image: Arc<RgbaImage>,
    /// Capture time in milliseconds since the UNIX epoch
    pub captured_at_ms: u64,
}

impl Frame {
    /// Wrap an already decoded image, stamped with the current time
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at_ms: now_ms(),
        }
    }

    /// Build a frame from a raw RGBA buffer
    pub fn from_raw(frame_data: &[u8], width: u32, height: u32) -> Result<Self, VisionError> {
        // Validate frame data size
        let expected_size = width as usize * height as usize * 4; // RGBA
        if width == 0 || height == 0 || frame_data.len() != expected_size {
            return Err(VisionError::InvalidFrameData);
        }

        let image: RgbaImage = ImageBuffer::from_raw(width, height, frame_data.to_vec())
            .ok_or(VisionError::InvalidFrameData)?;

        Ok(Self::new(image))
    }

    /// Get frame dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Crop a rectangle out of a frame, failing when it does not fit
pub fn crop_region(frame: &RgbaImage, rect: &Rect) -> Result<RgbaImage, VisionError> {
    let (width, height) = frame.dimensions();
    if !rect.fits_within(width, height) {
        return Err(VisionError::RegionOutOfBounds {
            rect: *rect,
            frame_width: width,
            frame_height: height,
        });
    }
    Ok(image::imageops::crop_imm(frame, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Producer of frames for the gate monitor.
///
/// `Ok(None)` means no capture target is available right now (game window
/// closed or minimized); the monitor resets its gate counters on it.
pub trait CaptureSource: Send {
    /// Grab the latest frame
    fn grab(&mut self) -> Result<Option<Frame>, VisionError>;

    /// Finite sources report when they have nothing more to give
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Release any handle held on the capture target
    fn release(&mut self) {}
}

/// Supported still-image extensions
pub(crate) const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

pub(crate) fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Image files directly under `dir`, sorted by file name
pub(crate) fn image_files_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Replays screenshots from a directory in file-name order
pub struct DirectorySource {
    frames: Vec<PathBuf>,
    next: usize,
    repeat: bool,
}

impl DirectorySource {
    /// Open a directory of screenshots
    pub fn open(dir: &Path) -> Result<Self, VisionError> {
        let frames = image_files_in(dir).map_err(|e| {
            VisionError::ConfigurationError(format!("cannot list {}: {}", dir.display(), e))
        })?;
        if frames.is_empty() {
            return Err(VisionError::ConfigurationError(format!(
                "no frames found in {}",
                dir.display()
            )));
        }
        log::info!("Replaying {} frames from {}", frames.len(), dir.display());
        Ok(Self {
            frames,
            next: 0,
            repeat: false,
        })
    }

    /// Start over from the first frame after the last one
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Number of frames in the directory
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl CaptureSource for DirectorySource {
    fn grab(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.next >= self.frames.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.next = 0;
        }
        let path = &self.frames[self.next];
        self.next += 1;

        let image = image::open(path)
            .map_err(|e| VisionError::CaptureError(format!("{}: {}", path.display(), e)))?
            .to_rgba8();
        Ok(Some(Frame::new(image)))
    }

    fn is_exhausted(&self) -> bool {
        !self.repeat && self.next >= self.frames.len()
    }

    fn release(&mut self) {
        self.frames.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_frame_from_raw() {
        let width = 10u32;
        let height = 10u32;
        let frame_data = vec![255u8; (width * height * 4) as usize];

        let frame = Frame::from_raw(&frame_data, width, height).unwrap();
        assert_eq!(frame.dimensions(), (width, height));
        assert!(frame.captured_at_ms > 0);
    }

    #[test]
    fn test_invalid_frame_data() {
        // Wrong size data
        let frame_data = vec![255u8; 100];
        assert!(matches!(
            Frame::from_raw(&frame_data, 10, 10),
            Err(VisionError::InvalidFrameData)
        ));
        assert!(Frame::from_raw(&[], 0, 0).is_err());
    }

    #[test]
    fn test_crop_region_bounds() {
        let img = RgbaImage::from_pixel(100, 50, Rgba([1, 2, 3, 255]));
        let crop = crop_region(&img, &Rect::new(90, 40, 10, 10)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));

        let err = crop_region(&img, &Rect::new(91, 40, 10, 10)).unwrap_err();
        match err {
            VisionError::RegionOutOfBounds {
                frame_width,
                frame_height,
                ..
            } => assert_eq!((frame_width, frame_height), (100, 50)),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_directory_source_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for (i, shade) in [10u8, 20, 30].iter().enumerate() {
            RgbaImage::from_pixel(4, 4, Rgba([*shade, 0, 0, 255]))
                .save(dir.path().join(format!("frame_{}.png", i)))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 3);
        let shades: Vec<u8> = (0..3)
            .map(|_| source.grab().unwrap().unwrap().image.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(source.is_exhausted());
        assert!(source.grab().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySource::open(dir.path()).is_err());
    }
}
