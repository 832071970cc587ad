//! Local keypoint features
//!
//! Oriented FAST corners with rotated BRIEF descriptors, detected over a
//! small image pyramid so portraits rendered at a slightly different scale
//! still share features with their templates. Descriptors are 256-bit and
//! compared by Hamming distance.

use image::{GrayImage, RgbaImage};
use imageproc::corners::corners_fast9;
use once_cell::sync::Lazy;

use crate::config::FeatureSettings;

/// Keypoints closer than this to the level border are dropped, so both the
/// orientation disc and every rotated sampling point stay inside the image
const BORDER: u32 = 16;

/// Radius of the disc used for the intensity-centroid orientation
const ORIENTATION_RADIUS: i32 = 15;

/// Radius bounding the BRIEF sampling pattern
const PATTERN_RADIUS: i32 = 13;

/// Corners within this distance of a stronger one on the same level are suppressed
const NMS_RADIUS: u32 = 3;

/// Number of descriptor bits
const DESCRIPTOR_BITS: usize = 256;

/// Fixed BRIEF sampling pairs `(ax, ay, bx, by)`.
///
/// Generated from a constant seed so every process, and every template
/// cache, agrees on the layout.
static PATTERN: Lazy<Vec<[i8; 4]>> = Lazy::new(|| {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        // xorshift64*
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        state.wrapping_mul(0x2545_F491_4F6C_DD1D)
    };
    let mut point = move || loop {
        let v = next();
        let x = (v % (2 * PATTERN_RADIUS as u64 + 1)) as i32 - PATTERN_RADIUS;
        let y = ((v >> 32) % (2 * PATTERN_RADIUS as u64 + 1)) as i32 - PATTERN_RADIUS;
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x as i8, y as i8);
        }
    };

    let mut pairs = Vec::with_capacity(DESCRIPTOR_BITS);
    while pairs.len() < DESCRIPTOR_BITS {
        let (ax, ay) = point();
        let (bx, by) = point();
        if (ax, ay) != (bx, by) {
            pairs.push([ax, ay, bx, by]);
        }
    }
    pairs
});

/// A detected keypoint in full-resolution image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Pyramid level the keypoint was found on
    pub level: usize,
    /// Orientation in radians
    pub angle: f32,
    /// FAST corner score, used to rank keypoints
    pub response: f32,
}

/// 256-bit binary descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; 32]);

impl Descriptor {
    /// Hamming distance
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints with their descriptors, index-aligned
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Extracts [`FeatureSet`]s with a fixed parameter set
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    settings: FeatureSettings,
}

impl FeatureExtractor {
    pub fn new(settings: FeatureSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    /// Extract features from a color image
    pub fn extract_rgba(&self, image: &RgbaImage) -> FeatureSet {
        self.extract(&image::imageops::grayscale(image))
    }

    /// Extract up to `max_features` keypoints, strongest first
    pub fn extract(&self, gray: &GrayImage) -> FeatureSet {
        let mut candidates: Vec<(Keypoint, Descriptor)> = Vec::new();

        for (level, (image, scale)) in self.pyramid(gray).into_iter().enumerate() {
            let smoothed = if self.settings.blur_sigma > 0.0 {
                imageproc::filter::gaussian_blur_f32(&image, self.settings.blur_sigma)
            } else {
                image.clone()
            };

            for (x, y, response) in self.detect_corners(&image) {
                let angle = intensity_angle(&smoothed, x, y);
                let descriptor = describe(&smoothed, x, y, angle);
                candidates.push((
                    Keypoint {
                        x: x as f32 * scale,
                        y: y as f32 * scale,
                        level,
                        angle,
                        response,
                    },
                    descriptor,
                ));
            }
        }

        // Strongest first; ties fall back to position for a stable order
        candidates.sort_by(|(a, _), (b, _)| {
            b.response
                .total_cmp(&a.response)
                .then(a.level.cmp(&b.level))
                .then(a.y.total_cmp(&b.y))
                .then(a.x.total_cmp(&b.x))
        });
        candidates.truncate(self.settings.max_features);

        let (keypoints, descriptors) = candidates.into_iter().unzip();
        FeatureSet {
            keypoints,
            descriptors,
        }
    }

    /// Pyramid levels paired with their scale back to full resolution
    fn pyramid(&self, gray: &GrayImage) -> Vec<(GrayImage, f32)> {
        let min_side = 2 * BORDER + 1;
        let mut levels = Vec::with_capacity(self.settings.pyramid_levels);
        let (w, h) = gray.dimensions();

        for level in 0..self.settings.pyramid_levels {
            let scale = self.settings.scale_factor.powi(level as i32);
            let lw = (w as f32 / scale).round() as u32;
            let lh = (h as f32 / scale).round() as u32;
            if lw < min_side || lh < min_side {
                break;
            }
            let image = if level == 0 {
                gray.clone()
            } else {
                image::imageops::resize(gray, lw, lh, image::imageops::FilterType::Triangle)
            };
            levels.push((image, scale));
        }
        levels
    }

    /// FAST-9 corners away from the border, thinned by non-maximum suppression
    fn detect_corners(&self, image: &GrayImage) -> Vec<(u32, u32, f32)> {
        let (w, h) = image.dimensions();
        let mut corners: Vec<_> = corners_fast9(image, self.settings.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x + BORDER < w && c.y + BORDER < h)
            .collect();
        corners.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });

        let mut taken = vec![false; (w * h) as usize];
        let mut kept = Vec::new();
        for c in corners {
            if taken[(c.y * w + c.x) as usize] {
                continue;
            }
            kept.push((c.x, c.y, c.score));

            let y0 = c.y.saturating_sub(NMS_RADIUS);
            let y1 = (c.y + NMS_RADIUS).min(h - 1);
            let x0 = c.x.saturating_sub(NMS_RADIUS);
            let x1 = (c.x + NMS_RADIUS).min(w - 1);
            for y in y0..=y1 {
                for x in x0..=x1 {
                    taken[(y * w + x) as usize] = true;
                }
            }
        }
        kept
    }
}

/// Orientation from the intensity centroid of the surrounding disc
fn intensity_angle(image: &GrayImage, x: u32, y: u32) -> f32 {
    let mut m01: i64 = 0;
    let mut m10: i64 = 0;
    let r = ORIENTATION_RADIUS;

    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

/// Rotated BRIEF: each bit compares two pattern points rotated by `angle`
fn describe(image: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |px: i8, py: i8| -> u8 {
        let (px, py) = (px as f32, py as f32);
        let rx = (px * cos - py * sin).round() as i32;
        let ry = (px * sin + py * cos).round() as i32;
        image.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
    };

    let mut bits = [0u8; 32];
    for (i, [ax, ay, bx, by]) in PATTERN.iter().enumerate() {
        if sample(*ax, *ay) < sample(*bx, *by) {
            bits[i / 8] |= 1 << (i % 8);
        }
    }
    Descriptor(bits)
}

/// Count `query` descriptors whose nearest `train` descriptor passes the
/// ratio test against the second nearest.
///
/// Fewer than two train descriptors means no correspondence can be
/// disambiguated, so the count is 0.
pub fn count_ratio_matches(query: &FeatureSet, train: &FeatureSet, ratio: f32) -> usize {
    if train.len() < 2 {
        return 0;
    }

    query
        .descriptors
        .iter()
        .filter(|q| {
            let mut best = u32::MAX;
            let mut second = u32::MAX;
            for t in &train.descriptors {
                let d = q.distance(t);
                if d < best {
                    second = best;
                    best = d;
                } else if d < second {
                    second = d;
                }
            }
            (best as f32) < ratio * second as f32
        })
        .count()
}
