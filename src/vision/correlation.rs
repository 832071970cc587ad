//! Zero-mean normalized cross-correlation
//!
//! Used for the gate anchor and the banned marker. The score is the
//! correlation coefficient between the template and the image window it
//! covers: 1.0 is a perfect match, values near 0 mean unrelated content.
//! Constant windows or templates score 0.

use image::GrayImage;

/// Template with precomputed zero-mean pixels
pub struct CorrelationTemplate {
    width: u32,
    height: u32,
    /// Pixel values minus the template mean, row-major
    centered: Vec<f64>,
    /// Sum of squared centered values
    energy: f64,
}

impl CorrelationTemplate {
    pub fn new(template: &GrayImage) -> Self {
        let (width, height) = template.dimensions();
        let n = (width * height) as f64;
        let mean = if n > 0.0 {
            template.pixels().map(|p| p[0] as f64).sum::<f64>() / n
        } else {
            0.0
        };
        let centered: Vec<f64> = template.pixels().map(|p| p[0] as f64 - mean).collect();
        let energy = centered.iter().map(|v| v * v).sum();
        Self {
            width,
            height,
            centered,
            energy,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Correlation of the template placed with its top-left corner at (x, y)
    fn score_at(&self, image: &GrayImage, x: u32, y: u32) -> f64 {
        let n = (self.width * self.height) as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut cross = 0.0;

        for ty in 0..self.height {
            let row = (ty * self.width) as usize;
            for tx in 0..self.width {
                let v = image.get_pixel(x + tx, y + ty)[0] as f64;
                sum += v;
                sum_sq += v * v;
                cross += v * self.centered[row + tx as usize];
            }
        }

        let window_energy = sum_sq - sum * sum / n;
        let denom = (window_energy * self.energy).sqrt();
        if denom < 1e-6 {
            return 0.0;
        }
        (cross / denom).clamp(-1.0, 1.0)
    }

    /// Highest correlation over every placement inside `image`.
    /// Returns 0 when the template does not fit.
    pub fn peak(&self, image: &GrayImage) -> f64 {
        let (w, h) = image.dimensions();
        if self.width == 0 || self.height == 0 || self.width > w || self.height > h {
            return 0.0;
        }

        let mut best = f64::NEG_INFINITY;
        for y in 0..=(h - self.height) {
            for x in 0..=(w - self.width) {
                let score = self.score_at(image, x, y);
                if score > best {
                    best = score;
                }
            }
        }
        best.max(0.0)
    }
}

/// One-shot peak correlation of `template` inside `image`
pub fn peak_correlation(image: &GrayImage, template: &GrayImage) -> f64 {
    CorrelationTemplate::new(template).peak(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn pattern(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            Luma([(x.wrapping_mul(37).wrapping_add(y.wrapping_mul(91)) % 251) as u8])
        })
    }

    #[test]
    fn test_identical_scores_one() {
        let img = pattern(20, 12);
        let score = peak_correlation(&img, &img);
        assert!((score - 1.0).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn test_finds_embedded_template() {
        let haystack = pattern(40, 30);
        let needle = image::imageops::crop_imm(&haystack, 11, 7, 12, 9).to_image();
        let score = peak_correlation(&haystack, &needle);
        assert!((score - 1.0).abs() < 1e-9, "got {}", score);
    }

    #[test]
    fn test_brightness_shift_invariant() {
        let img = pattern(16, 16);
        let brighter = GrayImage::from_fn(16, 16, |x, y| Luma([img.get_pixel(x, y)[0] / 2 + 60]));
        let score = peak_correlation(&brighter, &img);
        assert!(score > 0.99, "got {}", score);
    }

    #[test]
    fn test_constant_inputs_score_zero() {
        let flat = GrayImage::from_pixel(16, 16, Luma([128]));
        let img = pattern(16, 16);
        assert_eq!(peak_correlation(&flat, &img), 0.0);
        assert_eq!(peak_correlation(&img, &flat), 0.0);
    }

    #[test]
    fn test_template_larger_than_image() {
        let small = pattern(8, 8);
        let big = pattern(16, 16);
        assert_eq!(peak_correlation(&small, &big), 0.0);
    }
}
