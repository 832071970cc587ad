//! Debug overlay rendering

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect as DrawRect;

use super::{PassReport, SlotOutcome};
use crate::config::Rect;

const BANNED: Rgba<u8> = Rgba([230, 40, 40, 255]);
const RESOLVED: Rgba<u8> = Rgba([40, 210, 80, 255]);
const UNKNOWN: Rgba<u8> = Rgba([255, 150, 0, 255]);
const BELT: Rgba<u8> = Rgba([60, 120, 255, 255]);
const FAILED: Rgba<u8> = Rgba([150, 150, 150, 255]);

/// Score that fills the bar completely
const FULL_BAR_SCORE: f32 = 60.0;
const BAR_HEIGHT: u32 = 4;

fn to_draw(rect: &Rect) -> DrawRect {
    DrawRect::at(rect.x as i32, rect.y as i32).of_size(rect.width, rect.height)
}

/// Draw a rectangle outline `thickness` pixels wide, growing inwards
fn outline(canvas: &mut RgbaImage, rect: &Rect, color: Rgba<u8>, thickness: u32) {
    for i in 0..thickness {
        if rect.width <= 2 * i || rect.height <= 2 * i {
            break;
        }
        let inner = Rect::new(rect.x + i, rect.y + i, rect.width - 2 * i, rect.height - 2 * i);
        draw_hollow_rect_mut(canvas, to_draw(&inner), color);
    }
}

/// Copy of `frame` with slot and belt boxes drawn on it.
///
/// Labels are not rendered; they live in the JSON record.
pub fn annotate(frame: &RgbaImage, report: &PassReport) -> RgbaImage {
    let mut canvas = frame.clone();

    for outcome in &report.results {
        match outcome {
            SlotOutcome::Detected(result) => {
                if let Some(belt) = &result.belt {
                    outline(&mut canvas, belt, BELT, 1);
                }

                let color = if result.banned {
                    BANNED
                } else if result.identity.is_some() {
                    RESOLVED
                } else {
                    UNKNOWN
                };
                outline(&mut canvas, &result.roi, color, 2);

                if !result.banned && result.identity.is_some() && result.roi.y >= BAR_HEIGHT + 2 {
                    let fill = (result.score as f32 / FULL_BAR_SCORE).min(1.0);
                    let width = ((result.roi.width as f32 * fill).round() as u32).max(1);
                    let top = result.roi.y - BAR_HEIGHT - 2;
                    let bar = Rect::new(result.roi.x, top, width, BAR_HEIGHT);
                    draw_filled_rect_mut(&mut canvas, to_draw(&bar), RESOLVED);
                }
            }
            SlotOutcome::Failed { rect, .. } => {
                // imageproc clips drawing to the canvas
                outline(&mut canvas, rect, FAILED, 1);
            }
        }
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::tests::detected;

    const BG: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn report(results: Vec<SlotOutcome>) -> PassReport {
        PassReport {
            frame_width: 400,
            frame_height: 120,
            timestamp_ms: 0,
            results,
        }
    }

    #[test]
    fn test_slot_colors() {
        let frame = RgbaImage::from_pixel(400, 120, BG);
        let out = annotate(
            &frame,
            &report(vec![
                detected(0, Some("a"), false),
                detected(1, Some("b"), true),
                detected(2, None, false),
            ]),
        );
        assert_eq!(out.dimensions(), frame.dimensions());
        // roi of slot n starts at (10 + 100n, 10)
        assert_eq!(*out.get_pixel(10 + 40, 10), RESOLVED);
        assert_eq!(*out.get_pixel(110 + 40, 10), BANNED);
        assert_eq!(*out.get_pixel(210 + 40, 10), UNKNOWN);
        // interior untouched
        assert_eq!(*out.get_pixel(50, 50), BG);
        // input is not modified
        assert_eq!(*frame.get_pixel(50, 10), BG);
    }

    #[test]
    fn test_out_of_frame_rect_is_clipped() {
        let frame = RgbaImage::from_pixel(100, 100, BG);
        let out = annotate(
            &frame,
            &report(vec![SlotOutcome::Failed {
                slot: 0,
                rect: Rect::new(80, 80, 50, 50),
                reason: "outside".to_string(),
            }]),
        );
        assert_eq!(*out.get_pixel(80, 90), FAILED);
    }
}
