//! End-to-end detection over a synthetic draft screen

use image::{GrayImage, Luma, Rgba, RgbaImage};
use std::path::Path;

use draft_lens::config::Settings;
use draft_lens::detection::{annotate, MatchRecord, SlotOutcome};
use draft_lens::DraftScanner;

const SIZE: u32 = 96;
const BLOCK: u32 = 8;
const BACKGROUND: Rgba<u8> = Rgba([30, 30, 30, 255]);
const RIBBON: Rgba<u8> = Rgba([200, 20, 20, 255]);

fn block_value(bx: u32, by: u32, seed: u64) -> u8 {
    let mut v = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(((bx as u64) << 32) | by as u64);
    v ^= v >> 33;
    v = v.wrapping_mul(0xff51_afd7_ed55_8ccd);
    v ^= v >> 33;
    v = v.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    v ^= v >> 33;
    (v & 0xff) as u8
}

fn portrait(seed: u64) -> GrayImage {
    GrayImage::from_fn(SIZE, SIZE, |x, y| {
        Luma([block_value(x / BLOCK, y / BLOCK, seed)])
    })
}

/// Same art as `base` on the right half, different on the left
fn lookalike(base: u64, alt: u64) -> GrayImage {
    GrayImage::from_fn(SIZE, SIZE, |x, y| {
        let seed = if x < SIZE / 2 { alt } else { base };
        Luma([block_value(x / BLOCK, y / BLOCK, seed)])
    })
}

fn save(image: &GrayImage, path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    image.save(path).unwrap();
}

fn paste(frame: &mut RgbaImage, art: &GrayImage, x0: u32, y0: u32, dim: f32) {
    for (x, y, p) in art.enumerate_pixels() {
        let v = (p[0] as f32 * dim) as u8;
        frame.put_pixel(x0 + x, y0 + y, Rgba([v, v, v, 255]));
    }
}

fn fill(frame: &mut RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgba<u8>) {
    for y in y0..y1 {
        for x in x0..x1 {
            frame.put_pixel(x, y, color);
        }
    }
}

const A1: u64 = 101;
const B: u64 = 202;
const A2_LEFT: u64 = 303;

#[test]
fn test_five_slot_draft() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    save(&portrait(A1), &templates.join("a/default.png"));
    save(&lookalike(B, A2_LEFT), &templates.join("a/lookalike.png"));
    save(&portrait(B), &templates.join("b/default.png"));

    let roi_config = dir.path().join("roi_config.json");
    std::fs::write(
        &roi_config,
        r#"{"rois": [[20,40,96,96],[200,40,96,96],[380,40,96,96],[560,40,96,96],[900,40,96,96]]}"#,
    )
    .unwrap();

    let mut frame = RgbaImage::from_pixel(800, 180, BACKGROUND);
    paste(&mut frame, &portrait(A1), 20, 40, 1.0);
    paste(&mut frame, &portrait(B), 200, 40, 1.0);
    // slot 2 stays empty background
    paste(&mut frame, &portrait(A1), 560, 40, 0.5);
    // ribbon covering slot 3's context belt
    fill(&mut frame, 650, 10, 720, 170, RIBBON);

    let scanner = DraftScanner::from_paths(
        Settings::default(),
        &templates,
        &roi_config,
        Some(&dir.path().join("banned.png")),
    )
    .unwrap();
    assert_eq!(scanner.library().identities().len(), 2);
    assert_eq!(scanner.library().variant_count(), 3);

    let report = scanner.scan(&frame).unwrap();
    assert_eq!(report.results.len(), 5);
    let slots: Vec<usize> = report.results.iter().map(SlotOutcome::slot).collect();
    assert_eq!(slots, vec![0, 1, 2, 3, 4]);

    let slot0 = report.results[0].result().unwrap();
    assert_eq!(slot0.identity.as_deref(), Some("a"));
    assert!(!slot0.banned);

    let slot1 = report.results[1].result().unwrap();
    assert_eq!(slot1.identity.as_deref(), Some("b"));
    assert!(!slot1.banned);
    assert!(slot1.runner_up > 0, "lookalike variant should score");

    let slot2 = report.results[2].result().unwrap();
    assert_eq!(slot2.identity, None);
    assert_eq!(slot2.score, 0);
    assert!(!slot2.banned);

    let slot3 = report.results[3].result().unwrap();
    assert!(slot3.banned);
    assert!(slot3.metrics.red_ratio_ctx > 0.9);
    assert!(slot3.metrics.sat_mean <= 80.0);
    assert!(slot3.metrics.val_mean <= 150.0);

    assert!(matches!(report.results[4], SlotOutcome::Failed { slot: 4, .. }));

    let record = MatchRecord::new(&report, scanner.settings().clean_limit);
    assert_eq!(record.results.len(), 5);
    assert_eq!(record.results[3].best, None);
    assert!(record.results[3].banned);
    assert_eq!(record.summary.clean, vec!["a", "b"]);
    assert!(record.results[4].error.is_some());

    let overlay = annotate(&frame, &report);
    assert_eq!(overlay.dimensions(), frame.dimensions());
}

#[test]
fn test_prefix_names_resolve_by_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    save(&portrait(7), &templates.join("sol.png"));
    save(&portrait(8), &templates.join("Solaris.png"));

    let roi_config = dir.path().join("roi_config.json");
    std::fs::write(&roi_config, r#"{"rois": [[10,10,96,96]], "extra": true}"#).unwrap();

    let mut frame = RgbaImage::from_pixel(200, 120, BACKGROUND);
    paste(&mut frame, &portrait(8), 10, 10, 1.0);

    let scanner =
        DraftScanner::from_paths(Settings::default(), &templates, &roi_config, None).unwrap();
    let report = scanner.scan(&frame).unwrap();
    let slot = report.results[0].result().unwrap();
    assert_eq!(slot.identity.as_deref(), Some("solaris"));
}

#[test]
fn test_scaled_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    save(&portrait(A1), &templates.join("a.png"));
    save(&portrait(B), &templates.join("b.png"));

    // calibrated at half resolution
    let roi_config = dir.path().join("roi_config.json");
    std::fs::write(
        &roi_config,
        r#"{"rois": [[10,20,48,48]], "base_size": [400, 90]}"#,
    )
    .unwrap();

    let mut frame = RgbaImage::from_pixel(800, 180, BACKGROUND);
    paste(&mut frame, &portrait(B), 20, 40, 1.0);

    let scanner =
        DraftScanner::from_paths(Settings::default(), &templates, &roi_config, None).unwrap();
    let report = scanner.scan(&frame).unwrap();
    let slot = report.results[0].result().unwrap();
    assert_eq!(slot.roi, draft_lens::config::Rect::new(20, 40, 96, 96));
    assert_eq!(slot.identity.as_deref(), Some("b"));
}

#[test]
fn test_bad_inputs_fail_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let templates = dir.path().join("templates");
    std::fs::create_dir_all(&templates).unwrap();

    let roi_config = dir.path().join("roi_config.json");
    std::fs::write(&roi_config, r#"{"rois": [[0,0,10,10]]}"#).unwrap();
    assert!(DraftScanner::from_paths(Settings::default(), &templates, &roi_config, None).is_err());

    save(&portrait(1), &templates.join("x.png"));
    std::fs::write(&roi_config, r#"{"rois": []}"#).unwrap();
    assert!(DraftScanner::from_paths(Settings::default(), &templates, &roi_config, None).is_err());

    std::fs::write(&roi_config, r#"{"rois": [[0,0,-5,10]]}"#).unwrap();
    assert!(DraftScanner::from_paths(Settings::default(), &templates, &roi_config, None).is_err());
}
