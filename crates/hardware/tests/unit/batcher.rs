//! Batch sizing scenarios: shared lines batch together, bank conflicts
//! split, conflicts never shrink a batch below one pixel.

use warpsim_core::config::{BackgroundMode, CacheGeometry, ImageGeometry};
use warpsim_core::core::cache::tags::window_of;
use warpsim_core::core::pipeline::batcher::{BatchParams, compute_batch, no_conflict_check};
use warpsim_core::numeric::NumericFormat;

fn geom() -> CacheGeometry {
    CacheGeometry {
        sets: 64,
        ways: 16,
        bank_rows: 8,
        line_bytes: 128,
    }
}

fn image() -> ImageGeometry {
    ImageGeometry {
        addr: 0,
        width: 512,
        height: 512,
        stride: 1024,
        format: NumericFormat::Int16,
    }
}

fn params<'a>(
    geom: &'a CacheGeometry,
    image: &'a ImageGeometry,
    space_check: bool,
) -> BatchParams<'a> {
    BatchParams {
        pixels_per_line: (geom.line_bytes / image.format.bytes()) as u32,
        geom,
        image,
        background: BackgroundMode::BoundaryClip,
        space_check,
    }
}

#[test]
fn shared_cache_line_different_sets_batch_of_two() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, false);
    // Two pixels whose windows share lines within the same rows.
    let ws = [window_of(8.0, 16.0), window_of(12.0, 16.0)];
    assert_eq!(compute_batch(&ws, 8, &p), 2);
}

#[test]
fn same_bank_row_different_lines_batch_of_one() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, false);
    // Rows 16 and 24 share bank row 0 but map to different lines.
    let ws = [window_of(8.0, 16.0), window_of(8.0, 24.0)];
    assert_eq!(compute_batch(&ws, 8, &p), 1);
    assert!(!no_conflict_check(&ws[0], &ws[1], &p));
}

#[test]
fn batch_grows_monotonically_without_conflicts() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, false);
    // A run of pixels inside one pair of lines.
    let ws: Vec<_> = (0..8).map(|i| window_of(8.0 + i as f32, 16.0)).collect();
    for n in 1..=8 {
        assert!(compute_batch(&ws[..n], 8, &p) >= compute_batch(&ws[..n - 1], 8, &p).min(n));
    }
    assert_eq!(compute_batch(&ws, 8, &p), 8);
}

#[test]
fn max_batch_caps_the_result() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, false);
    let ws: Vec<_> = (0..8).map(|i| window_of(8.0 + i as f32, 16.0)).collect();
    assert_eq!(compute_batch(&ws, 4, &p), 4);
}

#[test]
fn reduction_space_conflict_forces_split() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, true);
    // Adjacent read-modify-write windows share bytes of one line.
    let ws = [window_of(8.0, 16.0), window_of(9.0, 16.0)];
    assert_eq!(compute_batch(&ws, 8, &p), 1);
}

#[test]
fn conflicting_lead_pixel_still_issues_alone() {
    let g = geom();
    let img = image();
    let p = params(&g, &img, true);
    let ws = [window_of(8.0, 16.0); 4];
    assert_eq!(compute_batch(&ws, 8, &p), 1);
}
