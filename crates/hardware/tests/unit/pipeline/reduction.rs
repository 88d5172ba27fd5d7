//! Reduction (backward-pass-2) scenarios: in-place accumulation, victim
//! write-back, and time-conflict serialization.

use crate::common::harness::{memory_for, run_task, small_task, with_grad};
use pretty_assertions::assert_eq;
use warpsim_core::config::{BackgroundMode, CacheGeometry, TransformMode};
use warpsim_core::numeric::NumericFormat;

fn reduction_task(edge: u32) -> warpsim_core::TaskDescriptor {
    let mut desc = with_grad(small_task(edge, NumericFormat::Fp32));
    desc.mode = TransformMode::BackwardPass2;
    desc.background = BackgroundMode::ProgramConstant;
    desc
}

/// Two output pixels accumulating into the same source location: the
/// second must stall until the first retires from the pipeline history,
/// and both contributions must land.
#[test]
fn same_location_accumulations_serialize() {
    let desc = reduction_task(4);
    let grad_img = desc.grad.unwrap();
    let mut mem = memory_for(&desc);
    for y in 0..4 {
        for x in 0..4 {
            mem.store_pixel(&desc.input, x, y, 0.0);
            // Park every pixel out of bounds except the two writers.
            mem.store_warp(&desc.warp, x, y, -100.0, -100.0);
            mem.store_grad(&grad_img, x, y, 0.0);
        }
    }
    mem.store_warp(&desc.warp, 0, 0, 2.0, 2.0);
    mem.store_grad(&grad_img, 0, 0, 2.5);
    mem.store_warp(&desc.warp, 1, 0, 2.0, 2.0);
    mem.store_grad(&grad_img, 1, 0, 2.5);

    let model = run_task(desc.clone(), &mut mem).unwrap();
    assert_eq!(mem.load_pixel(&desc.input, 2, 2), 5.0);
    assert!(
        model.stats().time_conflict_stalls > 0,
        "overlapping accumulations must stall"
    );
}

/// A cache too small for the working set evicts lines mid-task; every
/// accumulated value must still reach memory through the victim path.
#[test]
fn victim_write_back_preserves_all_contributions() {
    let mut desc = reduction_task(8);
    // Stretch the image vertically so rows recycle the 8x2 tag store.
    desc.input.height = 32;
    desc.output.height = 32;
    desc.warp.height = 32;
    let mut grad_img = desc.grad.unwrap();
    grad_img.height = 32;
    desc.grad = Some(grad_img);
    desc.cache = CacheGeometry {
        sets: 8,
        ways: 2,
        bank_rows: 8,
        line_bytes: 128,
    };

    let mut mem = memory_for(&desc);
    for y in 0..32 {
        for x in 0..8 {
            mem.store_pixel(&desc.input, x, y, 0.0);
            mem.store_warp(&desc.warp, x, y, x as f32, y as f32);
            mem.store_grad(&grad_img, x, y, 1.0);
        }
    }

    let model = run_task(desc.clone(), &mut mem).unwrap();
    for y in 0..32 {
        for x in 0..8 {
            assert_eq!(
                mem.load_pixel(&desc.input, x, y),
                1.0,
                "accumulator ({x}, {y})"
            );
        }
    }
    assert!(model.stats().victims > 0, "the working set must evict");
}

/// Fractional accumulation spreads the gradient over the four corners by
/// the bilinear weights.
#[test]
fn fractional_accumulation_splits_by_weight() {
    let desc = reduction_task(4);
    let grad_img = desc.grad.unwrap();
    let mut mem = memory_for(&desc);
    for y in 0..4 {
        for x in 0..4 {
            mem.store_pixel(&desc.input, x, y, 0.0);
            mem.store_warp(&desc.warp, x, y, -100.0, -100.0);
            mem.store_grad(&grad_img, x, y, 0.0);
        }
    }
    mem.store_warp(&desc.warp, 0, 0, 1.5, 2.0);
    mem.store_grad(&grad_img, 0, 0, 8.0);

    let _ = run_task(desc.clone(), &mut mem).unwrap();
    // wx = 0.5, wy = 0: corners (1,2) and (2,2) get half each.
    assert_eq!(mem.load_pixel(&desc.input, 1, 2), 4.0);
    assert_eq!(mem.load_pixel(&desc.input, 2, 2), 4.0);
    assert_eq!(mem.load_pixel(&desc.input, 1, 3), 0.0);
}

/// Reduction without conflicts leaves untouched accumulator pixels at
/// their original values.
#[test]
fn untouched_pixels_survive_the_flush() {
    let desc = reduction_task(4);
    let grad_img = desc.grad.unwrap();
    let mut mem = memory_for(&desc);
    for y in 0..4 {
        for x in 0..4 {
            mem.store_pixel(&desc.input, x, y, 3.0);
            mem.store_warp(&desc.warp, x, y, -100.0, -100.0);
            mem.store_grad(&grad_img, x, y, 0.0);
        }
    }
    mem.store_warp(&desc.warp, 0, 0, 0.0, 0.0);
    mem.store_grad(&grad_img, 0, 0, 1.0);

    let _ = run_task(desc.clone(), &mut mem).unwrap();
    assert_eq!(mem.load_pixel(&desc.input, 0, 0), 4.0);
    assert_eq!(mem.load_pixel(&desc.input, 3, 3), 3.0);
}
