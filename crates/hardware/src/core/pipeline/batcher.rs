//! Conflict-aware batch sizing.
//!
//! Consecutive output pixels advance together only while their 2×2 source
//! windows can be serviced in one cycle: a pixel whose window lands in the
//! same bank row as the lead pixel but on a different cache line would
//! contend for the bank's single port (bank conflict), and in reduction
//! mode two read-modify-write windows may not share bytes of one line
//! (space conflict). The first conflicting pixel terminates the batch.
//!
//! The batch size is the model's analogue of the hardware's adaptive
//! issue-width throttle.

use crate::config::{BackgroundMode, CacheGeometry, ImageGeometry};
use crate::core::cache::tags::{
    self, CornerSource, LineRef, MergedTags, PixelWindow, corner_positions, resolve_corner,
};

/// Inputs shared by every conflict decision of one task.
#[derive(Debug, Clone, Copy)]
pub struct BatchParams<'a> {
    /// Input pixels per cache line.
    pub pixels_per_line: u32,
    /// Cache geometry.
    pub geom: &'a CacheGeometry,
    /// Source image geometry.
    pub image: &'a ImageGeometry,
    /// Boundary policy (decides which corners reach the cache at all).
    pub background: BackgroundMode,
    /// Space-conflict check enable (reduction mode).
    pub space_check: bool,
}

/// One pixel of an admitted batch.
#[derive(Debug, Clone)]
pub struct BatchPixel {
    /// Output image line.
    pub out_line: u32,
    /// Output pixel column.
    pub out_pixel: u32,
    /// 2×2 source window.
    pub window: PixelWindow,
    /// Gradient weight (reduction mode; 0 otherwise).
    pub grad: f32,
}

/// A group of pixels advancing together through the pipeline.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Parser-side sequence number (`pch` of any victim it creates).
    pub seq: u32,
    /// Pixels in issue order.
    pub pixels: Vec<BatchPixel>,
    /// Per-bank-row merged tags.
    pub tags: MergedTags,
}

/// Distinct cache lines touched by a window's cached corners.
pub fn corner_lines(w: &PixelWindow, p: &BatchParams<'_>) -> Vec<(usize, LineRef)> {
    let mut out: Vec<(usize, LineRef)> = Vec::with_capacity(4);
    for (x, y) in corner_positions(w) {
        if let CornerSource::Cached { x, y } = resolve_corner(x, y, p.image, p.background) {
            let line = tags::line_of(x, y, p.pixels_per_line);
            let bank = tags::bank_row_of(line, p.geom.bank_rows);
            if !out.iter().any(|(_, l)| *l == line) {
                out.push((bank, line));
            }
        }
    }
    out
}

/// Checks that pixel `b` can issue in the same cycle as lead pixel `a`.
///
/// Returns `false` on a bank conflict (same bank row, different line) or,
/// when enabled, a space conflict (same line, overlapping column spans).
pub fn no_conflict_check(a: &PixelWindow, b: &PixelWindow, p: &BatchParams<'_>) -> bool {
    let la = corner_lines(a, p);
    let lb = corner_lines(b, p);

    for (bank_a, line_a) in &la {
        for (bank_b, line_b) in &lb {
            if bank_a == bank_b && line_a != line_b {
                return false;
            }
            if p.space_check && line_a == line_b {
                // Column spans within the shared line, in pixels.
                let (a0, a1) = (a.x0, a.x0 + 1);
                let (b0, b1) = (b.x0, b.x0 + 1);
                if a0 <= b1 && b0 <= a1 {
                    return false;
                }
            }
        }
    }
    true
}

/// Computes the batch size for a run of consecutive windows.
///
/// Pairwise-checks window 0 against window `i` and stops at the first
/// conflict, or when the merged-tag table cannot absorb another window
/// (a third distinct tag in some bank row). A single pixel is always a
/// valid batch.
pub fn compute_batch(windows: &[PixelWindow], max_batch: usize, p: &BatchParams<'_>) -> usize {
    let limit = windows.len().min(max_batch);
    if limit == 0 {
        return 0;
    }

    let mut merged = MergedTags::new();
    for (bank, line) in corner_lines(&windows[0], p) {
        if merged.insert(bank, line).is_err() {
            // A single window never needs more than two tags per bank row:
            // its two rows land in different bank rows.
            return 1;
        }
    }

    for (i, w) in windows.iter().enumerate().take(limit).skip(1) {
        if !no_conflict_check(&windows[0], w, p) {
            return i;
        }
        let mut trial = merged.clone();
        let mut fits = true;
        for (bank, line) in corner_lines(w, p) {
            if trial.insert(bank, line).is_err() {
                fits = false;
                break;
            }
        }
        if !fits {
            return i;
        }
        merged = trial;
    }
    limit
}
