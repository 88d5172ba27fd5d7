//! Bilinear interpolation and reduction compute stage.
//!
//! A batch may only compute once every merged tag is present in the
//! compute tag array (data has actually landed). Forward and
//! backward-pass-1 batches interpolate each pixel's 2×2 window and
//! quantize to the output format; backward-pass-2 (reduction) batches
//! instead accumulate a weighted gradient contribution into the four
//! corner pixels' cached bytes in place, gated by the time-conflict stall
//! model.
//!
//! A stalled tick is not an error; a stall outlasting the descriptor's
//! cycle budget is fatal.

use crate::common::error::{ModelError, Result};
use crate::config::{BackgroundMode, Interpolation, TaskDescriptor, TransformMode};
use crate::core::cache::tags::{
    self, CornerSource, PixelWindow, corner_positions, resolve_corner,
};
use crate::core::cache::{CacheStorage, ComputeTagArray};
use crate::core::pipeline::batcher::Batch;
use crate::core::pipeline::stall::TimeConflictModel;
use crate::numeric;
use crate::stats::ResampStats;
use tracing::trace;

/// One computed output pixel, quantized to the output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputPixel {
    /// Output image line.
    pub line: u32,
    /// Output pixel column.
    pub pixel: u32,
    /// Raw output bits, right-aligned.
    pub bits: u32,
}

/// Why a batch could not compute this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Some merged tag has no data in the compute array yet.
    DataMiss,
    /// An overlapping accumulation is still in flight; resume at the tick.
    TimeConflict(u64),
}

/// Result of one compute attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeOutcome {
    /// The batch must retry next tick.
    Stalled(StallReason),
    /// Interpolated pixels, in batch order.
    Interpolated(Vec<OutputPixel>),
    /// Reduction writes were applied in place.
    Reduced,
}

/// The compute stage: consumes admitted batches in order.
#[derive(Debug)]
pub struct ComputeEngine {
    seq: u32,
    stall_ticks: u32,
}

impl ComputeEngine {
    /// Creates an idle engine.
    pub const fn new() -> Self {
        Self {
            seq: 0,
            stall_ticks: 0,
        }
    }

    /// Number of batches retired so far (the compute sequence counter).
    pub const fn seq(&self) -> u32 {
        self.seq
    }

    /// Attempts to compute the batch.
    ///
    /// On a stall the engine charges one tick against the stall budget;
    /// exceeding [`TaskDescriptor::compute_stall_limit`] is fatal. Progress
    /// resets the budget.
    pub fn try_compute(
        &mut self,
        batch: &Batch,
        compute_tags: &ComputeTagArray,
        storage: &mut CacheStorage,
        desc: &TaskDescriptor,
        time_conflict: Option<&mut TimeConflictModel>,
        now: u64,
        stats: &mut ResampStats,
    ) -> Result<ComputeOutcome> {
        // All merged tags must hold data before any pixel may read.
        let ppl = desc.pixels_per_line();
        for (_, line) in batch.tags.iter() {
            let set = tags::set_of(line, &desc.cache);
            if compute_tags.probe(set, tags::ref_of(line)).is_none() {
                return self.stall(StallReason::DataMiss, desc, stats);
            }
        }

        if let Some(tc) = time_conflict {
            let windows: Vec<PixelWindow> = batch.pixels.iter().map(|p| p.window).collect();
            if let Some(resume) = tc.check(&windows, now) {
                stats.time_conflict_stalls += 1;
                return self.stall(StallReason::TimeConflict(resume), desc, stats);
            }
            tc.record(&windows, now);
        }

        self.stall_ticks = 0;
        self.seq += 1;
        stats.record_batch(batch.pixels.len());
        trace!(seq = self.seq, size = batch.pixels.len(), "batch computed");

        if desc.mode == TransformMode::BackwardPass2 {
            for px in &batch.pixels {
                Self::reduce_pixel(px.window, px.grad, compute_tags, storage, desc, ppl, stats);
            }
            return Ok(ComputeOutcome::Reduced);
        }

        let mut out = Vec::with_capacity(batch.pixels.len());
        for px in &batch.pixels {
            let value = Self::interpolate(px.window, compute_tags, storage, desc, ppl);
            if let Some(a) = numeric::classify(value) {
                stats.record_interp_anomaly(a);
            }
            out.push(OutputPixel {
                line: px.out_line,
                pixel: px.out_pixel,
                bits: numeric::float_to_bits(
                    value,
                    desc.output.format,
                    &desc.quantize_options(),
                ),
            });
        }
        Ok(ComputeOutcome::Interpolated(out))
    }

    /// Books a stalled tick and enforces the stall budget.
    fn stall(
        &mut self,
        reason: StallReason,
        desc: &TaskDescriptor,
        stats: &mut ResampStats,
    ) -> Result<ComputeOutcome> {
        stats.compute_stalls += 1;
        self.stall_ticks += 1;
        if self.stall_ticks > desc.compute_stall_limit {
            return Err(ModelError::ComputeStallTimeout {
                ticks: self.stall_ticks,
                limit: desc.compute_stall_limit,
            });
        }
        Ok(ComputeOutcome::Stalled(reason))
    }

    /// Two-pass bilinear interpolation of one window.
    fn interpolate(
        window: PixelWindow,
        compute_tags: &ComputeTagArray,
        storage: &CacheStorage,
        desc: &TaskDescriptor,
        ppl: u32,
    ) -> f32 {
        let v = Self::corner_values(window, compute_tags, storage, desc, ppl);
        let (wx, wy) = Self::weights(window, desc.interpolation);
        // Horizontal then vertical; mathematically equivalent either order.
        let top = v[0] * (1.0 - wx) + v[1] * wx;
        let bot = v[2] * (1.0 - wx) + v[3] * wx;
        top * (1.0 - wy) + bot * wy
    }

    /// Accumulates a weighted gradient into the window's cached corners.
    fn reduce_pixel(
        window: PixelWindow,
        grad: f32,
        compute_tags: &ComputeTagArray,
        storage: &mut CacheStorage,
        desc: &TaskDescriptor,
        ppl: u32,
        stats: &mut ResampStats,
    ) {
        let (wx, wy) = Self::weights(window, desc.interpolation);
        let weights = [
            (1.0 - wx) * (1.0 - wy),
            wx * (1.0 - wy),
            (1.0 - wx) * wy,
            wx * wy,
        ];
        for ((x, y), w) in corner_positions(&window).into_iter().zip(weights) {
            let CornerSource::Cached { x, y } =
                resolve_corner(x, y, &desc.input, desc.background)
            else {
                continue;
            };
            let Some((set, way, off)) = Self::locate(x, y, compute_tags, desc, ppl) else {
                continue;
            };
            let eb = desc.input.format.bytes();
            let line = storage.line_mut(set, way);
            let bits = read_bits(&line[off..off + eb]);
            let mut acc =
                numeric::bits_to_float(bits, desc.input.format) + grad * w;
            if let Some(a) = numeric::classify(acc) {
                stats.record_interp_anomaly(a);
                if acc.is_infinite() {
                    acc = desc.input.format.max_finite().copysign(acc);
                }
            }
            let out = numeric::float_to_bits(acc, desc.input.format, &desc.quantize_options());
            write_bits(&mut line[off..off + eb], out);
        }
    }

    /// The four corner values, with background substitution.
    fn corner_values(
        window: PixelWindow,
        compute_tags: &ComputeTagArray,
        storage: &CacheStorage,
        desc: &TaskDescriptor,
        ppl: u32,
    ) -> [f32; 4] {
        let mut v = [desc.bg_value; 4];
        for (i, (x, y)) in corner_positions(&window).into_iter().enumerate() {
            match resolve_corner(x, y, &desc.input, desc.background) {
                CornerSource::Background => {}
                CornerSource::Cached { x, y } => {
                    if let Some((set, way, off)) = Self::locate(x, y, compute_tags, desc, ppl) {
                        let eb = desc.input.format.bytes();
                        let bits = read_bits(&storage.line(set, way)[off..off + eb]);
                        v[i] = numeric::bits_to_float(bits, desc.input.format);
                    }
                }
            }
        }
        v
    }

    /// Fractional weights; nearest-neighbor collapses them to 0/1.
    fn weights(window: PixelWindow, mode: Interpolation) -> (f32, f32) {
        match mode {
            Interpolation::Bilinear => (window.wx, window.wy),
            Interpolation::NearestNeighbor => (window.wx.round(), window.wy.round()),
        }
    }

    /// Locates a source pixel's bytes in cache storage.
    fn locate(
        x: i32,
        y: i32,
        compute_tags: &ComputeTagArray,
        desc: &TaskDescriptor,
        ppl: u32,
    ) -> Option<(usize, usize, usize)> {
        let line = tags::line_of(x, y, ppl);
        let set = tags::set_of(line, &desc.cache);
        let way = compute_tags.probe(set, tags::ref_of(line))?;
        let off = x.rem_euclid(ppl as i32) as usize * desc.input.format.bytes();
        Some((set, way, off))
    }
}

impl Default for ComputeEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Little-endian bits of a 1/2/4-byte element.
fn read_bits(bytes: &[u8]) -> u32 {
    let mut bits = 0u32;
    for (i, b) in bytes.iter().enumerate() {
        bits |= u32::from(*b) << (8 * i);
    }
    bits
}

/// Stores the low bytes of `bits` little-endian.
fn write_bits(bytes: &mut [u8], bits: u32) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (bits >> (8 * i)) as u8;
    }
}

/// Shared helper for tests and the rescale engine: decode a source pixel
/// already present in the compute array.
pub(crate) fn cached_pixel(
    x: i32,
    y: i32,
    compute_tags: &ComputeTagArray,
    storage: &CacheStorage,
    desc: &TaskDescriptor,
) -> Option<f32> {
    let ppl = desc.pixels_per_line();
    let line = tags::line_of(x, y, ppl);
    let set = tags::set_of(line, &desc.cache);
    let way = compute_tags.probe(set, tags::ref_of(line))?;
    let eb = desc.input.format.bytes();
    let off = x.rem_euclid(ppl as i32) as usize * eb;
    let bits = read_bits(&storage.line(set, way)[off..off + eb]);
    Some(numeric::bits_to_float(bits, desc.input.format))
}

/// Resolves a rescale source pixel with boundary saturation.
pub(crate) fn saturated_pixel(
    x: i32,
    y: i32,
    compute_tags: &ComputeTagArray,
    storage: &CacheStorage,
    desc: &TaskDescriptor,
) -> Option<f32> {
    let (cx, cy) = match resolve_corner(x, y, &desc.input, BackgroundMode::BoundaryClip) {
        CornerSource::Cached { x, y } => (x, y),
        CornerSource::Background => return Some(desc.bg_value),
    };
    cached_pixel(cx, cy, compute_tags, storage, desc)
}
