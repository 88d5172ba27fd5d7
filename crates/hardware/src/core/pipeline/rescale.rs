//! Separable FIR rescale engine.
//!
//! Rescale mode replaces the warp-driven 2×2 gather with a phase-indexed
//! multi-tap convolution, vertical pass then horizontal pass, fed from the
//! same cache. For each output line the engine references every cache line
//! of the vertical tap window (issue side, through the normal miss path),
//! then — once all of them hold data — convolves: a column buffer
//! accumulates the vertical taps, and the horizontal taps reduce that
//! buffer per output pixel. Boundary taps saturate to the image edge, and
//! results share the interpolation path's legalize/quantize tail.
//!
//! A two-line ping-pong bounds how far issue may run ahead of compute,
//! matching the hardware's pair of output line caches.

use crate::common::error::{ModelError, Result};
use crate::config::{FilterTable, TaskDescriptor};
use crate::core::cache::tags::{self, LineRef};
use crate::core::cache::{CacheStorage, ComputeTagArray, TagArray};
use crate::core::pipeline::compute::{OutputPixel, saturated_pixel};
use crate::core::pipeline::fetch::{CacheTag, MissQueue};
use crate::numeric;
use crate::stats::ResampStats;
use std::collections::VecDeque;
use tracing::trace;

/// Output lines that may be in flight between issue and compute.
const LINE_PIPELINE: usize = 2;

/// One output line whose source tap window has been issued.
#[derive(Debug, Clone)]
struct PendingLine {
    oy: u32,
    y_top: i32,
    vphase: usize,
    lines: Vec<LineRef>,
}

/// Tap-window geometry of one output position on one axis.
#[derive(Debug, Clone, Copy)]
struct TapWindow {
    first: i32,
    phase: usize,
}

/// Computes the tap window of output index `o` under a filter table.
fn tap_window(o: u32, table: &FilterTable) -> TapWindow {
    let center = (o as f32 + 0.5) * table.scale_inv - 0.5;
    let base = center.floor();
    let frac = center - base;
    let phase = ((frac * f32::from(table.num_phases)) as usize)
        .min(table.num_phases as usize - 1);
    TapWindow {
        first: base as i32 - (i32::from(table.num_taps) / 2 - 1),
        phase,
    }
}

/// The rescale pipeline: tag issue and line compute.
#[derive(Debug)]
pub struct RescaleEngine {
    filter_x: FilterTable,
    filter_y: FilterTable,
    issue_oy: u32,
    /// Remaining (row, block) references for the line being issued.
    issue_list: Vec<LineRef>,
    issue_meta: Option<PendingLine>,
    pending: VecDeque<PendingLine>,
    seq: u32,
    stall_ticks: u32,
    issue_done: bool,
}

impl RescaleEngine {
    /// Builds the engine from a validated rescale descriptor.
    pub fn new(desc: &TaskDescriptor) -> Result<Self> {
        let filter_x = desc
            .rescale_x
            .clone()
            .ok_or_else(|| ModelError::InvalidDescriptor("missing x filter".into()))?;
        let filter_y = desc
            .rescale_y
            .clone()
            .ok_or_else(|| ModelError::InvalidDescriptor("missing y filter".into()))?;
        Ok(Self {
            filter_x,
            filter_y,
            issue_oy: 0,
            issue_list: Vec::new(),
            issue_meta: None,
            pending: VecDeque::new(),
            seq: 0,
            stall_ticks: 0,
            issue_done: false,
        })
    }

    /// Batches retired (kept symmetrical with the warp compute engine).
    pub const fn seq(&self) -> u32 {
        self.seq
    }

    /// Whether every output line's tags have been issued.
    pub const fn issue_done(&self) -> bool {
        self.issue_done
    }

    /// Whether all lines are issued and computed.
    pub fn done(&self) -> bool {
        self.issue_done && self.pending.is_empty() && self.issue_meta.is_none()
    }

    /// Prepares the tap-window tag list for the next output line.
    fn start_line(&mut self, desc: &TaskDescriptor) {
        let oy = self.issue_oy;
        let v = tap_window(oy, &self.filter_y);
        let taps = i32::from(self.filter_y.num_taps);
        let ppl = desc.pixels_per_line();
        let blocks = desc.input.row_bytes().div_ceil(desc.cache.line_bytes as u32) as i32;

        let mut lines = Vec::new();
        for t in 0..taps {
            let row = (v.first + t).clamp(0, desc.input.height as i32 - 1);
            for block in 0..blocks {
                let line = tags::line_of(block * ppl as i32, row, ppl);
                if !lines.contains(&line) {
                    lines.push(line);
                }
            }
        }
        self.issue_list = lines.clone();
        self.issue_meta = Some(PendingLine {
            oy,
            y_top: v.first,
            vphase: v.phase,
            lines,
        });
        trace!(oy, y_top = v.first, tags = self.issue_list.len(), "rescale line issue start");
    }

    /// Issues up to `max_batch` references for the current output line.
    ///
    /// Misses enqueue through the shared miss queue; when it cannot absorb
    /// a reference the issue pauses (and retries the same tag next tick).
    pub fn issue_step(
        &mut self,
        tag_array: &mut TagArray,
        miss_queue: &mut MissQueue,
        desc: &TaskDescriptor,
        stats: &mut ResampStats,
    ) -> Result<()> {
        if self.issue_done || self.pending.len() >= LINE_PIPELINE {
            return Ok(());
        }
        if self.issue_meta.is_none() {
            self.start_line(desc);
        }

        let mut budget = desc.max_batch;
        while budget > 0 && !self.issue_list.is_empty() {
            let line = self.issue_list[0];
            let set = tags::set_of(line, &desc.cache);
            let line_ref = tags::ref_of(line);

            let will_miss = tag_array.probe(set, line_ref).is_none();
            if will_miss && miss_queue.free_slots() == 0 {
                stats.miss_queue_stalls += 1;
                return Ok(());
            }

            let lookup = tag_array.reference(set, line_ref);
            stats.lookups += 1;
            if lookup.hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
                if lookup.evicted.is_some() {
                    stats.victims += 1;
                }
                miss_queue.push(CacheTag {
                    line,
                    bank_row: tags::bank_row_of(line, desc.cache.bank_rows) as u8,
                    set: set as u16,
                    way: lookup.way as u16,
                    line_ref,
                    pch: self.seq,
                })?;
            }
            let _ = self.issue_list.remove(0);
            budget -= 1;
        }

        if self.issue_list.is_empty()
            && let Some(meta) = self.issue_meta.take()
        {
            self.pending.push_back(meta);
            self.issue_oy += 1;
            if self.issue_oy == desc.output.height {
                self.issue_done = true;
            }
        }
        Ok(())
    }

    /// Computes the oldest pending output line if its data has landed.
    ///
    /// Returns the line's pixels, or `None` while stalled (the stall
    /// budget applies) or idle.
    pub fn compute_step(
        &mut self,
        compute_tags: &ComputeTagArray,
        storage: &CacheStorage,
        desc: &TaskDescriptor,
        stats: &mut ResampStats,
    ) -> Result<Option<Vec<OutputPixel>>> {
        let Some(front) = self.pending.front() else {
            return Ok(None);
        };

        for line in &front.lines {
            let set = tags::set_of(*line, &desc.cache);
            if compute_tags.probe(set, tags::ref_of(*line)).is_none() {
                stats.compute_stalls += 1;
                self.stall_ticks += 1;
                if self.stall_ticks > desc.compute_stall_limit {
                    return Err(ModelError::ComputeStallTimeout {
                        ticks: self.stall_ticks,
                        limit: desc.compute_stall_limit,
                    });
                }
                return Ok(None);
            }
        }
        self.stall_ticks = 0;

        let line = self
            .pending
            .pop_front()
            .ok_or(ModelError::QueueUnderflow {
                queue: "rescale pending",
            })?;
        let pixels = self.convolve_line(&line, compute_tags, storage, desc, stats);
        self.seq += 1;
        stats.record_batch(1);
        trace!(oy = line.oy, pixels = pixels.len(), "rescale line computed");
        Ok(Some(pixels))
    }

    /// Vertical-then-horizontal separable convolution of one output line.
    fn convolve_line(
        &self,
        line: &PendingLine,
        compute_tags: &ComputeTagArray,
        storage: &CacheStorage,
        desc: &TaskDescriptor,
        stats: &mut ResampStats,
    ) -> Vec<OutputPixel> {
        let vtaps = usize::from(self.filter_y.num_taps);
        let htaps = usize::from(self.filter_x.num_taps);
        let out_w = desc.output.width;

        // Source column span needed by every output pixel of this line.
        let first_win = tap_window(0, &self.filter_x);
        let last_win = tap_window(out_w - 1, &self.filter_x);
        let x_min = first_win.first;
        let x_max = last_win.first + htaps as i32;

        // Vertical pass: accumulate the tap rows into one column buffer.
        let mut columns = Vec::with_capacity((x_max - x_min) as usize);
        for x in x_min..x_max {
            let mut acc = 0.0f32;
            for t in 0..vtaps {
                let y = line.y_top + t as i32;
                let pix = saturated_pixel(x, y, compute_tags, storage, desc).unwrap_or(0.0);
                acc += self.filter_y.coeff(line.vphase, t) * pix;
            }
            columns.push(acc);
        }

        // Horizontal pass over the accumulated columns.
        let mut out = Vec::with_capacity(out_w as usize);
        for ox in 0..out_w {
            let w = tap_window(ox, &self.filter_x);
            let mut acc = 0.0f32;
            for t in 0..htaps {
                let idx = (w.first + t as i32 - x_min) as usize;
                acc += self.filter_x.coeff(w.phase, t) * columns[idx];
            }
            if let Some(a) = numeric::classify(acc) {
                stats.record_interp_anomaly(a);
            }
            out.push(OutputPixel {
                line: line.oy,
                pixel: ox,
                bits: numeric::float_to_bits(
                    acc,
                    desc.output.format,
                    &desc.quantize_options(),
                ),
            });
        }
        out
    }
}
