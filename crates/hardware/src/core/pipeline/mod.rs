//! The resampler pipeline: per-task context and the two-phase tick.
//!
//! All queues, tag arrays, and counters of one task live on [`Resampler`];
//! nothing survives across tasks. The external driver calls
//! [`Resampler::tick`] once per model tick with this tick's memory-port
//! responses and receives the requests/writes to put on the wire.
//!
//! Each tick runs two phases with a fixed component order, which is the
//! model's explicit single-writer contract for the two tag arrays:
//!
//! * **Issue phase** — warp read, grad read, parser (batch → tags →
//!   reservation lookups → miss enqueue), fetch issue. Only the parser
//!   writes the reservation array.
//! * **Retire phase** — victim retire, fill install, compute, output
//!   write. Only the fill controller sets compute-array entries and only
//!   the victim controller clears them.
//!
//! Coordination across the phases happens exclusively through the bounded
//! queues and the `pch`/compute sequence counters.

/// Conflict-aware batch sizing.
pub mod batcher;
/// Bilinear interpolation and reduction compute stage.
pub mod compute;
/// Miss queue and fill controller.
pub mod fetch;
/// Separable FIR rescale engine.
pub mod rescale;
/// Time-conflict stall model.
pub mod stall;
/// Victim queue and retirement.
pub mod victim;
/// Warp / grad coordinate stream readers.
pub mod warp_reader;
/// Output write-back engine.
pub mod writeback;

use crate::common::constants::WARP_STRIPE_WIDTH;
use crate::common::data::{ReadRequest, ReadResponse, WriteTransaction};
use crate::common::error::Result;
use crate::config::{TaskDescriptor, TransformMode};
use crate::core::cache::tags::{self, LineRef, MergedTags, PixelWindow};
use crate::core::cache::{CacheStorage, ComputeTagArray, SetSnapshot, TagArray};
use crate::stats::ResampStats;
use batcher::{Batch, BatchParams, BatchPixel};
use compute::{ComputeEngine, ComputeOutcome};
use fetch::{CacheTag, FillController, MissQueue};
use rescale::RescaleEngine;
use stall::TimeConflictModel;
use std::collections::VecDeque;
use tracing::debug;
use victim::{VictimQueue, victim_ctrl};
use warp_reader::{CoordLine, CoordReader};
use writeback::OutputWriter;

/// Memory-port responses delivered to one tick.
#[derive(Debug, Default)]
pub struct TickInputs {
    /// Input-image fill response.
    pub fill: Option<ReadResponse>,
    /// Warp-image read response.
    pub warp: Option<ReadResponse>,
    /// Grad-image read response.
    pub grad: Option<ReadResponse>,
}

/// Memory-port requests produced by one tick.
#[derive(Debug, Default)]
pub struct TickOutputs {
    /// Input-image fetch request.
    pub fill_read: Option<ReadRequest>,
    /// Warp-image read request.
    pub warp_read: Option<ReadRequest>,
    /// Grad-image read request.
    pub grad_read: Option<ReadRequest>,
    /// Output write transaction.
    pub write: Option<WriteTransaction>,
    /// Whether the task has fully drained.
    pub done: bool,
}

/// The coordinate line currently being parsed.
#[derive(Debug)]
struct ActiveLine {
    warp: CoordLine,
    grad: Option<CoordLine>,
    consumed: usize,
}

/// Per-task resampler context and tick driver.
#[derive(Debug)]
pub struct Resampler {
    desc: TaskDescriptor,
    stats: ResampStats,
    tick: u64,
    done: bool,

    reservation: TagArray,
    compute_tags: ComputeTagArray,
    storage: CacheStorage,
    miss_queue: MissQueue,
    fill: FillController,
    victims: VictimQueue,
    writer: OutputWriter,

    warp_reader: Option<CoordReader>,
    grad_reader: Option<CoordReader>,
    active: Option<ActiveLine>,
    pending_batch: Option<Batch>,
    batches: VecDeque<Batch>,
    next_seq: u32,
    parser_done: bool,
    final_sent: bool,

    engine: ComputeEngine,
    time_conflict: Option<TimeConflictModel>,
    rescale: Option<RescaleEngine>,
    final_flush_done: bool,
}

impl Resampler {
    /// Builds a fresh context for one task. Validates the descriptor.
    pub fn new(desc: TaskDescriptor) -> Result<Self> {
        desc.validate()?;

        let rescale = if desc.mode == TransformMode::Rescale {
            Some(RescaleEngine::new(&desc)?)
        } else {
            None
        };
        let warp_reader = if desc.mode == TransformMode::Rescale {
            None
        } else {
            Some(CoordReader::new(
                desc.warp,
                2,
                desc.warp_shuffle_stride,
                desc.task_id,
            ))
        };
        let grad_reader = if desc.mode.is_reduction() {
            desc.grad
                .map(|g| CoordReader::new(g, 1, desc.warp_shuffle_stride, desc.task_id))
        } else {
            None
        };
        let time_conflict = (desc.mode.is_reduction() && desc.time_conflict)
            .then(|| TimeConflictModel::new(desc.time_conflict_depth));

        Ok(Self {
            reservation: TagArray::new(&desc.cache, desc.plru_policy),
            compute_tags: ComputeTagArray::new(&desc.cache),
            storage: CacheStorage::new(&desc.cache),
            miss_queue: MissQueue::new(desc.miss_queue_depth),
            fill: FillController::new(),
            victims: VictimQueue::new(),
            writer: OutputWriter::new(desc.line_write_format),
            warp_reader,
            grad_reader,
            active: None,
            pending_batch: None,
            batches: VecDeque::new(),
            next_seq: 0,
            parser_done: desc.mode == TransformMode::Rescale,
            final_sent: false,
            engine: ComputeEngine::new(),
            time_conflict,
            rescale,
            final_flush_done: false,
            stats: ResampStats::default(),
            tick: 0,
            done: false,
            desc,
        })
    }

    /// Task statistics so far.
    pub const fn stats(&self) -> &ResampStats {
        &self.stats
    }

    /// Whether the task has fully drained.
    pub const fn done(&self) -> bool {
        self.done
    }

    /// Retired-batch sequence counter.
    fn compute_seq(&self) -> u32 {
        self.rescale
            .as_ref()
            .map_or_else(|| self.engine.seq(), RescaleEngine::seq)
    }

    /// Advances the model by one tick.
    ///
    /// Runs the issue phase then the retire phase (see the module docs for
    /// the ordering contract) and returns this tick's port activity.
    pub fn tick(&mut self, inputs: TickInputs) -> Result<TickOutputs> {
        if self.done {
            return Ok(TickOutputs {
                done: true,
                ..TickOutputs::default()
            });
        }

        let mut out = TickOutputs::default();
        self.tick += 1;
        self.stats.ticks += 1;

        // ---- Issue phase ----------------------------------------------
        if let Some(reader) = self.warp_reader.as_mut() {
            if let Some(resp) = inputs.warp {
                reader.accept(&resp)?;
            }
            out.warp_read = reader.issue();
        }
        if let Some(reader) = self.grad_reader.as_mut() {
            if let Some(resp) = inputs.grad {
                reader.accept(&resp)?;
            }
            out.grad_read = reader.issue();
        }
        for reader in [self.warp_reader.as_mut(), self.grad_reader.as_mut()]
            .into_iter()
            .flatten()
        {
            for a in reader.anomalies.drain(..) {
                self.stats.record_coord_anomaly(a);
            }
        }

        if let Some(mut rescale) = self.rescale.take() {
            rescale.issue_step(
                &mut self.reservation,
                &mut self.miss_queue,
                &self.desc,
                &mut self.stats,
            )?;
            self.rescale = Some(rescale);
        } else {
            self.parser_step()?;
        }

        // Close the fetch stream once no further miss can be generated.
        if self.issue_exhausted() && !self.final_sent && self.miss_queue.free_slots() > 0 {
            self.miss_queue.push(CacheTag::final_tag(self.next_seq))?;
            self.final_sent = true;
        }

        out.fill_read = self.fill.issue(&mut self.miss_queue, &self.desc);
        if out.fill_read.is_some() {
            self.stats.read_requests += 1;
        }
        if out.warp_read.is_some() {
            self.stats.read_requests += 1;
        }
        if out.grad_read.is_some() {
            self.stats.read_requests += 1;
        }

        // ---- Retire phase ---------------------------------------------
        self.final_flush();
        let compute_seq = self.compute_seq();
        if self.desc.mode.is_reduction()
            && let Some(write) = victim_ctrl(
                &mut self.victims,
                compute_seq,
                &mut self.compute_tags,
                &self.storage,
                &self.desc,
            )
        {
            self.writer.push_victim(&write);
        }

        let victims = &self.victims;
        self.stats.fills += u64::from(self.fill.step(
            inputs.fill,
            &mut self.storage,
            &mut self.compute_tags,
            |set, way| victims.blocks_slot(set, way),
        )?);

        self.compute_step()?;

        if self.drained() {
            self.writer.finalize();
        }
        out.write = self.writer.emit();
        if out.write.is_some() {
            self.stats.write_transactions += 1;
        }

        if self.drained() && self.writer.done() {
            debug!(ticks = self.tick, "task complete");
            self.done = true;
        }
        out.done = self.done;
        Ok(out)
    }

    /// Queues every still-resident accumulated line for write-back once
    /// all batches have computed (reduction mode task drain).
    fn final_flush(&mut self) {
        if self.final_flush_done
            || !self.desc.mode.is_reduction()
            || !self.issue_exhausted()
            || !self.batches.is_empty()
            || !self.fill.stream_done()
        {
            return;
        }
        let resident: Vec<(usize, usize, u32)> = self.compute_tags.iter_valid().collect();
        for (set, way, line_ref) in resident {
            let line = LineRef {
                row: i32::from((line_ref >> 16) as u16 as i16),
                col_block: i32::from(line_ref as u16 as i16),
            };
            self.victims.push(
                CacheTag {
                    line,
                    bank_row: tags::bank_row_of(line, self.desc.cache.bank_rows) as u8,
                    set: set as u16,
                    way: way as u16,
                    line_ref,
                    pch: self.next_seq,
                },
                self.next_seq,
            );
        }
        self.final_flush_done = true;
    }

    /// Whether the issue side can produce no further work.
    fn issue_exhausted(&self) -> bool {
        self.rescale.as_ref().map_or(
            self.parser_done && self.pending_batch.is_none(),
            RescaleEngine::issue_done,
        )
    }

    /// Whether everything upstream of the writer has drained.
    fn drained(&self) -> bool {
        let compute_idle = self
            .rescale
            .as_ref()
            .map_or(self.batches.is_empty(), RescaleEngine::done);
        self.issue_exhausted()
            && compute_idle
            && self.miss_queue.is_empty()
            && self.fill.stream_done()
            && self.victims.is_empty()
    }

    // ---- Parser -------------------------------------------------------

    /// One parser step: build (or retry) a batch and admit it.
    fn parser_step(&mut self) -> Result<()> {
        if self.parser_done {
            return Ok(());
        }

        if self.pending_batch.is_none() {
            self.refill_active_line();
            self.build_batch();
        }
        if let Some(batch) = self.pending_batch.take() {
            match self.admit(batch)? {
                None => {}
                Some(batch) => {
                    // Miss queue full: retry the same batch next tick.
                    self.stats.miss_queue_stalls += 1;
                    self.pending_batch = Some(batch);
                }
            }
        }
        Ok(())
    }

    /// Pops the next coordinate (and grad) line when the current one is
    /// spent.
    fn refill_active_line(&mut self) {
        if self
            .active
            .as_ref()
            .is_some_and(|a| a.consumed == a.warp.x.len())
        {
            self.active = None;
        }
        if self.active.is_some() {
            return;
        }

        let Some(reader) = self.warp_reader.as_mut() else {
            return;
        };
        let needs_grad = self.grad_reader.is_some();
        if needs_grad
            && self
                .grad_reader
                .as_ref()
                .is_some_and(|g| g.front().is_none())
        {
            return; // Wait for the paired grad line.
        }
        if let Some(warp) = reader.pop() {
            let grad = self.grad_reader.as_mut().and_then(CoordReader::pop);
            self.active = Some(ActiveLine {
                warp,
                grad,
                consumed: 0,
            });
        } else if reader.done() {
            self.parser_done = true;
        }
    }

    /// Sizes and builds the next batch from the active line.
    fn build_batch(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let remaining = active.warp.x.len() - active.consumed;
        if remaining == 0 {
            return;
        }

        let windows: Vec<PixelWindow> = (active.consumed..active.warp.x.len())
            .map(|i| tags::window_of(active.warp.x[i], active.warp.y[i]))
            .collect();
        let params = BatchParams {
            pixels_per_line: self.desc.pixels_per_line(),
            geom: &self.desc.cache,
            image: &self.desc.input,
            background: self.desc.background,
            space_check: self.desc.space_conflict && self.desc.mode.is_reduction(),
        };
        let size = batcher::compute_batch(&windows, self.desc.max_batch, &params);

        let mut merged = MergedTags::new();
        let mut pixels = Vec::with_capacity(size);
        for (i, window) in windows.iter().enumerate().take(size) {
            let idx = active.consumed + i;
            for (bank, line) in batcher::corner_lines(window, &params) {
                // Cannot overflow: compute_batch verified capacity.
                let _ = merged.insert(bank, line);
            }
            pixels.push(BatchPixel {
                out_line: active.warp.line,
                out_pixel: active.warp.stripe * WARP_STRIPE_WIDTH as u32
                    + active.warp.lanes[idx],
                window: *window,
                grad: active
                    .grad
                    .as_ref()
                    .map_or(0.0, |g| g.x[idx]),
            });
        }
        active.consumed += size;

        if merged.two_lookup() {
            self.stats.two_lookup_cycles += 1;
        }
        self.pending_batch = Some(Batch {
            seq: self.next_seq,
            pixels,
            tags: merged,
        });
    }

    /// Runs the batch's reservation lookups and enqueues its misses.
    ///
    /// All pixels in a batch share one admission decision: if the miss
    /// queue cannot absorb every miss, every mutation is rolled back and
    /// the batch is returned for a retry next tick.
    fn admit(&mut self, batch: Batch) -> Result<Option<Batch>> {
        let mut snapshots: Vec<SetSnapshot> = Vec::new();
        let mut pushed = 0usize;
        let mut victims: Vec<CacheTag> = Vec::new();
        let mut lookups = 0u64;
        let mut hits = 0u64;

        let merged: Vec<(usize, LineRef)> = batch.tags.iter().collect();
        for (bank, line) in merged {
            let set = tags::set_of(line, &self.desc.cache);
            let line_ref = tags::ref_of(line);
            if !snapshots.iter().any(|s| s.set() == set) {
                snapshots.push(self.reservation.snapshot_set(set));
            }

            let will_miss = self.reservation.probe(set, line_ref).is_none();
            if will_miss && self.miss_queue.free_slots() == 0 {
                for snap in &snapshots {
                    self.reservation.restore_set(snap);
                }
                self.miss_queue.truncate_back(pushed);
                return Ok(Some(batch));
            }

            let lookup = self.reservation.reference(set, line_ref);
            lookups += 1;
            if lookup.hit {
                hits += 1;
                continue;
            }

            self.miss_queue.push(CacheTag {
                line,
                bank_row: bank as u8,
                set: set as u16,
                way: lookup.way as u16,
                line_ref,
                pch: batch.seq,
            })?;
            pushed += 1;

            if let Some(evicted_ref) = lookup.evicted {
                let evicted_line = LineRef {
                    row: i32::from((evicted_ref >> 16) as u16 as i16),
                    col_block: i32::from(evicted_ref as u16 as i16),
                };
                victims.push(CacheTag {
                    line: evicted_line,
                    bank_row: tags::bank_row_of(evicted_line, self.desc.cache.bank_rows) as u8,
                    set: set as u16,
                    way: lookup.way as u16,
                    line_ref: evicted_ref,
                    pch: batch.seq,
                });
            }
        }

        self.stats.lookups += lookups;
        self.stats.hits += hits;
        self.stats.misses += lookups - hits;
        self.stats.victims += victims.len() as u64;
        if self.desc.mode.is_reduction() {
            for tag in victims {
                self.victims.push(tag, batch.seq);
            }
        }
        self.next_seq += 1;
        self.batches.push_back(batch);
        Ok(None)
    }

    // ---- Compute ------------------------------------------------------

    /// Attempts to retire the oldest admitted batch.
    fn compute_step(&mut self) -> Result<()> {
        if let Some(mut rescale) = self.rescale.take() {
            if let Some(pixels) = rescale.compute_step(
                &self.compute_tags,
                &self.storage,
                &self.desc,
                &mut self.stats,
            )? {
                for px in &pixels {
                    self.writer.push_pixel(px, &self.desc);
                }
            }
            self.rescale = Some(rescale);
            return Ok(());
        }

        let Some(batch) = self.batches.front() else {
            return Ok(());
        };
        let outcome = self.engine.try_compute(
            batch,
            &self.compute_tags,
            &mut self.storage,
            &self.desc,
            self.time_conflict.as_mut(),
            self.tick,
            &mut self.stats,
        )?;
        match outcome {
            ComputeOutcome::Stalled(_) => {}
            ComputeOutcome::Reduced => {
                let _ = self.batches.pop_front();
            }
            ComputeOutcome::Interpolated(pixels) => {
                for px in &pixels {
                    self.writer.push_pixel(px, &self.desc);
                }
                let _ = self.batches.pop_front();
            }
        }
        Ok(())
    }
}
