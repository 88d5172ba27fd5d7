//! Per-task statistics collection and reporting.
//!
//! This module tracks performance and anomaly counters for one resampling
//! task. It provides:
//! 1. **Cache behavior:** lookups, hits, fills, victims.
//! 2. **Pipeline throughput:** ticks, batches, pixels, batch-size histogram.
//! 3. **Stalls:** miss-queue back-pressure, compute stalls, time-conflict
//!    stalls, two-lookup bubbles.
//! 4. **Numeric anomalies:** NaN/Inf tallies for coordinates and
//!    interpolation results (legalized, never fatal).

use crate::common::constants::MAX_BATCH;
use crate::numeric::Anomaly;

/// Statistics accumulated over one task.
#[derive(Debug, Clone, Default)]
pub struct ResampStats {
    /// Model ticks elapsed.
    pub ticks: u64,
    /// Reservation tag-array lookups.
    pub lookups: u64,
    /// Reservation lookups that hit.
    pub hits: u64,
    /// Reservation lookups that missed and allocated.
    pub misses: u64,
    /// Lines installed by the fill controller.
    pub fills: u64,
    /// Valid lines displaced by allocations.
    pub victims: u64,
    /// External read requests issued (all ports).
    pub read_requests: u64,
    /// Output write transactions emitted.
    pub write_transactions: u64,

    /// Batches retired by the compute engine.
    pub batches: u64,
    /// Output pixels produced (or reduced) by the compute engine.
    pub pixels: u64,
    /// Histogram of retired batch sizes; index `n-1` counts size-`n` batches.
    pub batch_hist: [u64; MAX_BATCH],

    /// Ticks the parser re-issued a batch because the miss queue was full.
    pub miss_queue_stalls: u64,
    /// Ticks the compute engine waited for data.
    pub compute_stalls: u64,
    /// Ticks the compute engine waited on a time conflict.
    pub time_conflict_stalls: u64,
    /// Cycles charged for double tag lookups in one bank row.
    pub two_lookup_cycles: u64,

    /// NaN warp coordinates legalized.
    pub coord_nan: u64,
    /// Infinite warp coordinates legalized.
    pub coord_inf: u64,
    /// NaN interpolation results legalized.
    pub interp_nan: u64,
    /// Infinite interpolation results legalized.
    pub interp_inf: u64,
}

impl ResampStats {
    /// Hit rate over all reservation lookups, in [0, 1].
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Average retired batch size.
    pub fn avg_batch(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.pixels as f64 / self.batches as f64
        }
    }

    /// Records a retired batch of `size` pixels.
    pub fn record_batch(&mut self, size: usize) {
        self.batches += 1;
        self.pixels += size as u64;
        if size >= 1 && size <= MAX_BATCH {
            self.batch_hist[size - 1] += 1;
        }
    }

    /// Tallies a legalized warp-coordinate anomaly.
    pub fn record_coord_anomaly(&mut self, a: Anomaly) {
        match a {
            Anomaly::Nan => self.coord_nan += 1,
            Anomaly::PosInf | Anomaly::NegInf => self.coord_inf += 1,
        }
    }

    /// Tallies a legalized interpolation-result anomaly.
    pub fn record_interp_anomaly(&mut self, a: Anomaly) {
        match a {
            Anomaly::Nan => self.interp_nan += 1,
            Anomaly::PosInf | Anomaly::NegInf => self.interp_inf += 1,
        }
    }
}
