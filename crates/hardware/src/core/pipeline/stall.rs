//! Time-conflict stall model (reduction mode only).
//!
//! Accumulation into a source pixel is a read-modify-write with a fixed
//! pipeline latency: a batch that touches a pixel still "in flight" from an
//! earlier batch must wait until that batch's writes have retired, or the
//! two accumulations could be reordered. The model keeps a short history of
//! recently computed batches' integer 2×2 windows; a new batch that
//! overlaps any live entry stalls until the conflicting entry ages out.

use crate::core::cache::tags::{PixelWindow, corner_positions};
use std::collections::VecDeque;

/// One historical batch: its corner pixels and the tick its writes retire.
#[derive(Debug, Clone)]
struct HistoryEntry {
    corners: Vec<(i32, i32)>,
    retires_at: u64,
}

/// Bounded history of in-flight accumulation windows.
#[derive(Debug)]
pub struct TimeConflictModel {
    depth: usize,
    latency: u64,
    history: VecDeque<HistoryEntry>,
}

impl TimeConflictModel {
    /// Creates an empty history with the given pipeline depth.
    ///
    /// The depth doubles as the write latency in ticks: an entry recorded
    /// at tick `t` is live until `t + depth`.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            latency: depth as u64,
            history: VecDeque::with_capacity(depth),
        }
    }

    /// Drops entries whose writes have retired by `now`.
    pub fn expire(&mut self, now: u64) {
        while let Some(front) = self.history.front() {
            if front.retires_at <= now {
                let _ = self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Checks a batch's windows against the live history.
    ///
    /// Returns the tick at which the youngest conflicting entry retires,
    /// or `None` when the batch may compute now. Overlap ignores sub-pixel
    /// parity: any shared integer corner pixel conflicts.
    pub fn check(&mut self, windows: &[PixelWindow], now: u64) -> Option<u64> {
        self.expire(now);
        let mut resume: Option<u64> = None;
        for w in windows {
            for corner in corner_positions(w) {
                for entry in &self.history {
                    if entry.corners.contains(&corner) {
                        resume = Some(resume.map_or(entry.retires_at, |r: u64| {
                            r.max(entry.retires_at)
                        }));
                    }
                }
            }
        }
        resume
    }

    /// Records a computed batch's windows as in-flight.
    pub fn record(&mut self, windows: &[PixelWindow], now: u64) {
        if self.history.len() == self.depth {
            let _ = self.history.pop_front();
        }
        let corners = windows
            .iter()
            .flat_map(|w| corner_positions(w))
            .collect::<Vec<_>>();
        self.history.push_back(HistoryEntry {
            corners,
            retires_at: now + self.latency,
        });
    }
}
