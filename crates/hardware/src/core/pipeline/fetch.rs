//! Miss queue and fill controller.
//!
//! Reservation misses enter a bounded FIFO in strict request order. Each
//! tick the fill controller turns the head miss into an external read
//! request; responses install line bytes into cache storage and flip the
//! compute-array valid bit for the slot. A sentinel tag (row equal to
//! [`FINAL_TAG_ROW`]) closes the fetch stream instead of installing a line.
//!
//! When the queue is full the upstream parser stalls and re-issues the same
//! batch next tick; no miss is ever dropped.

use crate::common::constants::FINAL_TAG_ROW;
use crate::common::data::{Metadata, ReadRequest, ReadResponse};
use crate::common::error::{ModelError, Result};
use crate::config::TaskDescriptor;
use crate::core::cache::tags::{self, LineRef};
use crate::core::cache::{CacheStorage, ComputeTagArray};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Identity and placement of one pending fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTag {
    /// The line being fetched.
    pub line: LineRef,
    /// Bank row serving the line.
    pub bank_row: u8,
    /// Cache set.
    pub set: u16,
    /// Way reserved for the line.
    pub way: u16,
    /// Packed line identity.
    pub line_ref: u32,
    /// Sequence number of the allocating batch.
    pub pch: u32,
}

impl CacheTag {
    /// The sentinel tag that closes the fetch stream.
    pub const fn final_tag(pch: u32) -> Self {
        Self {
            line: LineRef {
                row: FINAL_TAG_ROW,
                col_block: 0,
            },
            bank_row: 0,
            set: 0,
            way: 0,
            line_ref: 0,
            pch,
        }
    }

    /// Whether this is the stream-closing sentinel.
    pub const fn is_final(&self) -> bool {
        self.line.row == FINAL_TAG_ROW
    }
}

/// Bounded FIFO of pending fetches.
#[derive(Debug)]
pub struct MissQueue {
    entries: VecDeque<CacheTag>,
    depth: usize,
}

impl MissQueue {
    /// Creates an empty queue with the given depth.
    pub fn new(depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Free entry count.
    pub fn free_slots(&self) -> usize {
        self.depth - self.entries.len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueues a miss in request order.
    pub fn push(&mut self, tag: CacheTag) -> Result<()> {
        if self.entries.len() == self.depth {
            return Err(ModelError::QueueOverflow {
                queue: "miss queue",
                depth: self.depth,
            });
        }
        self.entries.push_back(tag);
        Ok(())
    }

    /// Dequeues the oldest miss.
    pub fn pop(&mut self) -> Option<CacheTag> {
        self.entries.pop_front()
    }

    /// Removes the `n` youngest entries (batch-admission rollback).
    pub fn truncate_back(&mut self, n: usize) {
        for _ in 0..n {
            let _ = self.entries.pop_back();
        }
    }
}

/// Issues fetch requests and installs returned lines.
#[derive(Debug)]
pub struct FillController {
    /// Metadata of requests issued and not yet answered, in FIFO order.
    in_flight: VecDeque<Metadata>,
    /// Responses waiting to install, oldest first. Only the front can be
    /// blocked (by an un-retired victim of its slot); younger responses
    /// queue behind it to preserve fill order.
    pending: VecDeque<ReadResponse>,
    stream_done: bool,
}

impl FillController {
    /// Creates an idle controller.
    pub fn new() -> Self {
        Self {
            in_flight: VecDeque::new(),
            pending: VecDeque::new(),
            stream_done: false,
        }
    }

    /// Whether the sentinel has come back and nothing is outstanding.
    pub fn stream_done(&self) -> bool {
        self.stream_done && self.in_flight.is_empty() && self.pending.is_empty()
    }

    /// Whether any fetch is outstanding.
    pub fn idle(&self) -> bool {
        self.in_flight.is_empty() && self.pending.is_empty()
    }

    /// Builds the external read request for a tag.
    pub fn request_for(tag: &CacheTag, desc: &TaskDescriptor) -> ReadRequest {
        let (addr, lpad, mpad) =
            tags::fill_span_of(tag.line, &desc.input, desc.cache.line_bytes);
        ReadRequest {
            addr,
            lpad,
            mpad,
            meta: Metadata {
                task: desc.task_id,
                bank_row: tag.bank_row,
                set: tag.set,
                way: tag.way,
                line_ref: tag.line_ref,
                row: tag.line.row,
                col_block: tag.line.col_block,
                ..Metadata::default()
            },
        }
    }

    /// Pops the head miss and emits its request, one per tick.
    pub fn issue(&mut self, queue: &mut MissQueue, desc: &TaskDescriptor) -> Option<ReadRequest> {
        let tag = queue.pop()?;
        let req = Self::request_for(&tag, desc);
        trace!(
            row = tag.line.row,
            col = tag.line.col_block,
            set = tag.set,
            way = tag.way,
            "fetch issue"
        );
        self.in_flight.push_back(req.meta);
        Some(req)
    }

    /// Accepts this tick's response (if any) and installs every pending
    /// line that is not blocked behind a victim.
    ///
    /// `victim_blocked` reports whether a (set, way) still has an
    /// un-retired victim entry; such a fill is deferred so the victim's
    /// line bytes survive until its write-back reads them. Returns the
    /// number of lines installed.
    pub fn step(
        &mut self,
        incoming: Option<ReadResponse>,
        storage: &mut CacheStorage,
        compute_tags: &mut ComputeTagArray,
        victim_blocked: impl Fn(u16, u16) -> bool,
    ) -> Result<u32> {
        if let Some(resp) = incoming {
            self.pending.push_back(resp);
        }

        let mut installed = 0;
        while let Some(resp) = self.pending.front() {
            let expected = self.in_flight.front().copied().ok_or({
                ModelError::QueueUnderflow {
                    queue: "fill in-flight",
                }
            })?;
            if resp.meta != expected {
                return Err(ModelError::MetadataMismatch {
                    expected: format!("{expected:?}"),
                    got: format!("{:?}", resp.meta),
                });
            }

            if resp.meta.row == FINAL_TAG_ROW {
                let _ = self.pending.pop_front();
                let _ = self.in_flight.pop_front();
                self.stream_done = true;
                debug!("fetch stream complete");
                continue;
            }

            if victim_blocked(resp.meta.set, resp.meta.way) {
                break;
            }

            let line_bytes = storage.line_bytes();
            storage
                .line_mut(resp.meta.set as usize, resp.meta.way as usize)
                .copy_from_slice(&resp.data.bytes[..line_bytes]);
            compute_tags.fill(
                resp.meta.set as usize,
                resp.meta.way as usize,
                resp.meta.line_ref,
            );
            trace!(
                set = resp.meta.set,
                way = resp.meta.way,
                row = resp.meta.row,
                "fill installed"
            );
            let _ = self.pending.pop_front();
            let _ = self.in_flight.pop_front();
            installed += 1;
        }
        Ok(installed)
    }
}

impl Default for FillController {
    fn default() -> Self {
        Self::new()
    }
}
