//! Victim queue and retirement (reduction mode only).
//!
//! Every reservation allocation that displaces a valid line pushes the
//! displaced tag together with the `pch` (sequence number) of the
//! allocating batch. The head may only retire once the compute sequence
//! counter has reached that `pch` — at that point the evicting batch and
//! every batch before it have executed, so no in-flight reader of the old
//! line remains. This is the correctness-critical ordering guarantee of
//! the accumulation mode.
//!
//! Retirement invalidates the slot's compute-array entry and, when the
//! line overlaps the valid image region, forwards its bytes with boundary
//! byte-enables to the output write-back engine.

use crate::config::TaskDescriptor;
use crate::core::cache::{CacheStorage, ComputeTagArray};
use crate::core::pipeline::fetch::CacheTag;
use std::collections::VecDeque;
use tracing::trace;

/// An evicted-but-possibly-still-referenced line.
#[derive(Debug, Clone, Copy)]
pub struct VictimEntry {
    /// The displaced line's tag (set/way/identity).
    pub tag: CacheTag,
    /// Sequence number of the allocating batch.
    pub pch: u32,
}

/// FIFO of victims awaiting retirement.
#[derive(Debug, Default)]
pub struct VictimQueue {
    entries: VecDeque<VictimEntry>,
}

impl VictimQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no victims are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueues a displaced line.
    pub fn push(&mut self, tag: CacheTag, pch: u32) {
        trace!(
            set = tag.set,
            way = tag.way,
            row = tag.line.row,
            pch,
            "victim queued"
        );
        self.entries.push_back(VictimEntry { tag, pch });
    }

    /// Whether any pending victim still owns the given slot.
    ///
    /// A fill for such a slot must wait; the victim's bytes are read from
    /// storage at retirement.
    pub fn blocks_slot(&self, set: u16, way: u16) -> bool {
        self.entries
            .iter()
            .any(|e| e.tag.set == set && e.tag.way == way)
    }

    /// The oldest pending victim.
    pub fn peek(&self) -> Option<&VictimEntry> {
        self.entries.front()
    }

    /// Removes and returns the oldest pending victim.
    fn pop(&mut self) -> Option<VictimEntry> {
        self.entries.pop_front()
    }
}

/// A retired victim's write-back payload: a sub-line region of the image.
#[derive(Debug, Clone)]
pub struct VictimWrite {
    /// Byte address of the line's start within the image.
    pub addr: u64,
    /// Line bytes (full cache line).
    pub bytes: Vec<u8>,
    /// Per-byte enables masking bytes outside the valid image region.
    pub enables: Vec<bool>,
}

/// Retires at most one victim whose `pch` has been reached.
///
/// Returns the write-back payload when the retired line overlaps the
/// valid image region (reduction results flush back to the source-shaped
/// accumulator image).
pub fn victim_ctrl(
    queue: &mut VictimQueue,
    compute_seq: u32,
    compute_tags: &mut ComputeTagArray,
    storage: &CacheStorage,
    desc: &TaskDescriptor,
) -> Option<VictimWrite> {
    let head = queue.peek()?;
    if compute_seq < head.pch {
        return None;
    }
    let entry = queue.pop()?;
    let tag = entry.tag;
    compute_tags.invalidate(tag.set as usize, tag.way as usize);
    trace!(
        set = tag.set,
        way = tag.way,
        row = tag.line.row,
        pch = entry.pch,
        compute_seq,
        "victim retired"
    );

    let image = &desc.input;
    let line_bytes = desc.cache.line_bytes;
    if tag.line.row < 0 || tag.line.row >= image.height as i32 || tag.line.col_block < 0 {
        return None;
    }
    let span_start = tag.line.col_block as i64 * line_bytes as i64;
    let row_bytes = i64::from(image.row_bytes());
    if span_start >= row_bytes {
        return None;
    }

    let valid = ((row_bytes - span_start) as usize).min(line_bytes);
    let mut enables = vec![false; line_bytes];
    for e in &mut enables[..valid] {
        *e = true;
    }
    Some(VictimWrite {
        addr: image.addr
            + u64::from(tag.line.row as u32) * u64::from(image.stride)
            + span_start as u64,
        bytes: storage
            .line(tag.set as usize, tag.way as usize)
            .to_vec(),
        enables,
    })
}
