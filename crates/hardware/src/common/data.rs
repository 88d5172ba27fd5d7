//! Bus transaction and memory-port types.
//!
//! This module defines the data carried over the four external memory
//! interfaces of the resampler (input fill, warp read, grad read, output
//! write). It provides:
//! 1. **Transaction payloads:** a fixed 128-byte bus word with per-byte
//!    valid flags, matching the external transaction size.
//! 2. **Request/response envelopes:** read requests with pad counts and
//!    echoed metadata; write transactions with byte enables.
//! 3. **Metadata:** the tag/stream bookkeeping echoed by the memory port so
//!    consumers can match responses to requests.

use super::constants::LINE_BYTES;
use std::fmt;

/// One 128-byte bus transaction payload with per-byte valid flags.
///
/// The valid flags double as byte enables on the write path; on the read
/// path they mark bytes inside the requested pad regions.
#[derive(Clone, Copy)]
pub struct Bus128 {
    /// Raw transaction bytes.
    pub bytes: [u8; LINE_BYTES],
    /// Per-byte valid / enable flags.
    pub valid: [bool; LINE_BYTES],
}

impl Bus128 {
    /// An all-zero, all-invalid transaction.
    pub const fn empty() -> Self {
        Self {
            bytes: [0; LINE_BYTES],
            valid: [false; LINE_BYTES],
        }
    }

    /// Builds a fully-valid transaction from a byte slice (padded with zeros).
    pub fn from_slice(data: &[u8]) -> Self {
        let mut bus = Self::empty();
        let n = data.len().min(LINE_BYTES);
        bus.bytes[..n].copy_from_slice(&data[..n]);
        for v in &mut bus.valid[..n] {
            *v = true;
        }
        bus
    }

    /// Number of valid bytes.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

impl Default for Bus128 {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Bus128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 128 raw bytes are noise in test output; summarize.
        write!(f, "Bus128 {{ valid: {}/{} }}", self.valid_count(), LINE_BYTES)
    }
}

/// Metadata attached to memory requests and echoed with responses.
///
/// Stream fields (`stripe`, `line`, `coord`) are used by the warp/grad
/// readers; tag fields (`set`, `way`, `line_ref`, `row`, `col_block`) by the
/// fill controller. Each consumer checks the fields it owns and raises
/// [`crate::common::error::ModelError::MetadataMismatch`] on divergence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Task identifier.
    pub task: u16,
    /// Stripe index of a coordinate stream request.
    pub stripe: u16,
    /// Image line of the request (or sentinel tag row).
    pub line: i32,
    /// Coordinate/chunk index within the line.
    pub coord: u32,
    /// Cache bank row of a fill request.
    pub bank_row: u8,
    /// Cache set of a fill request.
    pub set: u16,
    /// Cache way chosen by the reservation lookup.
    pub way: u16,
    /// Full line identity (`ref`) of a fill request.
    pub line_ref: u32,
    /// Source row of the fetched line.
    pub row: i32,
    /// Column block (line index within the row) of the fetched line.
    pub col_block: i32,
}

/// A read request on one of the external memory read ports.
///
/// `lpad`/`mpad` count bytes at the start/end of the transaction that fall
/// outside the valid image region; the memory port substitutes replicated
/// boundary bytes for them. The response arrives at least one tick later.
#[derive(Clone, Copy, Debug)]
pub struct ReadRequest {
    /// Byte address of the first requested byte.
    pub addr: u64,
    /// Leading pad byte count.
    pub lpad: u16,
    /// Trailing pad byte count.
    pub mpad: u16,
    /// Metadata echoed back with the response.
    pub meta: Metadata,
}

/// A response delivered on an external memory read port.
#[derive(Clone, Copy, Debug)]
pub struct ReadResponse {
    /// The transaction payload.
    pub data: Bus128,
    /// The request metadata, echoed verbatim.
    pub meta: Metadata,
}

/// A write transaction on the external memory write port.
///
/// Byte enables live in `data.valid`. `first`/`last` tag the task's boundary
/// transactions for the external port's bookkeeping.
#[derive(Clone, Copy, Debug)]
pub struct WriteTransaction {
    /// Byte address of the first written byte.
    pub addr: u64,
    /// Payload and per-byte enables.
    pub data: Bus128,
    /// First transaction of the task.
    pub first: bool,
    /// Last transaction of the task.
    pub last: bool,
}
