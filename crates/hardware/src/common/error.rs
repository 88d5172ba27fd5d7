//! Fatal model errors.
//!
//! This module defines the unrecoverable error taxonomy of the resampler
//! model. Every variant indicates either a malformed task descriptor or a
//! divergence between this model and the hardware it mirrors; callers must
//! abort the run — no partial results are trustworthy after any of these.
//!
//! Numeric anomalies (NaN/Inf in coordinates or interpolation results) are
//! *not* errors: they are legalized in place and tallied in
//! [`crate::stats::ResampStats`].

use thiserror::Error;

/// Unrecoverable protocol violations detected by the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The task descriptor failed validation at task start.
    #[error("descriptor rejected: {0}")]
    InvalidDescriptor(String),

    /// A bounded queue was pushed while full.
    #[error("{queue} overflow (depth {depth})")]
    QueueOverflow {
        /// Name of the offending queue.
        queue: &'static str,
        /// Configured queue depth.
        depth: usize,
    },

    /// A queue was popped while empty.
    #[error("{queue} underflow")]
    QueueUnderflow {
        /// Name of the offending queue.
        queue: &'static str,
    },

    /// A computed byte address fell outside the image it belongs to.
    #[error("address {addr:#x} outside image [{base:#x}, {end:#x})")]
    AddressOutOfRange {
        /// The offending byte address.
        addr: u64,
        /// First byte of the valid image region.
        base: u64,
        /// One past the last byte of the valid image region.
        end: u64,
    },

    /// A derived bank/set/way index exceeded the configured geometry.
    #[error("{kind} index {index} out of range (limit {limit})")]
    IndexOutOfRange {
        /// Which index family overflowed ("bank row", "set", "way").
        kind: &'static str,
        /// The offending index.
        index: usize,
        /// Exclusive upper bound.
        limit: usize,
    },

    /// A response's echoed metadata did not match the consumer's expectation.
    #[error("metadata mismatch: expected {expected}, got {got}")]
    MetadataMismatch {
        /// What the consumer was waiting for.
        expected: String,
        /// What the producer delivered.
        got: String,
    },

    /// More than two distinct tags were required in one bank row in one tick.
    #[error("bank row {bank_row} needs a third tag in one cycle")]
    TagMergeOverflow {
        /// The contended bank row.
        bank_row: usize,
    },

    /// The compute engine stalled past its cycle budget.
    #[error("compute stalled for {ticks} ticks (limit {limit})")]
    ComputeStallTimeout {
        /// Consecutive stalled ticks observed.
        ticks: u32,
        /// Configured stall limit.
        limit: u32,
    },
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ModelError>;
