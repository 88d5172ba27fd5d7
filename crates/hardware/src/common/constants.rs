//! Hardware constants for the resampling cache subsystem.
//!
//! Default cache geometry and pipeline depths mirror the modeled hardware.
//! Geometry values are the *defaults* of the corresponding descriptor fields
//! (see [`crate::config::CacheGeometry`]); the fixed limits below bound the
//! configurable range.

/// Cache line size in bytes — equal to one external memory transaction.
pub const LINE_BYTES: usize = 128;

/// Total number of cache sets across all bank rows.
pub const NSETS: usize = 64;

/// Cache associativity (ways per set).
pub const NWAYS: usize = 16;

/// Number of hardware-parallel memory bank rows.
pub const BANK_ROWS: usize = 8;

/// Sets per bank row (`NSETS / BANK_ROWS`).
pub const NSETS_PER_BANK: usize = NSETS / BANK_ROWS;

/// Maximum number of output pixels advanced together in one tick.
pub const MAX_BATCH: usize = 8;

/// Maximum pending entries in the miss queue.
pub const MISS_QUEUE_DEPTH: usize = 8;

/// Compute stall budget in ticks; exceeding it is a fatal model error.
pub const COMPUTE_STALL_LIMIT: u32 = 1200;

/// Depth of the time-conflict history (reduction-mode pipeline latency).
pub const TIME_CONFLICT_DEPTH: usize = 6;

/// Coordinates per warp-image stripe line.
pub const WARP_STRIPE_WIDTH: usize = 128;

/// Largest supported warp lane-shuffle stride.
pub const MAX_SHUFFLE_STRIDE: u8 = 8;

/// Maximum FIR tap count per axis in rescale mode.
pub const RESCALE_MAX_TAPS: usize = 16;

/// Maximum phase count of a rescale coefficient table.
pub const RESCALE_MAX_PHASES: usize = 128;

/// Row value of the sentinel tag that closes the fetch stream.
pub const FINAL_TAG_ROW: i32 = -2;

/// Largest supported image width in pixels.
pub const MAX_IMAGE_W: u32 = 7680;

/// Largest supported image height in lines.
pub const MAX_IMAGE_H: u32 = 4320;
