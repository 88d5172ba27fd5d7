//! Resampler core: cache and pipeline.

/// Set-associative resampling cache (tag arrays, PLRU, storage).
pub mod cache;
/// The tick-driven pipeline and per-task context.
pub mod pipeline;
