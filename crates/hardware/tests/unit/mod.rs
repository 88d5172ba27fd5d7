//! Unit and scenario tests for the resampler components.

/// Batch sizing under bank and space conflicts.
pub mod batcher;
/// Tag array, PLRU, and tag translation tests.
pub mod cache;
/// Time-conflict stall model behavior.
pub mod stall;
/// Output transaction packing.
pub mod writeback;
