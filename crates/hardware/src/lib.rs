//! Cycle-level functional model of a warp-driven image resampling engine.
//!
//! This crate models the resampling cache subsystem of a hardware image
//! engine that gathers pixels at arbitrary, per-pixel source coordinates
//! supplied by a warp field:
//! 1. **Cache:** set-associative tag store with tree PLRU, a parallel
//!    compute tag array, and line storage.
//! 2. **Pipeline:** warp coordinate readers, conflict-aware batcher, tag
//!    translation, miss/fill and victim/write-back controllers, bilinear
//!    and separable-FIR compute, and the output write-back engine.
//! 3. **Numerics:** int8/int16/fp16/bf16/fp32 conversion, NaN/Inf
//!    legalization, and output quantization.
//! 4. **Configuration:** the task descriptor consumed by the core, with
//!    startup validation.
//! 5. **Statistics:** per-task cache, stall, and anomaly counters.
//!
//! The model is single-threaded and tick-driven: an external driver calls
//! [`Resampler::tick`] once per tick with memory-port responses and puts
//! the returned requests on the wire.

/// Common types and constants (buses, errors, hardware limits).
pub mod common;
/// Task descriptor (geometry, modes, cache shape, filter tables).
pub mod config;
/// Resampler core (cache and pipeline).
pub mod core;
/// Numeric format conversion and legalization.
pub mod numeric;
/// Per-task statistics collection.
pub mod stats;

/// Task descriptor; deserialize from JSON or start from `default()`.
pub use crate::config::TaskDescriptor;
/// Per-task pipeline context; drive with [`Resampler::tick`].
pub use crate::core::pipeline::{Resampler, TickInputs, TickOutputs};
/// Fatal model error taxonomy.
pub use crate::common::error::ModelError;
