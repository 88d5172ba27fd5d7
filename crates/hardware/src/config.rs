//! Task descriptor for the resampler model.
//!
//! This module defines the configuration consumed (never produced) by the
//! resampler core. It provides:
//! 1. **Defaults:** baseline hardware geometry (cache shape, queue depths,
//!    batch width) matching the modeled engine.
//! 2. **Structures:** image geometries, cache geometry, FIR filter tables,
//!    and the task descriptor that ties them together.
//! 3. **Enums:** transform mode, interpolation mode, background-fill mode,
//!    and PLRU update policy.
//!
//! Descriptors are supplied via JSON (`serde`) or built in code with
//! `TaskDescriptor::default()` and field updates. Geometry is validated once
//! at task start by [`TaskDescriptor::validate`]; a malformed descriptor is a
//! configuration error, surfaced before the first tick.

use crate::common::constants;
use crate::common::error::{ModelError, Result};
use crate::numeric::{NumericFormat, QuantizeOptions};
use serde::Deserialize;

/// Default configuration constants for the resampler.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden in the task descriptor.
mod defaults {
    use crate::common::constants;

    /// Default total set count.
    pub const SETS: usize = constants::NSETS;

    /// Default associativity.
    pub const WAYS: usize = constants::NWAYS;

    /// Default bank row count.
    pub const BANK_ROWS: usize = constants::BANK_ROWS;

    /// Default cache line size in bytes.
    pub const LINE_BYTES: usize = constants::LINE_BYTES;

    /// Default maximum batch width.
    pub const MAX_BATCH: usize = constants::MAX_BATCH;

    /// Default miss queue depth.
    pub const MISS_QUEUE_DEPTH: usize = constants::MISS_QUEUE_DEPTH;

    /// Default compute stall budget in ticks.
    pub const COMPUTE_STALL_LIMIT: u32 = constants::COMPUTE_STALL_LIMIT;

    /// Default time-conflict history depth.
    pub const TIME_CONFLICT_DEPTH: usize = constants::TIME_CONFLICT_DEPTH;

    /// Default image edge used by `ImageGeometry::default`.
    pub const IMAGE_EDGE: u32 = 64;
}

/// Transform mode selector.
///
/// Selects which datapath the task drives. The rotation/affine/projection
/// modes of the surrounding engine use a separate bank-addressed pipeline
/// and are outside this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TransformMode {
    /// Forward warp: gather input pixels at warp coordinates.
    #[default]
    Forward,
    /// Backward-warp pass 1: gather only, no accumulation.
    BackwardPass1,
    /// Backward-warp pass 2: accumulate gradient contributions back into
    /// source-indexed locations (reduction; enables the victim write-back
    /// and time-conflict stall machinery).
    BackwardPass2,
    /// Separable multi-tap FIR rescale.
    Rescale,
}

impl TransformMode {
    /// Whether this mode accumulates into the source image.
    pub const fn is_reduction(self) -> bool {
        matches!(self, Self::BackwardPass2)
    }
}

/// Interpolation mode for the 2×2 window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Interpolation {
    /// Bilinear interpolation with fractional weights.
    #[default]
    Bilinear,
    /// Nearest neighbor: weights forced to 0/1.
    NearestNeighbor,
}

/// Background-fill policy for out-of-bounds source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackgroundMode {
    /// Substitute a program-supplied constant.
    #[default]
    ProgramConstant,
    /// Clip coordinates to the image edge before windowing.
    BoundaryClip,
    /// Extend the image by boundary replication.
    BoundaryPad,
}

/// PLRU replacement update policy, selectable per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PlruPolicy {
    /// Binary decision tree of `ways - 1` bits; hit-vs-miss aware path
    /// update.
    #[default]
    Tree,
    /// Saturating per-way usage bits: monotonic mark-as-used with a reset
    /// when all ways saturate. Simpler, mark-as-miss style.
    Saturating,
}

/// Geometry of one externally-addressed image.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ImageGeometry {
    /// Byte address of the first pixel.
    #[serde(default)]
    pub addr: u64,

    /// Width in pixels.
    pub width: u32,

    /// Height in lines.
    pub height: u32,

    /// Line stride in bytes.
    pub stride: u32,

    /// Element format.
    #[serde(default)]
    pub format: NumericFormat,
}

impl ImageGeometry {
    /// Bytes of valid pixel data per line.
    pub const fn row_bytes(&self) -> u32 {
        self.width * self.format.bytes() as u32
    }

    /// One past the last addressable byte of the image.
    pub const fn end_addr(&self) -> u64 {
        self.addr + self.stride as u64 * self.height as u64
    }

    /// Whether an integer pixel coordinate lies inside the image.
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }
}

impl Default for ImageGeometry {
    fn default() -> Self {
        let format = NumericFormat::default();
        Self {
            addr: 0,
            width: defaults::IMAGE_EDGE,
            height: defaults::IMAGE_EDGE,
            stride: defaults::IMAGE_EDGE * format.bytes() as u32,
            format,
        }
    }
}

/// Set-associative cache geometry.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheGeometry {
    /// Total set count across all bank rows.
    #[serde(default = "CacheGeometry::default_sets")]
    pub sets: usize,

    /// Ways per set (power of two).
    #[serde(default = "CacheGeometry::default_ways")]
    pub ways: usize,

    /// Bank row count.
    #[serde(default = "CacheGeometry::default_bank_rows")]
    pub bank_rows: usize,

    /// Line size in bytes — must equal the external transaction size or
    /// divide it.
    #[serde(default = "CacheGeometry::default_line_bytes")]
    pub line_bytes: usize,
}

impl CacheGeometry {
    /// Returns the default total set count.
    fn default_sets() -> usize {
        defaults::SETS
    }

    /// Returns the default associativity.
    fn default_ways() -> usize {
        defaults::WAYS
    }

    /// Returns the default bank row count.
    fn default_bank_rows() -> usize {
        defaults::BANK_ROWS
    }

    /// Returns the default line size in bytes.
    fn default_line_bytes() -> usize {
        defaults::LINE_BYTES
    }

    /// Sets per bank row.
    pub const fn sets_per_bank(&self) -> usize {
        self.sets / self.bank_rows
    }
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            sets: defaults::SETS,
            ways: defaults::WAYS,
            bank_rows: defaults::BANK_ROWS,
            line_bytes: defaults::LINE_BYTES,
        }
    }
}

/// Phase-indexed FIR coefficient table for one rescale axis.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterTable {
    /// Inverse scale factor (source step per output pixel).
    pub scale_inv: f32,

    /// Number of sub-pixel phases.
    pub num_phases: u16,

    /// Taps per phase.
    pub num_taps: u8,

    /// Row-major `num_phases × num_taps` coefficients.
    pub coeffs: Vec<f32>,
}

impl FilterTable {
    /// Coefficient for the given phase and tap.
    pub fn coeff(&self, phase: usize, tap: usize) -> f32 {
        self.coeffs[phase * self.num_taps as usize + tap]
    }
}

/// Complete task descriptor for one resampling task.
///
/// # Examples
///
/// Deserializing from JSON:
///
/// ```
/// use warpsim_core::config::{TaskDescriptor, TransformMode};
///
/// let json = r#"{
///     "mode": "Forward",
///     "interpolation": "Bilinear",
///     "background": "ProgramConstant",
///     "bg_value": 0.0,
///     "input":  { "width": 64, "height": 64, "stride": 128, "format": "Int16" },
///     "output": { "addr": 65536, "width": 64, "height": 64, "stride": 128, "format": "Int16" },
///     "warp":   { "addr": 131072, "width": 64, "height": 64, "stride": 512, "format": "Fp32" }
/// }"#;
///
/// let desc: TaskDescriptor = serde_json::from_str(json).unwrap();
/// assert_eq!(desc.mode, TransformMode::Forward);
/// assert_eq!(desc.cache.ways, 16);
/// desc.validate().unwrap();
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDescriptor {
    /// Task identifier echoed in all transaction metadata.
    #[serde(default)]
    pub task_id: u16,

    /// Transform mode.
    #[serde(default)]
    pub mode: TransformMode,

    /// Interpolation mode.
    #[serde(default)]
    pub interpolation: Interpolation,

    /// Background-fill policy.
    #[serde(default)]
    pub background: BackgroundMode,

    /// Program background constant (used by `ProgramConstant` mode).
    #[serde(default)]
    pub bg_value: f32,

    /// Input (source) image.
    pub input: ImageGeometry,

    /// Output image.
    pub output: ImageGeometry,

    /// Warp image: one (x, y) coordinate pair per output pixel.
    pub warp: ImageGeometry,

    /// Grad image: one weight per output pixel (reduction mode only).
    #[serde(default)]
    pub grad: Option<ImageGeometry>,

    /// Warp lane-shuffle stride; 0 disables the shuffle.
    #[serde(default)]
    pub warp_shuffle_stride: u8,

    /// Clip overflowing float results to the largest finite value.
    #[serde(default)]
    pub clip_fp: bool,

    /// Clip infinite float inputs like overflow.
    #[serde(default)]
    pub clip_fp_inf_input: bool,

    /// Flush subnormal results to zero.
    #[serde(default)]
    pub ftz_en: bool,

    /// PLRU update policy.
    #[serde(default)]
    pub plru_policy: PlruPolicy,

    /// Emit an output transaction at every output line boundary instead of
    /// packing across lines.
    #[serde(default = "TaskDescriptor::default_true")]
    pub line_write_format: bool,

    /// Enable the space-conflict check in reduction mode.
    #[serde(default = "TaskDescriptor::default_true")]
    pub space_conflict: bool,

    /// Enable the time-conflict stall model in reduction mode.
    #[serde(default = "TaskDescriptor::default_true")]
    pub time_conflict: bool,

    /// Cache geometry.
    #[serde(default)]
    pub cache: CacheGeometry,

    /// Maximum batch width (1..=8).
    #[serde(default = "TaskDescriptor::default_max_batch")]
    pub max_batch: usize,

    /// Miss queue depth.
    #[serde(default = "TaskDescriptor::default_miss_queue_depth")]
    pub miss_queue_depth: usize,

    /// Compute stall budget in ticks.
    #[serde(default = "TaskDescriptor::default_compute_stall_limit")]
    pub compute_stall_limit: u32,

    /// Time-conflict history depth.
    #[serde(default = "TaskDescriptor::default_time_conflict_depth")]
    pub time_conflict_depth: usize,

    /// Horizontal rescale filter table (rescale mode only).
    #[serde(default)]
    pub rescale_x: Option<FilterTable>,

    /// Vertical rescale filter table (rescale mode only).
    #[serde(default)]
    pub rescale_y: Option<FilterTable>,
}

impl TaskDescriptor {
    /// Returns `true`; serde default for opt-out flags.
    fn default_true() -> bool {
        true
    }

    /// Returns the default maximum batch width.
    fn default_max_batch() -> usize {
        defaults::MAX_BATCH
    }

    /// Returns the default miss queue depth.
    fn default_miss_queue_depth() -> usize {
        defaults::MISS_QUEUE_DEPTH
    }

    /// Returns the default compute stall budget.
    fn default_compute_stall_limit() -> u32 {
        defaults::COMPUTE_STALL_LIMIT
    }

    /// Returns the default time-conflict history depth.
    fn default_time_conflict_depth() -> usize {
        defaults::TIME_CONFLICT_DEPTH
    }

    /// Quantization options derived from the descriptor flags.
    pub const fn quantize_options(&self) -> QuantizeOptions {
        QuantizeOptions {
            clip_fp: self.clip_fp,
            clip_fp_inf_input: self.clip_fp_inf_input,
            ftz: self.ftz_en,
        }
    }

    /// Input pixels covered by one cache line.
    pub const fn pixels_per_line(&self) -> u32 {
        (self.cache.line_bytes / self.input.format.bytes()) as u32
    }

    /// Validates the descriptor geometry.
    ///
    /// Malformed geometry is a configuration error surfaced once at task
    /// start; nothing here is recoverable mid-task.
    pub fn validate(&self) -> Result<()> {
        for (name, img) in [
            ("input", &self.input),
            ("output", &self.output),
            ("warp", &self.warp),
        ] {
            Self::validate_image(name, img)?;
        }

        let c = &self.cache;
        if c.ways < 2 || !c.ways.is_power_of_two() || c.ways > constants::NWAYS {
            return Err(ModelError::InvalidDescriptor(format!(
                "ways must be a power of two in 2..={}, got {}",
                constants::NWAYS,
                c.ways
            )));
        }
        if c.bank_rows == 0 || c.bank_rows > constants::BANK_ROWS {
            return Err(ModelError::InvalidDescriptor(format!(
                "bank_rows must be in 1..={}, got {}",
                constants::BANK_ROWS,
                c.bank_rows
            )));
        }
        if c.sets == 0 || c.sets % c.bank_rows != 0 {
            return Err(ModelError::InvalidDescriptor(format!(
                "sets ({}) must be a nonzero multiple of bank_rows ({})",
                c.sets, c.bank_rows
            )));
        }
        if !c.line_bytes.is_power_of_two()
            || c.line_bytes > constants::LINE_BYTES
            || c.line_bytes < self.input.format.bytes()
        {
            return Err(ModelError::InvalidDescriptor(format!(
                "line_bytes must be a power of two in {}..={}, got {}",
                self.input.format.bytes(),
                constants::LINE_BYTES,
                c.line_bytes
            )));
        }

        if self.max_batch == 0 || self.max_batch > constants::MAX_BATCH {
            return Err(ModelError::InvalidDescriptor(format!(
                "max_batch must be in 1..={}, got {}",
                constants::MAX_BATCH,
                self.max_batch
            )));
        }
        if self.miss_queue_depth == 0 {
            return Err(ModelError::InvalidDescriptor(
                "miss_queue_depth must be nonzero".into(),
            ));
        }

        match self.warp_shuffle_stride {
            0 | 1 | 2 | 4 | 8 => {}
            s => {
                return Err(ModelError::InvalidDescriptor(format!(
                    "warp_shuffle_stride must be 0 or a power of two <= {}, got {s}",
                    constants::MAX_SHUFFLE_STRIDE
                )));
            }
        }

        if self.mode != TransformMode::Rescale {
            if self.warp.width != self.output.width || self.warp.height != self.output.height {
                return Err(ModelError::InvalidDescriptor(
                    "warp image must have one coordinate pair per output pixel".into(),
                ));
            }
            // Warp elements are (x, y) pairs: stride must cover both planes.
            let warp_row = self.warp.row_bytes() * 2;
            if self.warp.stride < warp_row {
                return Err(ModelError::InvalidDescriptor(format!(
                    "warp stride {} shorter than coordinate-pair row {warp_row}",
                    self.warp.stride
                )));
            }
        }

        if self.mode.is_reduction() {
            let grad = self.grad.as_ref().ok_or_else(|| {
                ModelError::InvalidDescriptor("reduction mode requires a grad image".into())
            })?;
            Self::validate_image("grad", grad)?;
            if grad.width != self.output.width || grad.height != self.output.height {
                return Err(ModelError::InvalidDescriptor(
                    "grad image must have one weight per output pixel".into(),
                ));
            }
        }

        if self.mode == TransformMode::Rescale {
            for (axis, table) in [("x", self.rescale_x.as_ref()), ("y", self.rescale_y.as_ref())] {
                let t = table.ok_or_else(|| {
                    ModelError::InvalidDescriptor(format!("rescale mode requires a {axis} filter"))
                })?;
                Self::validate_filter(axis, t)?;
            }
        }

        Ok(())
    }

    /// Per-image geometry checks.
    fn validate_image(name: &str, img: &ImageGeometry) -> Result<()> {
        if img.width == 0
            || img.height == 0
            || img.width > constants::MAX_IMAGE_W
            || img.height > constants::MAX_IMAGE_H
        {
            return Err(ModelError::InvalidDescriptor(format!(
                "{name} image {}x{} outside supported range",
                img.width, img.height
            )));
        }
        if img.stride < img.row_bytes() {
            return Err(ModelError::InvalidDescriptor(format!(
                "{name} stride {} shorter than row byte width {}",
                img.stride,
                img.row_bytes()
            )));
        }
        Ok(())
    }

    /// Per-axis filter table checks.
    fn validate_filter(axis: &str, t: &FilterTable) -> Result<()> {
        if t.num_taps == 0 || t.num_taps as usize > constants::RESCALE_MAX_TAPS {
            return Err(ModelError::InvalidDescriptor(format!(
                "{axis} filter taps must be in 1..={}, got {}",
                constants::RESCALE_MAX_TAPS,
                t.num_taps
            )));
        }
        if t.num_phases == 0 || t.num_phases as usize > constants::RESCALE_MAX_PHASES {
            return Err(ModelError::InvalidDescriptor(format!(
                "{axis} filter phases must be in 1..={}, got {}",
                constants::RESCALE_MAX_PHASES,
                t.num_phases
            )));
        }
        let expect = t.num_phases as usize * t.num_taps as usize;
        if t.coeffs.len() != expect {
            return Err(ModelError::InvalidDescriptor(format!(
                "{axis} filter has {} coefficients, expected {expect}",
                t.coeffs.len()
            )));
        }
        if t.scale_inv <= 0.0 || !t.scale_inv.is_finite() {
            return Err(ModelError::InvalidDescriptor(format!(
                "{axis} filter scale_inv must be positive and finite"
            )));
        }
        Ok(())
    }
}

impl Default for TaskDescriptor {
    /// A minimal valid forward-mode descriptor over 64×64 int16 images.
    fn default() -> Self {
        let input = ImageGeometry::default();
        let mut output = ImageGeometry::default();
        output.addr = input.end_addr();
        let mut warp = ImageGeometry {
            format: NumericFormat::Fp32,
            ..ImageGeometry::default()
        };
        warp.stride = warp.width * 2 * warp.format.bytes() as u32;
        warp.addr = output.end_addr();

        Self {
            task_id: 0,
            mode: TransformMode::default(),
            interpolation: Interpolation::default(),
            background: BackgroundMode::default(),
            bg_value: 0.0,
            input,
            output,
            warp,
            grad: None,
            warp_shuffle_stride: 0,
            clip_fp: false,
            clip_fp_inf_input: false,
            ftz_en: false,
            plru_policy: PlruPolicy::default(),
            line_write_format: true,
            space_conflict: true,
            time_conflict: true,
            cache: CacheGeometry::default(),
            max_batch: defaults::MAX_BATCH,
            miss_queue_depth: defaults::MISS_QUEUE_DEPTH,
            compute_stall_limit: defaults::COMPUTE_STALL_LIMIT,
            time_conflict_depth: defaults::TIME_CONFLICT_DEPTH,
            rescale_x: None,
            rescale_y: None,
        }
    }
}
