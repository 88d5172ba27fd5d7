//! Warp / grad coordinate stream readers.
//!
//! A reader walks a stripe/line/chunk cursor over an externally-addressed
//! coordinate image, issuing one bus-sized read per tick and decoding the
//! returned bytes into `f32` lanes. Warp images carry interleaved (x, y)
//! pairs; grad images carry one weight per output pixel.
//!
//! A completed line is optionally lane-shuffled before it is handed to the
//! parser: with stride `s`, lane `i` takes element `(i mod s) · (n/s) + i/s`
//! (a column-major read of an `n/s × s` matrix), so consecutive lanes come
//! from source elements `n/s` apart. The same permutation is applied to the
//! warp and grad streams so lanes stay paired, and the original lane index
//! travels with each coordinate for output addressing.

use crate::common::constants::{LINE_BYTES, WARP_STRIPE_WIDTH};
use crate::common::data::{Metadata, ReadRequest, ReadResponse};
use crate::common::error::{ModelError, Result};
use crate::config::ImageGeometry;
use crate::numeric::{self, Anomaly};
use std::collections::VecDeque;
use tracing::trace;

/// Completed-line backlog bound; the reader pauses issue when reached.
const LINE_BACKLOG: usize = 4;

/// One decoded coordinate line, ready for the parser.
#[derive(Debug, Clone)]
pub struct CoordLine {
    /// Stripe index of this line.
    pub stripe: u32,
    /// Image line index.
    pub line: u32,
    /// X lanes (or grad weights for a grad stream).
    pub x: Vec<f32>,
    /// Y lanes (empty for a grad stream).
    pub y: Vec<f32>,
    /// Original lane index of each element, tracking the shuffle.
    pub lanes: Vec<u32>,
}

/// Streams coordinate lines from a warp or grad image.
#[derive(Debug)]
pub struct CoordReader {
    image: ImageGeometry,
    /// Planes per element: 2 for warp (x, y), 1 for grad.
    comps: u32,
    task: u16,
    shuffle_stride: u8,
    num_stripes: u32,
    stripe: u32,
    line: u32,
    chunk: u32,
    done: bool,
    pending: Option<Metadata>,
    raw: Vec<u8>,
    ready: VecDeque<CoordLine>,
    /// Anomalies legalized while decoding, drained by the caller.
    pub anomalies: Vec<Anomaly>,
}

impl CoordReader {
    /// Creates a reader over `image` with `comps` planes per element.
    pub fn new(image: ImageGeometry, comps: u32, shuffle_stride: u8, task: u16) -> Self {
        let num_stripes = image.width.div_ceil(WARP_STRIPE_WIDTH as u32);
        Self {
            image,
            comps,
            task,
            shuffle_stride,
            num_stripes,
            stripe: 0,
            line: 0,
            chunk: 0,
            done: false,
            pending: None,
            raw: Vec::with_capacity(LINE_BYTES * 8),
            ready: VecDeque::new(),
            anomalies: Vec::new(),
        }
    }

    /// Whether every line of the image has been streamed out.
    pub fn done(&self) -> bool {
        self.done && self.ready.is_empty()
    }

    /// Width in elements of the given stripe.
    fn stripe_width(&self, stripe: u32) -> u32 {
        (self.image.width - stripe * WARP_STRIPE_WIDTH as u32).min(WARP_STRIPE_WIDTH as u32)
    }

    /// Bytes of one element (all planes).
    fn elem_bytes(&self) -> u32 {
        self.comps * self.image.format.bytes() as u32
    }

    /// Oldest completed line, if any.
    pub fn front(&self) -> Option<&CoordLine> {
        self.ready.front()
    }

    /// Consumes the oldest completed line.
    pub fn pop(&mut self) -> Option<CoordLine> {
        self.ready.pop_front()
    }

    /// Issues the next chunk request, at most one outstanding at a time.
    pub fn issue(&mut self) -> Option<ReadRequest> {
        if self.done || self.pending.is_some() || self.ready.len() >= LINE_BACKLOG {
            return None;
        }

        let width = self.stripe_width(self.stripe);
        let line_span = width * self.elem_bytes();
        let byte_off = u64::from(self.stripe) * WARP_STRIPE_WIDTH as u64 * u64::from(self.elem_bytes())
            + u64::from(self.chunk) * LINE_BYTES as u64;
        let addr = self.image.addr + u64::from(self.line) * u64::from(self.image.stride) + byte_off;

        let remaining = u64::from(line_span) - u64::from(self.chunk) * LINE_BYTES as u64;
        let mpad = (LINE_BYTES as u64).saturating_sub(remaining) as u16;

        let meta = Metadata {
            task: self.task,
            stripe: self.stripe as u16,
            line: self.line as i32,
            coord: self.chunk,
            ..Metadata::default()
        };
        self.pending = Some(meta);
        Some(ReadRequest {
            addr,
            lpad: 0,
            mpad,
            meta,
        })
    }

    /// Accepts the response for the outstanding request.
    pub fn accept(&mut self, resp: &ReadResponse) -> Result<()> {
        let expected = self.pending.take().ok_or(ModelError::QueueUnderflow {
            queue: "coord reader in-flight",
        })?;
        if resp.meta != expected {
            return Err(ModelError::MetadataMismatch {
                expected: format!("{expected:?}"),
                got: format!("{:?}", resp.meta),
            });
        }

        let width = self.stripe_width(self.stripe);
        let line_span = (width * self.elem_bytes()) as usize;
        let take = (line_span - self.raw.len()).min(LINE_BYTES);
        self.raw.extend_from_slice(&resp.data.bytes[..take]);

        if self.raw.len() == line_span {
            self.complete_line(width);
            self.advance_line();
        } else {
            self.chunk += 1;
        }
        Ok(())
    }

    /// Decodes, legalizes, and shuffles the completed line.
    fn complete_line(&mut self, width: u32) {
        let fmt = self.image.format;
        let eb = fmt.bytes();
        let n = width as usize;
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(if self.comps == 2 { n } else { 0 });

        for i in 0..n {
            let base = i * eb * self.comps as usize;
            let x = self.decode_at(base, eb, fmt);
            xs.push(x);
            if self.comps == 2 {
                ys.push(self.decode_at(base + eb, eb, fmt));
            }
        }

        let lanes = shuffle_order(n, self.shuffle_stride);
        let line = CoordLine {
            stripe: self.stripe,
            line: self.line,
            x: lanes.iter().map(|&l| xs[l as usize]).collect(),
            y: if self.comps == 2 {
                lanes.iter().map(|&l| ys[l as usize]).collect()
            } else {
                Vec::new()
            },
            lanes,
        };
        trace!(stripe = line.stripe, line = line.line, "coordinate line ready");
        self.ready.push_back(line);
        self.raw.clear();
    }

    /// Decodes one element and legalizes NaN/Inf.
    fn decode_at(&mut self, base: usize, eb: usize, fmt: crate::numeric::NumericFormat) -> f32 {
        let mut bits = 0u32;
        for (b, byte) in self.raw[base..base + eb].iter().enumerate() {
            bits |= u32::from(*byte) << (8 * b);
        }
        let (v, anomaly) = numeric::legalize_coordinate(numeric::bits_to_float(bits, fmt));
        if let Some(a) = anomaly {
            self.anomalies.push(a);
        }
        v
    }

    /// Advances the stripe/line cursor after a completed line.
    fn advance_line(&mut self) {
        self.chunk = 0;
        self.line += 1;
        if self.line == self.image.height {
            self.line = 0;
            self.stripe += 1;
            if self.stripe == self.num_stripes {
                self.done = true;
            }
        }
    }
}

/// Lane order produced by the shuffle for a line of `n` elements.
///
/// Stride 0/1 is the identity. Otherwise the largest prefix divisible by
/// `stride` is read column-major; a ragged tail keeps source order.
pub fn shuffle_order(n: usize, stride: u8) -> Vec<u32> {
    let s = usize::from(stride);
    if s <= 1 || n < s {
        return (0..n as u32).collect();
    }
    let body = (n / s) * s;
    let rows = body / s;
    let mut order = Vec::with_capacity(n);
    for i in 0..body {
        order.push(((i % s) * rows + i / s) as u32);
    }
    order.extend(body as u32..n as u32);
    order
}
