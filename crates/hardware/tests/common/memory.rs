//! Mock external memory implementing the read/write port contract.

use warpsim_core::common::constants::LINE_BYTES;
use warpsim_core::common::data::{ReadRequest, ReadResponse, WriteTransaction};
use warpsim_core::config::ImageGeometry;
use warpsim_core::numeric::{self, NumericFormat, QuantizeOptions};

/// Flat byte memory serving all four image regions.
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Allocates `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Serves a read request, echoing its metadata.
    ///
    /// Bytes outside the backing store read as zero; the model never
    /// depends on them (pad regions are masked or replicated upstream).
    pub fn read(&self, req: &ReadRequest) -> ReadResponse {
        let mut resp = ReadResponse {
            data: warpsim_core::common::data::Bus128::empty(),
            meta: req.meta,
        };
        for i in 0..LINE_BYTES {
            let addr = req.addr as usize + i;
            resp.data.bytes[i] = self.bytes.get(addr).copied().unwrap_or(0);
            resp.data.valid[i] = true;
        }
        resp
    }

    /// Applies a write transaction under its byte enables.
    pub fn write(&mut self, tx: &WriteTransaction) {
        for i in 0..LINE_BYTES {
            if tx.data.valid[i] {
                let addr = tx.addr as usize + i;
                if addr < self.bytes.len() {
                    self.bytes[addr] = tx.data.bytes[i];
                }
            }
        }
    }

    /// Raw little-endian element store.
    pub fn store_bits(&mut self, addr: u64, bits: u32, bytes: usize) {
        for i in 0..bytes {
            self.bytes[addr as usize + i] = (bits >> (8 * i)) as u8;
        }
    }

    /// Raw little-endian element load.
    pub fn load_bits(&self, addr: u64, bytes: usize) -> u32 {
        let mut bits = 0u32;
        for i in 0..bytes {
            bits |= u32::from(self.bytes[addr as usize + i]) << (8 * i);
        }
        bits
    }

    /// Writes pixel (x, y) of an image from a float value.
    pub fn store_pixel(&mut self, img: &ImageGeometry, x: u32, y: u32, value: f32) {
        let eb = img.format.bytes();
        let addr = img.addr + u64::from(y) * u64::from(img.stride) + u64::from(x) * eb as u64;
        let bits = numeric::float_to_bits(value, img.format, &QuantizeOptions::default());
        self.store_bits(addr, bits, eb);
    }

    /// Reads pixel (x, y) of an image as a float.
    pub fn load_pixel(&self, img: &ImageGeometry, x: u32, y: u32) -> f32 {
        let eb = img.format.bytes();
        let addr = img.addr + u64::from(y) * u64::from(img.stride) + u64::from(x) * eb as u64;
        numeric::bits_to_float(self.load_bits(addr, eb), img.format)
    }

    /// Writes one warp coordinate pair for output pixel (ox, oy).
    ///
    /// Warp elements are interleaved (x, y) pairs of the warp format.
    pub fn store_warp(&mut self, warp: &ImageGeometry, ox: u32, oy: u32, cx: f32, cy: f32) {
        assert_eq!(warp.format, NumericFormat::Fp32, "tests drive fp32 warps");
        let addr = warp.addr + u64::from(oy) * u64::from(warp.stride) + u64::from(ox) * 8;
        self.store_bits(addr, cx.to_bits(), 4);
        self.store_bits(addr + 4, cy.to_bits(), 4);
    }

    /// Writes one grad weight for output pixel (ox, oy).
    pub fn store_grad(&mut self, grad: &ImageGeometry, ox: u32, oy: u32, w: f32) {
        assert_eq!(grad.format, NumericFormat::Fp32, "tests drive fp32 grads");
        let addr = grad.addr + u64::from(oy) * u64::from(grad.stride) + u64::from(ox) * 4;
        self.store_bits(addr, w.to_bits(), 4);
    }
}
