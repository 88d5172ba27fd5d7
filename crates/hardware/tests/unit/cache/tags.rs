//! Bit-layout translation: line identity, bank/set mapping, fetch spans.

use warpsim_core::config::{CacheGeometry, ImageGeometry};
use warpsim_core::core::cache::tags::{
    LineRef, bank_row_of, fill_span_of, line_of, ref_of, set_of, window_of,
};
use warpsim_core::numeric::NumericFormat;

fn geom() -> CacheGeometry {
    CacheGeometry {
        sets: 64,
        ways: 16,
        bank_rows: 8,
        line_bytes: 128,
    }
}

fn image() -> ImageGeometry {
    ImageGeometry {
        addr: 0x1000,
        width: 200,
        height: 100,
        stride: 512,
        format: NumericFormat::Int16,
    }
}

#[test]
fn adjacent_rows_land_in_adjacent_bank_rows() {
    let g = geom();
    for row in 0..16 {
        let line = LineRef { row, col_block: 0 };
        assert_eq!(bank_row_of(line, g.bank_rows), (row % 8) as usize);
    }
}

#[test]
fn set_stays_inside_the_banks_range() {
    let g = geom();
    let spb = g.sets_per_bank();
    for row in 0..32 {
        for col in 0..32 {
            let line = LineRef {
                row,
                col_block: col,
            };
            let bank = bank_row_of(line, g.bank_rows);
            let set = set_of(line, &g);
            assert!(set >= bank * spb && set < (bank + 1) * spb);
        }
    }
}

#[test]
fn line_of_uses_pixels_per_line() {
    // 128-byte lines of int16 hold 64 pixels.
    let line = line_of(63, 5, 64);
    assert_eq!(line.col_block, 0);
    let line = line_of(64, 5, 64);
    assert_eq!(line.col_block, 1);
}

#[test]
fn refs_distinguish_rows_and_blocks() {
    let mut seen = std::collections::HashSet::new();
    for row in -2..10 {
        for col in 0..10 {
            assert!(seen.insert(ref_of(LineRef {
                row,
                col_block: col
            })));
        }
    }
}

#[test]
fn fill_span_plain_line() {
    let img = image();
    let (addr, lpad, mpad) = fill_span_of(LineRef { row: 3, col_block: 1 }, &img, 128);
    assert_eq!(addr, 0x1000 + 3 * 512 + 128);
    assert_eq!(lpad, 0);
    // Row holds 400 valid bytes; block 1 spans bytes 128..256, all valid.
    assert_eq!(mpad, 0);
}

#[test]
fn fill_span_truncates_last_block() {
    let img = image();
    // Block 3 spans 384..512 but only 400 bytes are valid.
    let (_, lpad, mpad) = fill_span_of(LineRef { row: 0, col_block: 3 }, &img, 128);
    assert_eq!(lpad, 0);
    assert_eq!(mpad, 112);
}

#[test]
fn fill_span_clamps_out_of_bounds_rows() {
    let img = image();
    let (addr, _, _) = fill_span_of(LineRef { row: -5, col_block: 0 }, &img, 128);
    assert_eq!(addr, img.addr);
    let (addr, _, _) = fill_span_of(
        LineRef {
            row: 1000,
            col_block: 0,
        },
        &img,
        128,
    );
    assert_eq!(addr, img.addr + 99 * 512);
}

#[test]
fn window_corners_cover_the_interpolation_square() {
    let w = window_of(7.5, 2.25);
    assert_eq!((w.x0, w.y0), (7, 2));
    // The four corner tags are the floor/ceil combinations.
    let corners = warpsim_core::core::cache::tags::corner_positions(&w);
    assert_eq!(corners, [(7, 2), (8, 2), (7, 3), (8, 3)]);
}
