//! Output packing across multiple transactions and the final "last" tag.

use warpsim_core::config::TaskDescriptor;
use warpsim_core::core::pipeline::compute::OutputPixel;
use warpsim_core::core::pipeline::victim::VictimWrite;
use warpsim_core::core::pipeline::writeback::OutputWriter;

#[test]
fn full_line_produces_one_transaction_per_line() {
    let desc = TaskDescriptor::default();
    let mut w = OutputWriter::new(true);
    // Two full 64-pixel int16 lines: 128 bytes each.
    for line in 0..2u32 {
        for pixel in 0..desc.output.width {
            w.push_pixel(
                &OutputPixel {
                    line,
                    pixel,
                    bits: 7,
                },
                &desc,
            );
        }
    }
    let first = w.emit().unwrap();
    assert!(first.first && !first.last);
    assert_eq!(first.addr, desc.output.addr);
    assert_eq!(first.data.valid_count(), 128);

    let second = w.emit().unwrap();
    assert!(!second.first);
    assert_eq!(second.addr, desc.output.addr + u64::from(desc.output.stride));
    assert!(w.emit().is_none());
}

#[test]
fn last_waits_for_victim_drain() {
    let desc = TaskDescriptor::default();
    let mut w = OutputWriter::new(true);
    w.push_pixel(
        &OutputPixel {
            line: 0,
            pixel: desc.output.width - 1,
            bits: 1,
        },
        &desc,
    );
    let px_tx = w.emit().unwrap();
    assert!(!px_tx.last);

    // A victim arrives after the pixel stream ends.
    w.push_victim(&VictimWrite {
        addr: 0x80,
        bytes: vec![1; 32],
        enables: vec![true; 32],
    });
    w.finalize();
    let victim_tx = w.emit().unwrap();
    assert!(victim_tx.last);
}

#[test]
fn empty_finalize_emits_nothing() {
    let mut w = OutputWriter::new(true);
    w.finalize();
    assert!(w.emit().is_none());
    assert!(w.done());
}
