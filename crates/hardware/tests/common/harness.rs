//! Tick-loop harness: drives a `Resampler` against the mock memory with
//! one-tick response latency on every read port.

use super::memory::Memory;
use warpsim_core::common::data::ReadResponse;
use warpsim_core::common::error::Result;
use warpsim_core::config::{ImageGeometry, TaskDescriptor};
use warpsim_core::numeric::NumericFormat;
use warpsim_core::{Resampler, TickInputs};
use std::collections::VecDeque;

/// Default tick budget for scenario runs.
const MAX_TICKS: u64 = 50_000;

/// A descriptor over small images laid out back-to-back in mock memory.
///
/// Input at 0, output after it, then warp, then grad.
pub fn small_task(edge: u32, format: NumericFormat) -> TaskDescriptor {
    let eb = format.bytes() as u32;
    let input = ImageGeometry {
        addr: 0,
        width: edge,
        height: edge,
        stride: edge * eb,
        format,
    };
    let output = ImageGeometry {
        addr: input.end_addr(),
        ..input
    };
    let warp = ImageGeometry {
        addr: output.end_addr(),
        width: edge,
        height: edge,
        stride: edge * 8,
        format: NumericFormat::Fp32,
    };
    TaskDescriptor {
        input,
        output,
        warp,
        ..TaskDescriptor::default()
    }
}

/// Adds a grad image after the warp image.
pub fn with_grad(mut desc: TaskDescriptor) -> TaskDescriptor {
    let warp_end = desc.warp.addr + u64::from(desc.warp.stride) * u64::from(desc.warp.height);
    desc.grad = Some(ImageGeometry {
        addr: warp_end,
        width: desc.output.width,
        height: desc.output.height,
        stride: desc.output.width * 4,
        format: NumericFormat::Fp32,
    });
    desc
}

/// Memory sized to cover every region of a [`small_task`] descriptor.
pub fn memory_for(desc: &TaskDescriptor) -> Memory {
    let mut end = desc.warp.addr + u64::from(desc.warp.stride) * u64::from(desc.warp.height);
    if let Some(g) = &desc.grad {
        end = end.max(g.addr + u64::from(g.stride) * u64::from(g.height));
    }
    Memory::new(end as usize + 256)
}

/// Runs a task to completion, applying writes to the memory.
///
/// Panics if the model does not drain within the tick budget.
pub fn run_task(desc: TaskDescriptor, mem: &mut Memory) -> Result<Resampler> {
    let mut model = Resampler::new(desc)?;
    let mut fill_q: VecDeque<ReadResponse> = VecDeque::new();
    let mut warp_q: VecDeque<ReadResponse> = VecDeque::new();
    let mut grad_q: VecDeque<ReadResponse> = VecDeque::new();

    for tick in 0u64.. {
        assert!(tick < MAX_TICKS, "model failed to drain in {MAX_TICKS} ticks");
        let inputs = TickInputs {
            fill: fill_q.pop_front(),
            warp: warp_q.pop_front(),
            grad: grad_q.pop_front(),
        };
        let out = model.tick(inputs)?;

        // Responses are delivered on a later tick, never the same one.
        if let Some(req) = out.fill_read {
            fill_q.push_back(mem.read(&req));
        }
        if let Some(req) = out.warp_read {
            warp_q.push_back(mem.read(&req));
        }
        if let Some(req) = out.grad_read {
            grad_q.push_back(mem.read(&req));
        }
        if let Some(tx) = out.write {
            mem.write(&tx);
        }
        if out.done {
            break;
        }
    }
    Ok(model)
}
