//! Processor interface interrupt lines

use super::Console;
use crate::common::chunk_file::PointerWrap;

/// Interrupt causes latched by the processor interface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(unused)]
pub enum Interrupt {
    /// GP runtime error
    Error = 0,
    /// Reset switch
    ResetSwitch = 1,
    /// DVD interface
    Di = 2,
    /// Serial interface
    Si = 3,
    /// External interface
    Exi = 4,
    /// Audio streaming
    Ai = 5,
    /// DSP
    Dsp = 6,
    /// Memory interface
    Mem = 7,
    /// Video interface
    Vi = 8,
    /// Pixel engine token
    PeToken = 9,
    /// Pixel engine finish
    PeFinish = 10,
    /// Command processor FIFO
    Cp = 11,
}

pub struct InterruptState {
    /// Interrupt cause
    status: u32,
    /// Number of rising edges per interrupt line, used to check that each event is delivered
    /// exactly once
    edges: [u32; 12],
}

impl InterruptState {
    pub fn new() -> InterruptState {
        InterruptState {
            status: 0,
            edges: [0; 12],
        }
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.wrap(&mut self.status);
        p.wrap(&mut self.edges);
    }
}

/// Raise or lower the line for `which`
pub fn set_interrupt(console: &mut Console, which: Interrupt, active: bool) {
    let bit = 1 << which as u32;

    if active {
        if console.irq.status & bit == 0 {
            console.irq.edges[which as usize] = console.irq.edges[which as usize].wrapping_add(1);
        }
        console.irq.status |= bit;
    } else {
        console.irq.status &= !bit;
    }
}

pub fn is_asserted(console: &Console, which: Interrupt) -> bool {
    console.irq.status & (1 << which as u32) != 0
}

/// Number of times `which` went from low to high since power-on
pub fn edge_count(console: &Console, which: Interrupt) -> u32 {
    console.irq.edges[which as usize]
}
