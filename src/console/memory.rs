//! Main RAM

use crate::common::chunk_file::PointerWrap;

/// Main RAM: 24MB of 1T-SRAM
pub const RAM_SIZE: usize = 24 * 1024 * 1024;

/// Mask used to strip the segment bits of an address (cached/uncached mirrors)
const RAM_MASK: u32 = 0x01ff_ffff;

pub struct Memory {
    ram: Box<[u8]>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
        }
    }

    /// Return the range of RAM covered by `len` bytes at `address`, or `None` if some of it falls
    /// outside of RAM.
    fn range(address: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = (address & RAM_MASK) as usize;
        let end = start.checked_add(len)?;

        if end <= RAM_SIZE {
            Some(start..end)
        } else {
            None
        }
    }

    /// DMA `data` into RAM at `address`. Invalid transfers are discarded entirely, we never
    /// perform a partial copy.
    pub fn copy_to_emu(&mut self, address: u32, data: &[u8]) {
        match Memory::range(address, data.len()) {
            Some(r) => self.ram[r].copy_from_slice(data),
            None => error!(
                "Invalid DMA to RAM: 0x{:x} bytes at 0x{:08x}",
                data.len(),
                address
            ),
        }
    }

    /// Read `out.len()` bytes from RAM at `address`. Invalid transfers leave `out` untouched.
    pub fn copy_from_emu(&self, address: u32, out: &mut [u8]) {
        match Memory::range(address, out.len()) {
            Some(r) => out.copy_from_slice(&self.ram[r]),
            None => error!(
                "Invalid DMA from RAM: 0x{:x} bytes at 0x{:08x}",
                out.len(),
                address
            ),
        }
    }

    /// Fetch the big endian word at `address`
    pub fn read_u32(&self, address: u32) -> u32 {
        let mut b = [0; 4];

        self.copy_from_emu(address, &mut b);

        u32::from_be_bytes(b)
    }

    /// Store the big endian word `val` at `address`
    pub fn write_u32(&mut self, address: u32, val: u32) {
        self.copy_to_emu(address, &val.to_be_bytes());
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.do_bytes(&mut self.ram);
    }
}
