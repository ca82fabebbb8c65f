//! Savestate serialization substrate.
//!
//! Every piece of state implements a single `do_state(&mut self, p: &mut PointerWrap)` method
//! that calls `p.wrap(&mut field)` for each field. The same code is used to load, save, measure
//! or verify a snapshot depending on the mode of the `PointerWrap`.
//!
//! Values are encoded in little endian without any padding or type information. `do_marker`
//! can be used to insert section markers that catch mismatched layouts early.

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Restore the state from the buffer
    Read,
    /// Append the state to the buffer
    Write,
    /// Only compute the size of the state
    Measure,
    /// Compare the state against the buffer without modifying anything
    Verify,
}

enum Storage<'a> {
    Read(&'a [u8]),
    Write(&'a mut Vec<u8>),
    Measure,
    Verify(&'a [u8]),
}

pub struct PointerWrap<'a> {
    storage: Storage<'a>,
    /// Current position in the data (also the measured size in `Measure` mode)
    pos: usize,
    /// First error encountered, if any. Once set all accesses become no-ops.
    error: Option<String>,
}

impl<'a> PointerWrap<'a> {
    pub fn reader(data: &'a [u8]) -> PointerWrap<'a> {
        PointerWrap::with_storage(Storage::Read(data))
    }

    pub fn writer(out: &'a mut Vec<u8>) -> PointerWrap<'a> {
        PointerWrap::with_storage(Storage::Write(out))
    }

    pub fn measurer() -> PointerWrap<'static> {
        PointerWrap::with_storage(Storage::Measure)
    }

    pub fn verifier(data: &'a [u8]) -> PointerWrap<'a> {
        PointerWrap::with_storage(Storage::Verify(data))
    }

    fn with_storage(storage: Storage<'a>) -> PointerWrap<'a> {
        PointerWrap {
            storage,
            pos: 0,
            error: None,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.storage {
            Storage::Read(_) => Mode::Read,
            Storage::Write(_) => Mode::Write,
            Storage::Measure => Mode::Measure,
            Storage::Verify(_) => Mode::Verify,
        }
    }

    pub fn is_reading(&self) -> bool {
        self.mode() == Mode::Read
    }

    /// Number of bytes processed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Flag the state as invalid. Only the first error is kept.
    pub fn set_error(&mut self, msg: String) {
        if self.error.is_none() {
            error!("Savestate error at offset 0x{:x}: {}", self.pos, msg);
            self.error = Some(msg);
        }
    }

    /// Consume the wrapper and return the number of bytes processed, or the first error
    pub fn finish(self) -> Result<usize> {
        match self.error {
            Some(e) => Err(Error::BadSaveState(e)),
            None => Ok(self.pos),
        }
    }

    fn remaining(data: &[u8], pos: usize, len: usize) -> Option<std::ops::Range<usize>> {
        let end = pos.checked_add(len)?;

        if end <= data.len() {
            Some(pos..end)
        } else {
            None
        }
    }

    /// Process a raw byte buffer of fixed size
    pub fn do_bytes(&mut self, bytes: &mut [u8]) {
        if self.error.is_some() {
            return;
        }

        let len = bytes.len();

        match self.storage {
            Storage::Read(data) => match PointerWrap::remaining(data, self.pos, len) {
                Some(r) => bytes.copy_from_slice(&data[r]),
                None => {
                    self.set_error(format!("truncated data ({} bytes requested)", len));
                    return;
                }
            },
            Storage::Write(ref mut out) => out.extend_from_slice(bytes),
            Storage::Measure => (),
            Storage::Verify(data) => match PointerWrap::remaining(data, self.pos, len) {
                Some(r) => {
                    if data[r] != *bytes {
                        self.set_error(format!("verification mismatch ({} bytes)", len));
                        return;
                    }
                }
                None => {
                    self.set_error(format!("truncated data ({} bytes requested)", len));
                    return;
                }
            },
        }

        self.pos += len;
    }

    /// Process a single value
    pub fn wrap<T: Wrappable + ?Sized>(&mut self, v: &mut T) {
        v.wrap(self)
    }

    /// Process a variable-length byte vector: a u32 length followed by the contents. In read mode
    /// the vector is resized to the stored length.
    pub fn do_vec(&mut self, v: &mut Vec<u8>) {
        let mut len = v.len() as u32;

        if v.len() > u32::MAX as usize {
            self.set_error(format!("vector too large ({} bytes)", v.len()));
            return;
        }

        self.wrap(&mut len);

        if !self.is_ok() {
            return;
        }

        if self.is_reading() {
            let len = len as usize;

            if let Storage::Read(data) = self.storage {
                // Don't allocate a huge buffer for a corrupted length
                if PointerWrap::remaining(data, self.pos, len).is_none() {
                    self.set_error(format!("truncated vector ({} bytes)", len));
                    return;
                }
            }

            v.resize(len, 0);
        }

        self.do_bytes(v);
    }

    /// Insert a named section marker. When reading or verifying, a marker that doesn't match
    /// means that the layout of the state doesn't match the code and the state is rejected.
    pub fn do_marker(&mut self, name: &str) {
        let mut tag = marker_tag(name);

        let expected = tag;

        self.wrap(&mut tag);

        if self.is_ok() && tag != expected {
            self.set_error(format!(
                "marker mismatch for '{}' (expected 0x{:08x} got 0x{:08x})",
                name, expected, tag
            ));
        }
    }
}

/// Values that know how to serialize themselves through a `PointerWrap`
pub trait Wrappable {
    fn wrap(&mut self, p: &mut PointerWrap);
}

macro_rules! wrappable_int {
    ($($t:ty),*) => {
        $(
            impl Wrappable for $t {
                fn wrap(&mut self, p: &mut PointerWrap) {
                    let mut b = self.to_le_bytes();

                    p.do_bytes(&mut b);

                    if p.is_reading() && p.is_ok() {
                        *self = <$t>::from_le_bytes(b);
                    }
                }
            }
        )*
    };
}

wrappable_int!(u8, u16, u32, u64, i32, i64);

impl Wrappable for bool {
    fn wrap(&mut self, p: &mut PointerWrap) {
        let mut b = *self as u8;

        p.wrap(&mut b);

        if p.is_reading() && p.is_ok() {
            match b {
                0 => *self = false,
                1 => *self = true,
                _ => p.set_error(format!("invalid boolean value {}", b)),
            }
        }
    }
}

impl<T: Wrappable> Wrappable for [T] {
    fn wrap(&mut self, p: &mut PointerWrap) {
        for v in self.iter_mut() {
            p.wrap(v);
        }
    }
}

impl<T: Wrappable, const N: usize> Wrappable for [T; N] {
    fn wrap(&mut self, p: &mut PointerWrap) {
        p.wrap(&mut self[..]);
    }
}

/// FNV-1a hash of the marker name, so that a reordering of two sections is caught as well
fn marker_tag(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5, |h, b| {
        (h ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
