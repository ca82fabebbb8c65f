//! Whole-console savestates.
//!
//! A savestate is a small header followed by the output of `Console::do_state`. The header
//! identifies the disc in the drive so that a state isn't loaded with the wrong game.

use super::dvd::volume;
use super::Console;
use crate::common::chunk_file::PointerWrap;
use crate::error::{Error, Result};

const MAGIC: [u8; 4] = *b"GCDS";

/// Bumped every time the layout of the state changes
const VERSION: u32 = 2;

struct Header {
    magic: [u8; 4],
    version: u32,
    /// Digest of the disc header, if a disc was in the drive
    has_disc: bool,
    disc_digest: [u8; 32],
    /// Length of the console state following the header
    body_len: u32,
}

impl Header {
    fn new() -> Header {
        Header {
            magic: MAGIC,
            version: VERSION,
            has_disc: false,
            disc_digest: [0; 32],
            body_len: 0,
        }
    }

    fn do_state(&mut self, p: &mut PointerWrap) {
        p.do_bytes(&mut self.magic);
        p.wrap(&mut self.version);
        p.wrap(&mut self.has_disc);
        p.do_bytes(&mut self.disc_digest);
        p.wrap(&mut self.body_len);
    }

    fn disc(&self) -> Option<[u8; 32]> {
        if self.has_disc {
            Some(self.disc_digest)
        } else {
            None
        }
    }
}

fn current_disc(console: &mut Console) -> Result<Option<[u8; 32]>> {
    match console.dvd_thread.volume_mut() {
        Some(v) => volume::disc_digest(v).map(Some),
        None => Ok(None),
    }
}

/// Split `data` into a validated header and the console state
fn parse(data: &[u8]) -> Result<(Header, &[u8])> {
    let mut header = Header::new();

    let mut r = PointerWrap::reader(data);
    header.do_state(&mut r);
    let header_len = r.finish()?;

    if header.magic != MAGIC {
        return Err(Error::BadSaveState("not a savestate".to_string()));
    }

    if header.version != VERSION {
        return Err(Error::BadSaveState(format!(
            "unsupported savestate version {} (expected {})",
            header.version, VERSION
        )));
    }

    let body = &data[header_len..];

    if body.len() != header.body_len as usize {
        return Err(Error::BadSaveState(format!(
            "savestate length mismatch: expected 0x{:x} bytes, got 0x{:x}",
            header.body_len,
            body.len()
        )));
    }

    Ok((header, body))
}

fn save_body(console: &mut Console) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    let mut w = PointerWrap::writer(&mut body);
    console.do_state(&mut w);
    w.finish()?;

    Ok(body)
}

/// Serialize the entire console. A disc read in progress is completed first.
pub fn save(console: &mut Console) -> Result<Vec<u8>> {
    let mut header = Header::new();

    if let Some(digest) = current_disc(console)? {
        header.has_disc = true;
        header.disc_digest = digest;
    }

    let mut m = PointerWrap::measurer();
    console.do_state(&mut m);
    let body_len = m.finish()?;

    if body_len > u32::MAX as usize {
        return Err(Error::LogicError(format!(
            "savestate too large (0x{:x} bytes)",
            body_len
        )));
    }

    header.body_len = body_len as u32;

    let mut out = Vec::with_capacity(body_len + 64);

    let mut w = PointerWrap::writer(&mut out);
    header.do_state(&mut w);
    let header_len = w.position();
    console.do_state(&mut w);
    let total = w.finish()?;

    if total != header_len + body_len {
        return Err(Error::LogicError(format!(
            "savestate size changed while saving (measured 0x{:x}, wrote 0x{:x})",
            body_len,
            total - header_len
        )));
    }

    info!("Saved state (0x{:x} bytes)", total);

    Ok(out)
}

/// Restore a state created by `save`. If the state can't be decoded the console is put back in
/// the state it was in before the call.
pub fn load(console: &mut Console, data: &[u8]) -> Result<()> {
    let (header, body) = parse(data)?;

    if header.disc() != current_disc(console)? {
        error!("Refusing to load a savestate created with a different disc");
        return Err(Error::WrongDisc);
    }

    let backup = save_body(console)?;

    let mut r = PointerWrap::reader(body);
    console.do_state(&mut r);

    let res = match r.finish() {
        Ok(len) if len == body.len() => Ok(()),
        Ok(len) => Err(Error::BadSaveState(format!(
            "0x{:x} trailing bytes in savestate",
            body.len() - len
        ))),
        Err(e) => Err(e),
    };

    if let Err(e) = res {
        error!("Savestate load failed ({}), restoring previous state", e);

        let mut r = PointerWrap::reader(&backup);
        console.do_state(&mut r);

        if let Err(restore) = r.finish() {
            return Err(Error::LogicError(format!(
                "couldn't restore the state after a failed load: {}",
                restore
            )));
        }

        return Err(e);
    }

    info!("Loaded state (0x{:x} bytes)", data.len());

    Ok(())
}

/// Check that `data` matches the current state of the console
pub fn verify(console: &mut Console, data: &[u8]) -> Result<()> {
    let (header, body) = parse(data)?;

    if header.disc() != current_disc(console)? {
        return Err(Error::WrongDisc);
    }

    let mut v = PointerWrap::verifier(body);
    console.do_state(&mut v);
    v.finish()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleConfig;
    use crate::console::dvd::volume::{Platform, Volume};

    struct ConstVolume(u8);

    impl Volume for ConstVolume {
        fn read(&mut self, _: u64, out: &mut [u8], _: bool) -> Result<()> {
            for b in out.iter_mut() {
                *b = self.0;
            }
            Ok(())
        }

        fn size(&self) -> u64 {
            0x10_0000
        }

        fn platform(&self) -> Platform {
            Platform::GameCube
        }
    }

    fn console() -> Console {
        Console::new(ConsoleConfig::default()).unwrap()
    }

    #[test]
    fn save_load_verify() {
        let mut c = console();
        c.memory.write_u32(0x8000_1234 & !3, 0xcafe_f00d);
        c.run_for(1000);

        let state = save(&mut c).unwrap();
        verify(&mut c, &state).unwrap();

        let mut other = console();
        assert!(verify(&mut other, &state).is_err());

        load(&mut other, &state).unwrap();
        verify(&mut other, &state).unwrap();

        assert_eq!(other.memory.read_u32(0x8000_1234 & !3), 0xcafe_f00d);
        assert_eq!(other.core_timing.get_ticks(), 1000);
    }

    #[test]
    fn wrong_disc_is_rejected() {
        let mut c = console();
        c.insert_disc(Box::new(ConstVolume(1)));

        let state = save(&mut c).unwrap();

        let mut other = console();
        other.insert_disc(Box::new(ConstVolume(2)));

        match load(&mut other, &state) {
            Err(Error::WrongDisc) => (),
            r => panic!("Unexpected result {:?}", r),
        }

        let mut empty = console();
        assert!(load(&mut empty, &state).is_err());

        let mut same = console();
        same.insert_disc(Box::new(ConstVolume(1)));
        load(&mut same, &state).unwrap();
    }

    #[test]
    fn corrupted_state_rolls_back() {
        let mut c = console();
        c.memory.write_u32(0x8000_0000, 0x1111_1111);
        let mut state = save(&mut c).unwrap();

        let mut other = console();
        other.memory.write_u32(0x8000_0000, 0x2222_2222);
        other.run_for(77);

        // Corrupt the last byte of the body (the end marker)
        let last = state.len() - 1;
        state[last] ^= 0xff;

        assert!(load(&mut other, &state).is_err());

        assert_eq!(other.memory.read_u32(0x8000_0000), 0x2222_2222);
        assert_eq!(other.core_timing.get_ticks(), 77);
    }

    #[test]
    fn bad_header() {
        let mut c = console();
        let state = save(&mut c).unwrap();

        let mut bad_magic = state.clone();
        bad_magic[0] = b'X';
        assert!(load(&mut c, &bad_magic).is_err());

        let truncated = &state[..state.len() - 4];
        assert!(load(&mut c, truncated).is_err());

        assert!(load(&mut c, &[]).is_err());
    }
}
