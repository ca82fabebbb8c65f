//! Disc images

use crate::error::{Error, Result};
use shaman::digest::Digest;
use shaman::sha2::Sha256;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Size of the disc header (boot.bin + bi2.bin)
pub const DISC_HEADER_SIZE: usize = 0x440;

/// Offset and value of the GameCube disc magic word
const GC_MAGIC_OFFSET: usize = 0x1c;
const GC_MAGIC: u32 = 0xc233_9f3d;
/// Offset and value of the Wii disc magic word
const WII_MAGIC_OFFSET: usize = 0x18;
const WII_MAGIC: u32 = 0x5d1c_9ea3;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Platform {
    GameCube,
    Wii,
}

/// Anything the drive can read data from. The volume is handed over to the DVD thread, reads
/// block for as long as the underlying storage needs.
pub trait Volume: Send {
    /// Fill `out` with the disc contents at `offset`. `decrypt` requests the decrypted view of a
    /// Wii partition.
    fn read(&mut self, offset: u64, out: &mut [u8], decrypt: bool) -> Result<()>;

    /// Size of the disc in bytes
    fn size(&self) -> u64;

    fn platform(&self) -> Platform;
}

/// Work out the platform of a disc from its header
pub fn identify(header: &[u8]) -> Result<Platform> {
    let word = |off: usize| -> u32 {
        let mut b = [0; 4];
        b.copy_from_slice(&header[off..off + 4]);
        u32::from_be_bytes(b)
    };

    if header.len() < GC_MAGIC_OFFSET + 4 {
        return Err(Error::BadDiscFormat("disc header too short".to_string()));
    }

    if word(GC_MAGIC_OFFSET) == GC_MAGIC {
        Ok(Platform::GameCube)
    } else if word(WII_MAGIC_OFFSET) == WII_MAGIC {
        Ok(Platform::Wii)
    } else {
        Err(Error::BadDiscFormat(
            "no GameCube or Wii magic in disc header".to_string(),
        ))
    }
}

/// Uncompressed 1:1 disc image ("ISO")
pub struct FileVolume {
    file: File,
    size: u64,
    platform: Platform,
}

impl FileVolume {
    pub fn open(path: &Path) -> Result<FileVolume> {
        let mut file = File::open(path)?;

        let size = file.metadata()?.len();

        let mut header = [0; DISC_HEADER_SIZE];

        if size < header.len() as u64 {
            return Err(Error::BadDiscFormat(format!(
                "{} is too small to be a disc image",
                path.display()
            )));
        }

        file.read_exact(&mut header)?;

        let platform = identify(&header)?;

        info!(
            "Opened {:?} disc image {} (0x{:x} bytes)",
            platform,
            path.display(),
            size
        );

        Ok(FileVolume {
            file,
            size,
            platform,
        })
    }
}

impl Volume for FileVolume {
    fn read(&mut self, offset: u64, out: &mut [u8], decrypt: bool) -> Result<()> {
        if decrypt && self.platform == Platform::Wii {
            return Err(Error::Unsupported(
                "Wii partition decryption".to_string(),
            ));
        }

        let end = offset.checked_add(out.len() as u64);

        if end.map_or(true, |end| end > self.size) {
            return Err(Error::OutOfBounds {
                offset,
                len: out.len(),
                size: self.size,
            });
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(out)?;

        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn platform(&self) -> Platform {
        self.platform
    }
}

/// SHA-256 of the disc header, used to make sure that a savestate is loaded with the disc it was
/// created with.
pub fn disc_digest(volume: &mut dyn Volume) -> Result<[u8; 32]> {
    let mut header = [0; DISC_HEADER_SIZE];

    volume.read(0, &mut header, false)?;

    let mut hasher = Sha256::new();
    hasher.input(&header);

    let mut digest = [0; 32];
    hasher.result(&mut digest);

    Ok(digest)
}
