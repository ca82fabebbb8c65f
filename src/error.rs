use std::fmt;
use std::io;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// Something went wrong in the emulator's own logic
    LogicError(String),
    /// The disc format was incorrect (i.e. probably not a valid GameCube or Wii disc image)
    BadDiscFormat(String),
    /// The savestate is truncated, corrupted or was created by an incompatible version
    BadSaveState(String),
    /// The savestate was created with a different disc in the drive
    WrongDisc,
    /// Attempted to read past the end of the disc
    OutOfBounds { offset: u64, len: usize, size: u64 },
    /// The operation isn't implemented for this disc
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::LogicError(s) => write!(f, "{}", s),
            Error::BadDiscFormat(s) => write!(f, "bad disc format: {}", s),
            Error::BadSaveState(s) => write!(f, "bad savestate: {}", s),
            Error::WrongDisc => write!(f, "the savestate was created with a different disc"),
            Error::OutOfBounds { offset, len, size } => write!(
                f,
                "read of 0x{:x} bytes at 0x{:x} is past the end of the disc (0x{:x} bytes)",
                len, offset, size
            ),
            Error::Unsupported(s) => write!(f, "unsupported: {}", s),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}
