//! GameCube/Wii disc drive emulation: the DVD interface registers, the drive timing model and
//! the asynchronous read thread that keeps slow storage off the emulation thread.

#[macro_use]
extern crate log;

pub mod common;
pub mod config;
pub mod console;
pub mod error;
pub mod logger;

pub use config::ConsoleConfig;
pub use console::Console;
pub use error::{Error, Result};
