//! Logger implementation writing to stderr

use crate::error::{Error, Result};
use std::io::{stderr, Write};

struct StdErrLogger;

impl log::Log for StdErrLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(
                &mut stderr(),
                "{} - {} - {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = stderr().flush();
    }
}

/// Install the stderr logger. Fails if a logger has already been installed for this process.
pub fn init(level: log::LevelFilter) -> Result<()> {
    log::set_boxed_logger(Box::new(StdErrLogger))
        .map_err(|e| Error::LogicError(format!("Couldn't initialize logging: {}", e)))?;

    log::set_max_level(level);

    info!("Logging initialized");

    Ok(())
}
