pub mod alert;
pub mod core_timing;
pub mod dvd;
pub mod irq;
pub mod memory;
pub mod savestate;

use self::alert::{AlertHandler, LogAlert};
use self::core_timing::CoreTiming;
use self::dvd::thread::DvdThread;
use self::dvd::volume::Volume;
use self::dvd::DvdInterface;
use self::memory::Memory;
use crate::common::chunk_file::PointerWrap;
use crate::config::ConsoleConfig;
use crate::error::Result;

/// State of an emulated console. Constructing it is powering the console on, dropping it powers
/// it off.
pub struct Console {
    pub config: ConsoleConfig,
    pub core_timing: CoreTiming,
    pub memory: Memory,
    pub irq: irq::InterruptState,
    pub dvd: DvdInterface,
    pub dvd_thread: DvdThread,
    alert: Box<dyn AlertHandler>,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> Result<Console> {
        let mut core_timing = CoreTiming::new();

        let dvd = DvdInterface::new(&mut core_timing);
        let mut dvd_thread = DvdThread::new(&mut core_timing);

        dvd_thread.start(config.dvd_thread_stack_size)?;

        let console = Console {
            config,
            core_timing,
            memory: Memory::new(),
            irq: irq::InterruptState::new(),
            dvd,
            dvd_thread,
            alert: Box::new(LogAlert),
        };

        Ok(console)
    }

    pub fn set_alert_handler(&mut self, handler: Box<dyn AlertHandler>) {
        self.alert = handler;
    }

    /// Report a problem to the user. The emulation carries on.
    pub fn panic_alert(&mut self, msg: &str) {
        self.alert.panic_alert(msg);
    }

    /// Insert a disc in the drive, returns the disc previously inserted if any
    pub fn insert_disc(&mut self, volume: Box<dyn Volume>) -> Option<Box<dyn Volume>> {
        dvd::set_disc(self, Some(volume))
    }

    pub fn eject_disc(&mut self) -> Option<Box<dyn Volume>> {
        dvd::set_disc(self, None)
    }

    /// Run the emulated console for `cycles` CPU cycles. With no CPU emulation only the
    /// scheduled events are processed.
    pub fn run_for(&mut self, cycles: u64) {
        core_timing::advance(self, cycles);
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.do_marker("CoreTiming");
        self.core_timing.do_state(p);

        p.do_marker("Memory");
        self.memory.do_state(p);

        p.do_marker("ProcessorInterface");
        self.irq.do_state(p);

        p.do_marker("DVDInterface");
        dvd::do_state(self, p);

        p.do_marker("End");
    }

    /// Replace the alert handler with one that records messages, for tests
    #[cfg(test)]
    pub fn record_alerts(&mut self) -> std::sync::Arc<std::sync::Mutex<Vec<String>>> {
        let alerts = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        self.set_alert_handler(Box::new(alert::RecordAlert(alerts.clone())));

        alerts
    }
}
