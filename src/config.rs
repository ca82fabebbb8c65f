//! Emulated console configuration. The frontend is in charge of building it.

/// GameCube CPU clock
const GC_CPU_FREQ_HZ: u64 = 486_000_000;
/// Wii CPU clock
const WII_CPU_FREQ_HZ: u64 = 729_000_000;

#[derive(Clone, Debug)]
pub struct ConsoleConfig {
    /// Emulate a Wii instead of a GameCube. Changes the CPU clock and therefore the number of
    /// virtual ticks in a second.
    pub wii: bool,
    /// If true all disc reads are considered to hit the drive's read-ahead buffer, which makes
    /// loading faster than on the real hardware. Some games don't like it.
    pub fast_disc_speed: bool,
    /// Stack size of the DVD worker thread
    pub dvd_thread_stack_size: usize,
}

impl ConsoleConfig {
    pub fn ticks_per_second(&self) -> u64 {
        if self.wii {
            WII_CPU_FREQ_HZ
        } else {
            GC_CPU_FREQ_HZ
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> ConsoleConfig {
        ConsoleConfig {
            wii: false,
            fast_disc_speed: false,
            dvd_thread_stack_size: 256 * 1024,
        }
    }
}
