//! DVD interface: the register block used by the CPU to send commands to the disc drive.
//!
//! Commands are executed when TSTART is written to DICR. Disc reads are handed over to the DVD
//! thread, everything else completes after a short fixed delay.

pub mod thread;
pub mod timing;
pub mod volume;

use self::timing::ReadBuffer;
use self::volume::{Platform, Volume};
use super::core_timing::EventType;
use super::irq::{self, Interrupt};
use super::Console;
use crate::common::chunk_file::PointerWrap;

/// Error codes returned by the RequestError command
pub const ERROR_READY: u32 = 0x0000_0000;
pub const ERROR_NO_DISK: u32 = 0x0300_0000;
/// Cover opened or no disc
pub const ERROR_COVER_H: u32 = 0x0002_3a00;
pub const ERROR_INV_CMD: u32 = 0x0005_2000;
/// Read past the end of the disc
pub const ERROR_BLOCK_OOB: u32 = 0x0005_2100;

/// Register offsets
pub const DISR: u32 = 0x00;
pub const DICVR: u32 = 0x04;
pub const DICMDBUF0: u32 = 0x08;
pub const DICMDBUF1: u32 = 0x0c;
pub const DICMDBUF2: u32 = 0x10;
pub const DIMAR: u32 = 0x14;
pub const DILENGTH: u32 = 0x18;
pub const DICR: u32 = 0x1c;
pub const DIIMMBUF: u32 = 0x20;
pub const DICFG: u32 = 0x24;

/// DISR bits
pub const DISR_BREAK: u32 = 1 << 0;
pub const DISR_DEINTMASK: u32 = 1 << 1;
pub const DISR_DEINT: u32 = 1 << 2;
pub const DISR_TCINTMASK: u32 = 1 << 3;
pub const DISR_TCINT: u32 = 1 << 4;
pub const DISR_BRKINTMASK: u32 = 1 << 5;
pub const DISR_BRKINT: u32 = 1 << 6;

/// DICVR bits
pub const DICVR_CVR: u32 = 1 << 0;
pub const DICVR_CVRINTMASK: u32 = 1 << 1;
pub const DICVR_CVRINT: u32 = 1 << 2;

/// DICR bits
pub const DICR_TSTART: u32 = 1 << 0;

/// Delay between the ejection of the old disc and the insertion of the new one
const DISC_CHANGE_DELAY: u64 = 500_000_000;

/// Interrupts raised by the DVD interface at the end of a command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiInterrupt {
    /// Device error
    Deint = 0,
    /// Transfer complete
    Tcint = 1,
    /// Break complete
    Brkint = 2,
    /// Cover state changed
    Cvrint = 3,
}

impl DiInterrupt {
    fn from_userdata(userdata: u64) -> Option<DiInterrupt> {
        let it = match userdata {
            0 => DiInterrupt::Deint,
            1 => DiInterrupt::Tcint,
            2 => DiInterrupt::Brkint,
            3 => DiInterrupt::Cvrint,
            _ => return None,
        };

        Some(it)
    }
}

/// Commands understood by the drive (first byte of DICMDBUF0)
mod command {
    pub const INQUIRY: u32 = 0x12;
    pub const REPORT_KEY: u32 = 0xa4;
    pub const READ: u32 = 0xa8;
    pub const SEEK: u32 = 0xab;
    pub const REQUEST_ERROR: u32 = 0xe0;
    pub const STOP_MOTOR: u32 = 0xe3;
    pub const AUDIO_BUFFER_CONFIG: u32 = 0xe4;
    pub const SET_EXTENSION: u32 = 0x55;
    pub const SET_STATUS: u32 = 0xee;
    pub const UNLOCK: u32 = 0xff;
}

pub struct DvdInterface {
    /// Status register
    disr: u32,
    /// Cover register
    dicvr: u32,
    /// Command buffers
    dicmdbuf: [u32; 3],
    /// DMA address
    dimar: u32,
    /// DMA length
    dilength: u32,
    /// DMA control
    dicr: u32,
    /// Immediate data
    diimmbuf: u32,
    /// Configuration (read-only)
    dicfg: u32,
    /// Error code of the last command, returned by RequestError
    error_code: u32,
    disc_inside: bool,
    /// Size and platform of the inserted disc, used to validate and time reads
    disc_size: u64,
    platform: Platform,
    read_buffer: ReadBuffer,
    /// Disc waiting to be inserted by `change_disc`
    pending_disc: Option<Box<dyn Volume>>,
    finish_executing_command: EventType,
    eject_disc: EventType,
    insert_disc: EventType,
}

impl DvdInterface {
    pub fn new(core_timing: &mut super::core_timing::CoreTiming) -> DvdInterface {
        DvdInterface {
            disr: 0,
            // Lid open, no disc
            dicvr: DICVR_CVR,
            dicmdbuf: [0; 3],
            dimar: 0,
            dilength: 0,
            dicr: 0,
            diimmbuf: 0,
            // Bootrom descrambler disabled
            dicfg: 1,
            error_code: 0,
            disc_inside: false,
            disc_size: 0,
            platform: Platform::GameCube,
            read_buffer: ReadBuffer::new(),
            pending_disc: None,
            finish_executing_command: core_timing
                .register_event("FinishExecutingCommand", finish_executing_command_callback),
            eject_disc: core_timing.register_event("EjectDisc", eject_disc_callback),
            insert_disc: core_timing.register_event("InsertDisc", insert_disc_callback),
        }
    }

    pub fn is_disc_inside(&self) -> bool {
        self.disc_inside
    }

    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    pub fn finish_executing_command_event(&self) -> EventType {
        self.finish_executing_command
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.wrap(&mut self.disr);
        p.wrap(&mut self.dicvr);
        p.wrap(&mut self.dicmdbuf);
        p.wrap(&mut self.dimar);
        p.wrap(&mut self.dilength);
        p.wrap(&mut self.dicr);
        p.wrap(&mut self.diimmbuf);
        p.wrap(&mut self.dicfg);
        p.wrap(&mut self.error_code);
        p.wrap(&mut self.disc_inside);
        self.read_buffer.do_state(p);
    }
}

pub fn load(console: &mut Console, offset: u32) -> u32 {
    let dvd = &console.dvd;

    match offset {
        DISR => dvd.disr,
        DICVR => dvd.dicvr,
        DICMDBUF0 => dvd.dicmdbuf[0],
        DICMDBUF1 => dvd.dicmdbuf[1],
        DICMDBUF2 => dvd.dicmdbuf[2],
        DIMAR => dvd.dimar,
        DILENGTH => dvd.dilength,
        DICR => dvd.dicr,
        DIIMMBUF => dvd.diimmbuf,
        DICFG => dvd.dicfg,
        _ => {
            warn!("Unhandled DI load at offset 0x{:02x}", offset);
            0
        }
    }
}

pub fn store(console: &mut Console, offset: u32, val: u32) {
    match offset {
        DISR => {
            let dvd = &mut console.dvd;

            let writable = DISR_BREAK | DISR_DEINTMASK | DISR_TCINTMASK | DISR_BRKINTMASK;

            dvd.disr = (dvd.disr & !writable) | (val & writable);

            // Writing 1 acknowledges the interrupt
            dvd.disr &= !(val & (DISR_DEINT | DISR_TCINT | DISR_BRKINT));

            if dvd.disr & DISR_BREAK != 0 {
                warn!("DI break requested, not implemented");
            }

            update_interrupts(console);
        }
        DICVR => {
            let dvd = &mut console.dvd;

            dvd.dicvr = (dvd.dicvr & !DICVR_CVRINTMASK) | (val & DICVR_CVRINTMASK);

            if val & DICVR_CVRINT != 0 {
                dvd.dicvr &= !DICVR_CVRINT;
            }

            update_interrupts(console);
        }
        DICMDBUF0 => console.dvd.dicmdbuf[0] = val,
        DICMDBUF1 => console.dvd.dicmdbuf[1] = val,
        DICMDBUF2 => console.dvd.dicmdbuf[2] = val,
        DIMAR => console.dvd.dimar = val & !0xfc00_001f,
        DILENGTH => console.dvd.dilength = val & !0x1f,
        DICR => {
            console.dvd.dicr = val & 7;

            if console.dvd.dicr & DICR_TSTART != 0 {
                execute_command(console);
            }
        }
        DIIMMBUF => console.dvd.diimmbuf = val,
        DICFG => warn!("Write to read-only DICFG: 0x{:08x}", val),
        _ => warn!("Unhandled DI store at offset 0x{:02x}: 0x{:08x}", offset, val),
    }
}

/// Drive the processor interface DI line from the status and cover registers
pub fn update_interrupts(console: &mut Console) {
    let disr = console.dvd.disr;
    let dicvr = console.dvd.dicvr;

    let active = (disr & DISR_DEINT != 0 && disr & DISR_DEINTMASK != 0)
        || (disr & DISR_TCINT != 0 && disr & DISR_TCINTMASK != 0)
        || (disr & DISR_BRKINT != 0 && disr & DISR_BRKINTMASK != 0)
        || (dicvr & DICVR_CVRINT != 0 && dicvr & DICVR_CVRINTMASK != 0);

    irq::set_interrupt(console, Interrupt::Di, active);
}

fn generate_interrupt(console: &mut Console, interrupt: DiInterrupt) {
    let dvd = &mut console.dvd;

    match interrupt {
        DiInterrupt::Deint => dvd.disr |= DISR_DEINT,
        DiInterrupt::Tcint => dvd.disr |= DISR_TCINT,
        DiInterrupt::Brkint => dvd.disr |= DISR_BRKINT,
        DiInterrupt::Cvrint => dvd.dicvr |= DICVR_CVRINT,
    }

    update_interrupts(console);
}

pub fn set_error_code(console: &mut Console, code: u32) {
    console.dvd.error_code = code;
}

/// Start a disc read. Returns `None` if the command has been handed over to the DVD thread,
/// otherwise the interrupt to raise once the command completes.
fn execute_read_command(
    console: &mut Console,
    dvd_offset: u64,
    output_address: u32,
    mut length: u32,
    output_length: u32,
) -> Option<DiInterrupt> {
    if !console.dvd.disc_inside {
        console.dvd.error_code = ERROR_NO_DISK | ERROR_COVER_H;
        return Some(DiInterrupt::Deint);
    }

    if length > output_length {
        warn!(
            "Attempt to read 0x{:x} bytes from the disc into a 0x{:x} byte buffer, clamping",
            length, output_length
        );
        length = output_length;
    }

    let end = dvd_offset + u64::from(length);

    if end > console.dvd.disc_size {
        error!(
            "Disc read out of bounds: 0x{:x} - 0x{:x} (disc size 0x{:x})",
            dvd_offset, end, console.dvd.disc_size
        );
        console.dvd.error_code = ERROR_READY | ERROR_BLOCK_OOB;
        return Some(DiInterrupt::Deint);
    }

    let now = console.core_timing.get_ticks();
    let ticks_per_second = console.config.ticks_per_second();
    let fast_disc_speed = console.config.fast_disc_speed;

    let dvd = &mut console.dvd;

    let ticks = dvd.read_buffer.schedule_read(
        now,
        ticks_per_second,
        dvd.platform,
        fast_disc_speed,
        dvd_offset,
        u64::from(length),
    );

    let completion = dvd.finish_executing_command;

    thread::start_read(
        console,
        dvd_offset,
        output_address,
        length,
        false,
        completion,
        ticks,
    );

    None
}

/// Execute the command in DICMDBUF
fn execute_command(console: &mut Console) {
    let [command_0, command_1, command_2] = console.dvd.dicmdbuf;
    let output_address = console.dvd.dimar;
    let output_length = console.dvd.dilength;

    // RequestError needs the error code of the previous command
    if command_0 >> 24 != command::REQUEST_ERROR {
        console.dvd.error_code = ERROR_READY;
    }

    let mut interrupt = Some(DiInterrupt::Tcint);

    match command_0 >> 24 {
        command::INQUIRY => {
            // Drive identification, revision and date
            console.memory.write_u32(output_address, 0x0000_0002);
            console.memory.write_u32(output_address + 4, 0x2006_0526);
            console.memory.write_u32(output_address + 8, 0x4100_0000);

            info!(
                "DVD inquiry (buffer 0x{:08x}, 0x{:x})",
                output_address, output_length
            );
        }
        command::REPORT_KEY => {
            // Retail drives reject this, used by games to detect dev hardware
            info!("DVD report key");
            console.dvd.error_code = ERROR_READY | ERROR_INV_CMD;
            interrupt = Some(DiInterrupt::Brkint);
        }
        command::READ => match command_0 & 0xff {
            0x00 => {
                let dvd_offset = u64::from(command_1) << 2;

                debug!(
                    "DVD read: offset 0x{:09x} length 0x{:x} to 0x{:08x} (DMA length 0x{:x})",
                    dvd_offset, command_2, output_address, output_length
                );

                interrupt = execute_read_command(
                    console,
                    dvd_offset,
                    output_address,
                    command_2,
                    output_length,
                );
            }
            0x40 => {
                info!("DVD read disc ID to 0x{:08x}", output_address);

                interrupt = execute_read_command(console, 0, output_address, 0x20, output_length);
            }
            sub => error!("Unknown DVD read subcommand 0x{:02x}", sub),
        },
        command::SEEK => {
            debug!("DVD seek to 0x{:09x} (ignored)", u64::from(command_1) << 2);
        }
        command::REQUEST_ERROR => {
            let code = console.dvd.error_code;

            info!("DVD request error: 0x{:08x}", code);

            console.dvd.diimmbuf = code;
            console.dvd.error_code = ERROR_READY;
        }
        command::STOP_MOTOR => {
            info!(
                "DVD stop motor{}{}",
                if command_1 != 0 { " (eject)" } else { "" },
                if command_2 != 0 { " (kill)" } else { "" }
            );

            if command_1 != 0 && command_2 == 0 {
                set_disc(console, None);
            }
        }
        command::AUDIO_BUFFER_CONFIG => {
            warn!(
                "DVD audio streaming {} (not supported)",
                if (command_0 >> 16) & 0xff != 0 {
                    "enabled"
                } else {
                    "disabled"
                }
            );
        }
        command::SET_EXTENSION => info!("DVD set extension"),
        command::SET_STATUS => info!("DVD set status"),
        command::UNLOCK => {
            if command_0 == 0xff01_4d41 && command_1 == 0x5453_4849 && command_2 == 0x5441_0200 {
                info!("DVD unlock test 1 passed");
            } else if command_0 == 0xff00_4456
                && command_1 == 0x442d_4741
                && command_2 == 0x4d45_0300
            {
                info!("DVD unlock test 2 passed");
            } else {
                info!("DVD unlock test failed");
            }
        }
        _ => {
            error!(
                "Unknown DVD command 0x{:08x} (buffer 0x{:08x}, 0x{:x})",
                command_0, output_address, output_length
            );
            console.panic_alert(&format!(
                "Unknown DVD command {:08x} - fatal error",
                command_0
            ));
            console.dvd.error_code = ERROR_READY | ERROR_INV_CMD;
            interrupt = Some(DiInterrupt::Deint);
        }
    }

    if let Some(interrupt) = interrupt {
        // Arbitrary delay for commands that don't touch the disc
        let delay = console.config.ticks_per_second() / 15000;
        let event = console.dvd.finish_executing_command;

        console
            .core_timing
            .schedule_event(delay, event, interrupt as u64);
    }
}

fn finish_executing_command_callback(console: &mut Console, userdata: u64, _: i64) {
    match DiInterrupt::from_userdata(userdata) {
        Some(interrupt) => finish_executing_command(console, interrupt),
        None => error!("Invalid DI interrupt type {}", userdata),
    }
}

/// End of the current command
pub fn finish_executing_command(console: &mut Console, interrupt: DiInterrupt) {
    console.dvd.dicr &= !DICR_TSTART;
    console.dvd.dilength = 0;

    generate_interrupt(console, interrupt);
}

pub fn set_lid_open(console: &mut Console, open: bool) {
    if open {
        console.dvd.dicvr |= DICVR_CVR;
    } else {
        console.dvd.dicvr &= !DICVR_CVR;
    }

    generate_interrupt(console, DiInterrupt::Cvrint);
}

fn set_disc_inside(console: &mut Console, inside: bool) {
    if console.dvd.disc_inside != inside {
        set_lid_open(console, !inside);
    }

    console.dvd.disc_inside = inside;
}

/// Put `volume` in the drive (or empty it if `None`) once the DVD thread is idle. Returns the
/// previous disc.
pub fn set_disc(
    console: &mut Console,
    volume: Option<Box<dyn Volume>>,
) -> Option<Box<dyn Volume>> {
    let (size, platform) = match volume {
        Some(ref v) => (v.size(), v.platform()),
        None => (0, Platform::GameCube),
    };

    let inside = volume.is_some();

    let previous = console.dvd_thread.set_volume(volume);

    let dvd = &mut console.dvd;

    dvd.disc_size = size;
    dvd.platform = platform;
    dvd.read_buffer.reset();

    if inside {
        info!("Disc inserted ({:?}, 0x{:x} bytes)", platform, size);
    } else if previous.is_some() {
        info!("Disc ejected");
    }

    set_disc_inside(console, inside);

    previous
}

/// Swap discs the way a human would: the current disc is ejected right away and the new one is
/// inserted a while later.
pub fn change_disc(console: &mut Console, volume: Box<dyn Volume>) {
    console.dvd.pending_disc = Some(volume);

    let eject = console.dvd.eject_disc;
    let insert = console.dvd.insert_disc;

    console.core_timing.schedule_event(0, eject, 0);
    console
        .core_timing
        .schedule_event(DISC_CHANGE_DELAY, insert, 0);
}

fn eject_disc_callback(console: &mut Console, _: u64, _: i64) {
    set_disc(console, None);
}

fn insert_disc_callback(console: &mut Console, _: u64, _: i64) {
    match console.dvd.pending_disc.take() {
        Some(volume) => {
            set_disc(console, Some(volume));
        }
        None => error!("Disc insertion with no pending disc"),
    }
}

pub fn do_state(console: &mut Console, p: &mut PointerWrap) {
    console.dvd.do_state(p);

    thread::do_state(console, p);
}
