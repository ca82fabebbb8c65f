use super::*;
use crate::config::ConsoleConfig;
use crate::console::dvd::volume::Platform;
use crate::console::irq::{self, Interrupt};
use crate::console::{core_timing, savestate};
use crate::error::Error;
use std::sync::Mutex;
use std::time::Duration;

const DISC_SIZE: u64 = 0x40_0000;

/// Where `read_done` keeps track of the completions
const DONE_COUNT: u32 = 0x8100_0000;
const DONE_USERDATA: u32 = 0x8100_0004;

fn pattern(seed: u8, offset: u64) -> u8 {
    (offset as u8) ^ ((offset >> 8) as u8).rotate_left(3) ^ seed
}

struct PatternVolume {
    seed: u8,
}

impl Volume for PatternVolume {
    fn read(&mut self, offset: u64, out: &mut [u8], _: bool) -> Result<()> {
        for (i, b) in out.iter_mut().enumerate() {
            *b = pattern(self.seed, offset + i as u64);
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        DISC_SIZE
    }

    fn platform(&self) -> Platform {
        Platform::GameCube
    }
}

struct FailingVolume;

impl Volume for FailingVolume {
    fn read(&mut self, offset: u64, out: &mut [u8], _: bool) -> Result<()> {
        // Scribble over the buffer, none of it must reach RAM
        for b in out.iter_mut() {
            *b = 0x55;
        }

        Err(Error::OutOfBounds {
            offset,
            len: out.len(),
            size: 0,
        })
    }

    fn size(&self) -> u64 {
        DISC_SIZE
    }

    fn platform(&self) -> Platform {
        Platform::GameCube
    }
}

/// Record of a single read performed by `SlowVolume`
struct SlowRead {
    len_before: usize,
    len_after: usize,
    start: Instant,
    end: Instant,
}

struct SlowVolume {
    delay: Duration,
    reads: Arc<Mutex<Vec<SlowRead>>>,
}

impl Volume for SlowVolume {
    fn read(&mut self, offset: u64, out: &mut [u8], _: bool) -> Result<()> {
        let start = Instant::now();
        let len_before = out.len();

        thread::sleep(self.delay);

        for (i, b) in out.iter_mut().enumerate() {
            *b = pattern(0, offset + i as u64);
        }

        self.reads.lock().unwrap().push(SlowRead {
            len_before,
            len_after: out.len(),
            start,
            end: Instant::now(),
        });

        Ok(())
    }

    fn size(&self) -> u64 {
        DISC_SIZE
    }

    fn platform(&self) -> Platform {
        Platform::GameCube
    }
}

fn read_done(console: &mut Console, userdata: u64, _: i64) {
    let count = console.memory.read_u32(DONE_COUNT);
    console.memory.write_u32(DONE_COUNT, count + 1);
    console.memory.write_u32(DONE_USERDATA, userdata as u32);
}

fn console_with(volume: Box<dyn Volume>) -> (Console, EventType) {
    let mut console = Console::new(ConsoleConfig::default()).unwrap();

    let ev = console.core_timing.register_event("ReadDone", read_done);

    console.insert_disc(volume);

    (console, ev)
}

fn ram(console: &Console, address: u32, len: usize) -> Vec<u8> {
    let mut v = vec![0; len];
    console.memory.copy_from_emu(address, &mut v);
    v
}

fn expected(seed: u8, offset: u64, len: usize) -> Vec<u8> {
    (0..len as u64).map(|i| pattern(seed, offset + i)).collect()
}

#[test]
fn read_round_trip() {
    let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 0 }));

    start_read(&mut console, 0x1234, 0x8000_2000, 0x300, false, ev, 1000);

    core_timing::advance(&mut console, 999);
    assert_eq!(console.memory.read_u32(DONE_COUNT), 0);
    assert_eq!(ram(&console, 0x8000_2000, 0x300), vec![0; 0x300]);

    core_timing::advance(&mut console, 1);
    assert_eq!(ram(&console, 0x8000_2000, 0x300), expected(0, 0x1234, 0x300));
    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(
        console.memory.read_u32(DONE_USERDATA),
        DiInterrupt::Tcint as u32
    );

    // The staging buffer doesn't outlive the request
    assert_eq!(console.dvd_thread.staging_len(), 0);

    assert!(!core_timing::advance_to_next_event(&mut console));
    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
}

#[test]
fn read_raises_di_interrupt_once() {
    let (mut console, _) = console_with(Box::new(PatternVolume { seed: 3 }));

    dvd::store(
        &mut console,
        dvd::DISR,
        dvd::DISR_TCINTMASK | dvd::DISR_DEINTMASK,
    );

    let edges = irq::edge_count(&console, Interrupt::Di);
    let completion = console.dvd.finish_executing_command_event();

    start_read(&mut console, 0x8000, 0x8000_0000, 0x40, false, completion, 500);

    while core_timing::advance_to_next_event(&mut console) {}

    assert!(irq::is_asserted(&console, Interrupt::Di));
    assert_eq!(irq::edge_count(&console, Interrupt::Di), edges + 1);
    assert_eq!(ram(&console, 0x8000_0000, 0x40), expected(3, 0x8000, 0x40));
}

#[test]
fn failed_read_leaves_ram_alone() {
    let (mut console, ev) = console_with(Box::new(FailingVolume));
    let alerts = console.record_alerts();

    let junk = vec![0xab; 0x100];
    console.memory.copy_to_emu(0x8000_3000, &junk);

    start_read(&mut console, 0x800, 0x8000_3000, 0x100, false, ev, 100);

    core_timing::advance(&mut console, 100);

    assert_eq!(ram(&console, 0x8000_3000, 0x100), junk);
    // The transfer completes, the failure is in the error code
    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(
        console.memory.read_u32(DONE_USERDATA),
        DiInterrupt::Tcint as u32
    );
    assert_eq!(console.dvd.error_code(), dvd::ERROR_READY | dvd::ERROR_BLOCK_OOB);
    assert_eq!(console.dvd_thread.staging_len(), 0);

    let alerts = alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0], "The disc could not be read (at 0x800 - 0x900).");
}

#[test]
fn failed_read_at_end_of_address_space() {
    let (mut console, ev) = console_with(Box::new(FailingVolume));
    let alerts = console.record_alerts();

    start_read(&mut console, u64::MAX - 0x10, 0x8000_0000, 0x20, false, ev, 10);
    core_timing::advance(&mut console, 10);

    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);

    let alerts = alerts.lock().unwrap();
    assert_eq!(
        alerts[0],
        "The disc could not be read (at 0xffffffffffffffef - 0xffffffffffffffff)."
    );
}

#[test]
fn very_long_emulated_delay() {
    let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 5 }));

    let delay = 20_000_000_000_000;

    start_read(&mut console, 0x100, 0x8000_0000, 0x20, false, ev, delay);
    core_timing::advance(&mut console, delay);

    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(ram(&console, 0x8000_0000, 0x20), expected(5, 0x100, 0x20));
}

#[test]
fn read_without_volume_fails() {
    let mut console = Console::new(ConsoleConfig::default()).unwrap();
    let ev = console.core_timing.register_event("ReadDone", read_done);
    let alerts = console.record_alerts();

    start_read(&mut console, 0, 0x8000_0000, 0x20, false, ev, 10);
    core_timing::advance(&mut console, 10);

    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(alerts.lock().unwrap().len(), 1);
}

#[test]
fn slow_storage_blocks_completion() {
    let reads = Arc::new(Mutex::new(Vec::new()));

    let (mut console, ev) = console_with(Box::new(SlowVolume {
        delay: Duration::from_millis(50),
        reads: reads.clone(),
    }));

    // Emulated delay much shorter than the real I/O
    start_read(&mut console, 0x4000, 0x8000_0000, 0x80, false, ev, 1);
    core_timing::advance(&mut console, 1);

    assert_eq!(ram(&console, 0x8000_0000, 0x80), expected(0, 0x4000, 0x80));
    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(reads.lock().unwrap().len(), 1);
}

#[test]
fn second_request_waits_for_the_first() {
    let reads = Arc::new(Mutex::new(Vec::new()));

    let (mut console, ev) = console_with(Box::new(SlowVolume {
        delay: Duration::from_millis(100),
        reads: reads.clone(),
    }));

    start_read(&mut console, 0x0, 0x8000_0000, 0x100, false, ev, 1000);
    start_read(&mut console, 0x8000, 0x8001_0000, 0x40, false, ev, 1000);
    let second_returned = Instant::now();

    {
        let reads = reads.lock().unwrap();

        // Only the first read can have finished when the second call returns
        assert!(!reads.is_empty());
        let first = &reads[0];
        assert_eq!(first.len_before, 0x100);
        assert_eq!(first.len_after, 0x100);
        assert!(second_returned >= first.end);
    }

    core_timing::advance(&mut console, 1000);

    let reads = reads.lock().unwrap();
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[1].len_before, 0x40);
    assert_eq!(reads[1].len_after, 0x40);
    assert!(reads[1].start >= reads[0].end);

    // The first request was superseded: only the second one is delivered
    assert_eq!(console.memory.read_u32(DONE_COUNT), 1);
    assert_eq!(ram(&console, 0x8001_0000, 0x40), expected(0, 0x8000, 0x40));
    assert_eq!(ram(&console, 0x8000_0000, 0x100), vec![0; 0x100]);
}

#[test]
fn back_to_back_reads_after_power_on() {
    for _ in 0..10 {
        let reads = Arc::new(Mutex::new(Vec::new()));

        let (mut console, ev) = console_with(Box::new(SlowVolume {
            delay: Duration::from_millis(5),
            reads: reads.clone(),
        }));

        start_read(&mut console, 0x0, 0x8000_0000, 0x80, false, ev, 100);
        start_read(&mut console, 0x800, 0x8000_1000, 0x20, false, ev, 100);

        // The first read must be over by the time the second call returns
        assert_eq!(reads.lock().unwrap().len(), 1);

        core_timing::advance(&mut console, 100);

        let reads = reads.lock().unwrap();
        assert_eq!(reads.len(), 2);

        for (read, len) in reads.iter().zip([0x80, 0x20].iter()) {
            assert_eq!(read.len_before, *len);
            assert_eq!(read.len_after, *len);
        }

        assert!(reads[1].start >= reads[0].end);
        assert_eq!(ram(&console, 0x8000_1000, 0x20), expected(0, 0x800, 0x20));
    }
}

#[test]
fn stop_with_read_submitted() {
    for _ in 0..20 {
        let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 7 }));
        let alerts = console.record_alerts();

        start_read(&mut console, 0x1000, 0x8000_0000, 0x100, false, ev, 50);
        console.dvd_thread.stop();

        core_timing::advance(&mut console, 50);

        // Either the read thread got to it before quitting or the read was cancelled, it's
        // never reported as a disc error
        assert!(alerts.lock().unwrap().is_empty());
        assert_eq!(console.dvd.error_code(), 0);

        match console.memory.read_u32(DONE_COUNT) {
            0 => assert_eq!(ram(&console, 0x8000_0000, 0x100), vec![0; 0x100]),
            1 => assert_eq!(
                ram(&console, 0x8000_0000, 0x100),
                expected(7, 0x1000, 0x100)
            ),
            n => panic!("{} completions", n),
        }
    }
}

#[test]
fn savestate_with_read_in_flight() {
    let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 9 }));

    start_read(&mut console, 0x2_0000, 0x8000_8000, 0x1000, false, ev, 5000);
    core_timing::advance(&mut console, 2000);

    let state = savestate::save(&mut console).unwrap();

    // Brand new console with the same disc
    let (mut restored, _) = console_with(Box::new(PatternVolume { seed: 9 }));
    savestate::load(&mut restored, &state).unwrap();

    assert_eq!(restored.core_timing.get_ticks(), 2000);
    assert_eq!(restored.dvd_thread.staging_len(), 0x1000);

    core_timing::advance(&mut console, 3000);
    core_timing::advance(&mut restored, 3000);

    let original = ram(&console, 0x8000_8000, 0x1000);

    assert_eq!(original, expected(9, 0x2_0000, 0x1000));
    assert_eq!(ram(&restored, 0x8000_8000, 0x1000), original);
    assert_eq!(restored.memory.read_u32(DONE_COUNT), 1);

    // Both consoles keep behaving the same afterwards
    start_read(&mut console, 0x3_0000, 0x8000_0000, 0x200, false, ev, 10);
    start_read(&mut restored, 0x3_0000, 0x8000_0000, 0x200, false, ev, 10);
    core_timing::advance(&mut console, 10);
    core_timing::advance(&mut restored, 10);

    assert_eq!(
        ram(&console, 0x8000_0000, 0x200),
        ram(&restored, 0x8000_0000, 0x200)
    );
    assert_eq!(restored.memory.read_u32(DONE_COUNT), 2);

    let state = savestate::save(&mut console).unwrap();
    savestate::verify(&mut restored, &state).unwrap();
}

#[test]
fn unknown_completion_event_invalidates_state() {
    let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 0 }));

    start_read(&mut console, 0, 0x8000_0000, 0x20, false, ev, 100);

    let mut buf = Vec::new();
    let mut w = PointerWrap::writer(&mut buf);
    do_state(&mut console, &mut w);
    w.finish().unwrap();

    // "ReadDone" isn't registered on this one
    let mut other = Console::new(ConsoleConfig::default()).unwrap();
    let mut r = PointerWrap::reader(&buf);
    do_state(&mut other, &mut r);
    assert!(r.finish().is_err());
}

#[test]
fn start_stop() {
    let mut core_timing = CoreTiming::new();
    let mut dvd_thread = DvdThread::new(&mut core_timing);

    assert!(!dvd_thread.is_running());

    dvd_thread.start(64 * 1024).unwrap();
    assert!(dvd_thread.is_running());
    dvd_thread.wait_until_idle();

    dvd_thread.stop();
    assert!(!dvd_thread.is_running());

    // Can be restarted, dropping stops it
    dvd_thread.start(64 * 1024).unwrap();
    assert!(dvd_thread.is_running());
}

#[test]
#[should_panic]
fn stop_without_start() {
    let mut core_timing = CoreTiming::new();
    let mut dvd_thread = DvdThread::new(&mut core_timing);

    dvd_thread.stop();
}

#[test]
fn power_off_with_read_pending() {
    for _ in 0..20 {
        let (mut console, ev) = console_with(Box::new(PatternVolume { seed: 1 }));

        start_read(&mut console, 0, 0x8000_0000, 0x800, false, ev, 1_000_000);
    }
}

#[test]
fn start_read_from_foreign_thread_panics() {
    let (console, ev) = console_with(Box::new(PatternVolume { seed: 0 }));

    let res = thread::spawn(move || {
        let mut console = console;
        start_read(&mut console, 0, 0x8000_0000, 0x20, false, ev, 1);
    })
    .join();

    assert!(res.is_err());
}

#[test]
fn independent_consoles() {
    let handles: Vec<_> = (0..4u8)
        .map(|seed| {
            thread::spawn(move || {
                let (mut console, ev) = console_with(Box::new(PatternVolume { seed }));

                for i in 0..16u64 {
                    let offset = i * 0x1_0000 + u64::from(seed);

                    start_read(&mut console, offset, 0x8000_0000, 0x400, false, ev, 100);
                    core_timing::advance(&mut console, 100);

                    assert_eq!(ram(&console, 0x8000_0000, 0x400), expected(seed, offset, 0x400));
                }

                console.memory.read_u32(DONE_COUNT)
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 16);
    }
}
