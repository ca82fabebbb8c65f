//! Asynchronous disc reads.
//!
//! The actual I/O takes place in a dedicated thread so that slow storage doesn't stall the
//! emulation. The emulated drive charges the guest a delay computed by the timing model, the
//! data is copied to RAM when that delay expires and the read thread has finished.
//!
//! There's only ever one request in flight. The request is moved to the read thread over a
//! channel and comes back over another one once the read is done, so at any given time it
//! belongs to exactly one of the two threads.

#[cfg(test)]
mod tests;

use crate::common::chunk_file::PointerWrap;
use crate::common::flag::Flag;
use crate::common::waitable_flag::WaitableFlag;
use crate::console::core_timing::{CoreTiming, EventType};
use crate::console::dvd::volume::Volume;
use crate::console::dvd::{self, DiInterrupt, ERROR_BLOCK_OOB, ERROR_READY};
use crate::console::Console;
use crate::error::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A single disc read along with its result
struct ReadRequest {
    /// Offset of the data on the disc
    offset: u64,
    /// Target address in RAM
    output_address: u32,
    length: u32,
    decrypt: bool,
    /// Event to schedule once the data has been copied. `None` once the completion has been
    /// delivered.
    completion: Option<EventType>,
    /// Identifies the request, passed as userdata to the `FinishRead` event
    sequence: u64,
    /// Staging buffer filled by the read thread
    buffer: Vec<u8>,
    success: bool,
    /// Virtual date of the request
    start_ticks: u64,
    /// Host timestamps, for logging only. `end_wall` is set by the read thread once the read is
    /// over.
    start_wall: Option<Instant>,
    end_wall: Option<Instant>,
    /// Disc in the drive
    volume: Option<Box<dyn Volume>>,
}

impl ReadRequest {
    fn new() -> ReadRequest {
        ReadRequest {
            offset: 0,
            output_address: 0,
            length: 0,
            decrypt: false,
            completion: None,
            sequence: 0,
            buffer: Vec::new(),
            success: false,
            start_ticks: 0,
            start_wall: None,
            end_wall: None,
            volume: None,
        }
    }

    /// Run on the read thread
    fn perform(&mut self) {
        self.buffer.resize(self.length as usize, 0);

        self.success = match self.volume.as_mut() {
            Some(volume) => match volume.read(self.offset, &mut self.buffer, self.decrypt) {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        "Disc read of 0x{:x} bytes at 0x{:x} failed: {}",
                        self.length, self.offset, e
                    );
                    false
                }
            },
            None => {
                error!("Disc read with no disc in the drive");
                false
            }
        };

        self.end_wall = Some(Instant::now());
    }
}

/// State shared with the read thread
struct Signals {
    /// Set when the read thread must quit instead of starting a new read
    exiting: Flag,
    /// Cleared when a request is submitted, set by the read thread once it has sent it back
    done_working: WaitableFlag,
}

pub struct DvdThread {
    /// The request, when it's not with the read thread
    slot: Option<Box<ReadRequest>>,
    request_channel: Option<mpsc::SyncSender<Box<ReadRequest>>>,
    result_channel: Option<mpsc::Receiver<Box<ReadRequest>>>,
    signals: Arc<Signals>,
    worker: Option<thread::JoinHandle<()>>,
    /// Thread allowed to submit requests, set by `start`
    cpu_thread: Option<thread::ThreadId>,
    finish_read: EventType,
    next_sequence: u64,
}

impl DvdThread {
    pub fn new(core_timing: &mut CoreTiming) -> DvdThread {
        let signals = Signals {
            exiting: Flag::new(false),
            // Nothing in flight yet
            done_working: WaitableFlag::new(true),
        };

        DvdThread {
            slot: Some(Box::new(ReadRequest::new())),
            request_channel: None,
            result_channel: None,
            signals: Arc::new(signals),
            worker: None,
            cpu_thread: None,
            finish_read: core_timing.register_event("FinishRead", finish_read),
            next_sequence: 1,
        }
    }

    /// Spawn the read thread. Requests can then only be submitted from the calling thread.
    pub fn start(&mut self, stack_size: usize) -> Result<()> {
        assert!(self.worker.is_none(), "DVD thread started twice");

        // A single request is ever in flight so neither channel ever blocks on send
        let (request_sender, request_receiver) = mpsc::sync_channel(1);
        let (result_sender, result_receiver) = mpsc::sync_channel(1);

        let signals = self.signals.clone();

        let builder = thread::Builder::new()
            .name("DVD thread".to_string())
            .stack_size(stack_size);

        let worker =
            builder.spawn(move || run_worker(&signals, request_receiver, result_sender))?;

        self.worker = Some(worker);
        self.request_channel = Some(request_sender);
        self.result_channel = Some(result_receiver);
        self.cpu_thread = Some(thread::current().id());

        info!("DVD thread started");

        Ok(())
    }

    /// Ask the read thread to quit and wait for it. A read in progress is completed first, a
    /// request the thread hasn't picked up yet is cancelled.
    pub fn stop(&mut self) {
        let worker = match self.worker.take() {
            Some(w) => w,
            None => panic!("DVD thread stopped without being started"),
        };

        self.signals.exiting.set(true);
        // Wakes the thread up if it's waiting for a request
        self.request_channel = None;

        if worker.join().is_err() {
            error!("DVD thread panicked");
        }

        if self.reclaim() {
            let request = self.request();

            if request.completion.is_some() && request.end_wall.is_none() {
                warn!("DVD read #{} cancelled by shutdown", request.sequence);
                request.completion = None;
            }
        }

        self.result_channel = None;
        self.signals.exiting.clear();
        self.signals.done_working.set(true);

        self.cpu_thread = None;

        info!("DVD thread stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Block until the read thread is done with the current request
    pub fn wait_until_idle(&self) {
        while !self
            .signals
            .done_working
            .wait_for(true, Duration::from_millis(100))
        {
            let alive = match self.worker {
                Some(ref w) => !w.is_finished(),
                None => false,
            };

            if !alive {
                error!("DVD thread is gone, not waiting for it");
                break;
            }
        }
    }

    /// Get the request back from the read thread if it has it. Returns true if the request was
    /// in flight.
    fn reclaim(&mut self) -> bool {
        if self.slot.is_some() {
            return false;
        }

        let request = match self.result_channel.as_ref().map(|c| c.recv()) {
            Some(Ok(request)) => request,
            _ => {
                error!("DVD thread lost the request in flight");
                Box::new(ReadRequest::new())
            }
        };

        self.slot = Some(request);

        true
    }

    /// Wait for the read thread to be done with the request and return it
    fn request(&mut self) -> &mut ReadRequest {
        self.reclaim();

        self.slot.get_or_insert_with(|| Box::new(ReadRequest::new()))
    }

    /// Hand the request over to the read thread
    fn submit(&mut self) {
        let request = match self.slot.take() {
            Some(r) => r,
            None => return,
        };

        self.signals.done_working.reset();

        let rejected = match self.request_channel {
            Some(ref c) => c.send(request).err().map(|e| e.0),
            None => Some(request),
        };

        if let Some(request) = rejected {
            error!(
                "DVD thread isn't running, read #{} won't be performed",
                request.sequence
            );
            self.slot = Some(request);
            self.signals.done_working.set(true);
        }
    }

    /// Replace the disc in the drive once any pending read is over
    pub fn set_volume(&mut self, volume: Option<Box<dyn Volume>>) -> Option<Box<dyn Volume>> {
        std::mem::replace(&mut self.request().volume, volume)
    }

    pub fn volume_mut(&mut self) -> Option<&mut (dyn Volume + 'static)> {
        self.request().volume.as_deref_mut()
    }

    /// Length of the staging buffer. It's always empty once a completion has been delivered.
    pub fn staging_len(&mut self) -> usize {
        self.request().buffer.len()
    }
}

impl ::std::ops::Drop for DvdThread {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

fn run_worker(
    signals: &Signals,
    requests: mpsc::Receiver<Box<ReadRequest>>,
    results: mpsc::SyncSender<Box<ReadRequest>>,
) {
    // Ends when the emulation thread drops its end of the channel
    for mut request in requests.iter() {
        if signals.exiting.is_set() {
            // Send it back untouched
            let _ = results.send(request);
            return;
        }

        request.perform();

        if results.send(request).is_err() {
            return;
        }

        signals.done_working.set(true);
    }
}

/// Read `length` bytes at `dvd_offset` into RAM at `output_address`. The copy takes place
/// `ticks_until_completion` ticks from now, at which point `completion` is scheduled immediately
/// with a `DiInterrupt` as userdata.
///
/// If the previous request is still being processed this blocks until it's done. A request
/// whose completion hasn't been delivered yet is superseded.
pub fn start_read(
    console: &mut Console,
    dvd_offset: u64,
    output_address: u32,
    length: u32,
    decrypt: bool,
    completion: EventType,
    ticks_until_completion: u64,
) {
    let now = console.core_timing.get_ticks();
    let dvd_thread = &mut console.dvd_thread;

    assert!(
        dvd_thread.cpu_thread == Some(thread::current().id()),
        "DVD read submitted from the wrong thread"
    );

    let sequence = dvd_thread.next_sequence;
    dvd_thread.next_sequence = sequence.wrapping_add(1);

    let request = dvd_thread.request();

    if request.completion.is_some() {
        warn!(
            "DVD read #{} submitted before read #{} completed",
            sequence, request.sequence
        );
    }

    request.offset = dvd_offset;
    request.output_address = output_address;
    request.length = length;
    request.decrypt = decrypt;
    request.completion = Some(completion);
    request.sequence = sequence;
    request.success = false;
    request.start_ticks = now;
    request.start_wall = Some(Instant::now());
    request.end_wall = None;

    dvd_thread.submit();

    let finish_read = dvd_thread.finish_read;

    console
        .core_timing
        .schedule_event(ticks_until_completion, finish_read, sequence);
}

/// `FinishRead` event callback, `userdata` is the sequence number of the request
fn finish_read(console: &mut Console, sequence: u64, _: i64) {
    let now = console.core_timing.get_ticks();
    let ticks_per_second = console.config.ticks_per_second();

    let request = console.dvd_thread.request();

    if request.sequence != sequence {
        error!(
            "Dropping completion of superseded DVD read #{} (current #{})",
            sequence, request.sequence
        );
        return;
    }

    let completion = match request.completion.take() {
        Some(c) => c,
        None => {
            warn!("DVD read #{} has no completion pending", sequence);
            return;
        }
    };

    if request.success {
        console
            .memory
            .copy_to_emu(request.output_address, &request.buffer);
    }

    request.buffer = Vec::new();

    let emulated_us = u128::from(now.saturating_sub(request.start_ticks)) * 1_000_000
        / u128::from(ticks_per_second);

    match (request.start_wall, request.end_wall) {
        (Some(start), Some(end)) => debug!(
            "Disc read of 0x{:x} bytes at 0x{:x}: emulated {}us, real {}us",
            request.length,
            request.offset,
            emulated_us,
            end.duration_since(start).as_micros()
        ),
        _ => debug!(
            "Disc read of 0x{:x} bytes at 0x{:x}: emulated {}us",
            request.length, request.offset, emulated_us
        ),
    }

    let start = request.offset;
    let end = start.saturating_add(u64::from(request.length));

    if !request.success {
        console.panic_alert(&format!(
            "The disc could not be read (at 0x{:x} - 0x{:x}).",
            start, end
        ));
        // The guest finds out about the failure through the error code, the transfer still
        // completes
        dvd::set_error_code(console, ERROR_READY | ERROR_BLOCK_OOB);
    }

    console
        .core_timing
        .schedule_event(0, completion, DiInterrupt::Tcint as u64);
}

/// Save or restore the in-flight request. Any read in progress is completed first so the
/// snapshot always contains a finished request.
pub fn do_state(console: &mut Console, p: &mut PointerWrap) {
    let core_timing = &console.core_timing;
    let dvd_thread = &mut console.dvd_thread;

    p.wrap(&mut dvd_thread.next_sequence);

    let request = dvd_thread.request();

    p.wrap(&mut request.offset);
    p.wrap(&mut request.output_address);
    p.wrap(&mut request.length);
    p.wrap(&mut request.decrypt);
    p.wrap(&mut request.sequence);
    p.do_vec(&mut request.buffer);
    p.wrap(&mut request.success);
    p.wrap(&mut request.start_ticks);

    let mut has_completion = request.completion.is_some();
    let mut name = match request.completion {
        Some(e) => core_timing.event_name(e).as_bytes().to_vec(),
        None => Vec::new(),
    };

    p.wrap(&mut has_completion);

    if has_completion {
        p.do_vec(&mut name);
    }

    if p.is_reading() && p.is_ok() {
        request.start_wall = None;
        request.end_wall = None;

        request.completion = if has_completion {
            let event = String::from_utf8(name)
                .ok()
                .and_then(|name| core_timing.find_event(&name));

            if event.is_none() {
                p.set_error("unknown DVD read completion event".to_string());
            }

            event
        } else {
            None
        };
    }
}
