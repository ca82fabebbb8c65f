//! Virtual time keeper and event scheduler.
//!
//! Modules register named events once at power-on and can then schedule them to fire a given
//! number of CPU ticks in the future. Time only moves forward when the emulation loop calls
//! `advance`.

use super::Console;
use crate::common::chunk_file::PointerWrap;
use fnv::FnvHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Signature of event callbacks: `callback(console, userdata, cycles_late)`
pub type EventCallback = fn(&mut Console, u64, i64);

/// Handle to a registered event
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventType(usize);

struct EventSlot {
    name: String,
    callback: EventCallback,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ScheduledEvent {
    /// Absolute date of the event
    time: u64,
    /// Insertion order, used to fire simultaneous events in the order they were scheduled
    fifo: u64,
    event: EventType,
    userdata: u64,
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, we want the earliest event on top
        (other.time, other.fifo).cmp(&(self.time, self.fifo))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct CoreTiming {
    /// Number of ticks elapsed since power-on
    ticks: u64,
    events: Vec<EventSlot>,
    by_name: FnvHashMap<String, EventType>,
    queue: BinaryHeap<ScheduledEvent>,
    next_fifo: u64,
}

impl CoreTiming {
    pub fn new() -> CoreTiming {
        CoreTiming {
            ticks: 0,
            events: Vec::new(),
            by_name: FnvHashMap::default(),
            queue: BinaryHeap::new(),
            next_fifo: 0,
        }
    }

    /// Register a new event type. Event names must be unique since they're used to identify
    /// pending events in savestates.
    pub fn register_event(&mut self, name: &str, callback: EventCallback) -> EventType {
        if self.by_name.contains_key(name) {
            panic!("CoreTiming event '{}' registered twice", name);
        }

        let ev = EventType(self.events.len());

        self.events.push(EventSlot {
            name: name.to_string(),
            callback,
        });
        self.by_name.insert(name.to_string(), ev);

        ev
    }

    pub fn event_name(&self, event: EventType) -> &str {
        &self.events[event.0].name
    }

    pub fn find_event(&self, name: &str) -> Option<EventType> {
        self.by_name.get(name).cloned()
    }

    /// Schedule `event` to fire `cycles_into_future` ticks from now
    pub fn schedule_event(&mut self, cycles_into_future: u64, event: EventType, userdata: u64) {
        debug_assert!(event.0 < self.events.len());

        let fifo = self.next_fifo;
        self.next_fifo += 1;

        self.queue.push(ScheduledEvent {
            time: self.ticks + cycles_into_future,
            fifo,
            event,
            userdata,
        });
    }

    /// Remove all pending instances of `event`
    pub fn remove_event(&mut self, event: EventType) {
        self.queue.retain(|e| e.event != event);
    }

    pub fn is_scheduled(&self, event: EventType) -> bool {
        self.queue.iter().any(|e| e.event == event)
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Current virtual time
    pub fn get_ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of ticks until the next pending event, if any
    pub fn ticks_to_next_event(&self) -> Option<u64> {
        self.queue.peek().map(|e| e.time - self.ticks)
    }

    fn pop_due(&mut self, target: u64) -> Option<ScheduledEvent> {
        match self.queue.peek() {
            Some(e) if e.time <= target => self.queue.pop(),
            _ => None,
        }
    }

    pub fn do_state(&mut self, p: &mut PointerWrap) {
        p.wrap(&mut self.ticks);
        p.wrap(&mut self.next_fifo);

        let mut pending: Vec<ScheduledEvent> = self.queue.iter().cloned().collect();
        pending.sort_by_key(|e| (e.time, e.fifo));

        let mut count = pending.len() as u32;
        p.wrap(&mut count);

        if p.is_reading() {
            if !p.is_ok() {
                return;
            }

            let mut queue = BinaryHeap::new();

            for _ in 0..count {
                let mut time = 0u64;
                let mut fifo = 0u64;
                let mut userdata = 0u64;
                let mut name = Vec::new();

                p.wrap(&mut time);
                p.wrap(&mut fifo);
                p.wrap(&mut userdata);
                p.do_vec(&mut name);

                if !p.is_ok() {
                    return;
                }

                let event = String::from_utf8(name)
                    .ok()
                    .and_then(|name| self.find_event(&name));

                match event {
                    Some(event) => queue.push(ScheduledEvent {
                        time,
                        fifo,
                        event,
                        userdata,
                    }),
                    None => {
                        p.set_error("unknown CoreTiming event in savestate".to_string());
                        return;
                    }
                }
            }

            self.queue = queue;
        } else {
            for e in pending.iter_mut() {
                let mut name = self.events[e.event.0].name.clone().into_bytes();

                p.wrap(&mut e.time);
                p.wrap(&mut e.fifo);
                p.wrap(&mut e.userdata);
                p.do_vec(&mut name);
            }
        }
    }
}

/// Move virtual time forward by `cycles` ticks, running all the events that become due on the
/// way. While a callback runs the tick counter is set to the event's deadline.
pub fn advance(console: &mut Console, cycles: u64) {
    let target = console.core_timing.ticks + cycles;

    while let Some(e) = console.core_timing.pop_due(target) {
        let timing = &mut console.core_timing;

        if e.time > timing.ticks {
            timing.ticks = e.time;
        }

        let cycles_late = (timing.ticks - e.time) as i64;
        let callback = timing.events[e.event.0].callback;

        callback(console, e.userdata, cycles_late);
    }

    console.core_timing.ticks = target;
}

/// Jump straight to the next pending event and run it (along with any other event due at the
/// same date). Returns `false` if nothing was scheduled.
pub fn advance_to_next_event(console: &mut Console) -> bool {
    match console.core_timing.ticks_to_next_event() {
        Some(delta) => {
            advance(console, delta);
            true
        }
        None => false,
    }
}
