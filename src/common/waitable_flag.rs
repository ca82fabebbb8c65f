//! A `Flag` another thread can block on until it reaches a given value.

use super::flag::Flag;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub struct WaitableFlag {
    flag: Flag,
    /// Doesn't protect any data, it's only there to order `set` against waiters that already
    /// tested the flag but haven't started sleeping on `cond` yet.
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitableFlag {
    pub const fn new(initial_value: bool) -> WaitableFlag {
        WaitableFlag {
            flag: Flag::new(initial_value),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<()> {
        // There's nothing in there that could be left in an inconsistent state
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, val: bool) {
        if self.flag.test_and_set(val) {
            // Taking the lock makes sure that any waiter is either already blocked on `cond` (and
            // will get the notification) or hasn't tested the flag yet (and will see the new
            // value).
            drop(self.lock());
            self.cond.notify_all();
        }
    }

    pub fn reset(&self) {
        self.set(false)
    }

    pub fn is_set(&self) -> bool {
        self.flag.is_set()
    }

    /// Block until the flag holds `expected`
    pub fn wait(&self, expected: bool) {
        if self.flag.is_set() == expected {
            return;
        }

        let guard = self.lock();

        let _guard = self
            .cond
            .wait_while(guard, |_| self.flag.is_set() != expected)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the flag holds `expected` or `timeout` elapses. Returns `true` if the flag
    /// reached the expected value.
    pub fn wait_for(&self, expected: bool, timeout: Duration) -> bool {
        if self.flag.is_set() == expected {
            return true;
        }

        let guard = self.lock();

        let (_guard, res) = self
            .cond
            .wait_timeout_while(guard, timeout, |_| self.flag.is_set() != expected)
            .unwrap_or_else(PoisonError::into_inner);

        !res.timed_out() || self.flag.is_set() == expected
    }
}

impl Default for WaitableFlag {
    fn default() -> WaitableFlag {
        WaitableFlag::new(false)
    }
}
