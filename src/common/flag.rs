//! Atomic boolean used to signal conditions between threads.
//!
//! All accesses use `SeqCst`: the flags are used to hand ownership of data between threads so
//! we're not interested in shaving off a few cycles with weaker orderings.

use std::sync::atomic::{AtomicBool, Ordering};

pub struct Flag {
    val: AtomicBool,
}

impl Flag {
    pub const fn new(initial_value: bool) -> Flag {
        Flag {
            val: AtomicBool::new(initial_value),
        }
    }

    pub fn set(&self, val: bool) {
        self.val.store(val, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.set(false)
    }

    pub fn is_set(&self) -> bool {
        self.val.load(Ordering::SeqCst)
    }

    /// Set the flag to `val` if it currently holds `!val`. Returns `true` if this call performed
    /// the transition, `false` if the flag already held `val`.
    pub fn test_and_set(&self, val: bool) -> bool {
        self.val
            .compare_exchange(!val, val, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn test_and_clear(&self) -> bool {
        self.test_and_set(false)
    }
}

impl Default for Flag {
    fn default() -> Flag {
        Flag::new(false)
    }
}
