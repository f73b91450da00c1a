//! Synchronization for state shared between tasks and interrupt handlers.
//!
//! The process core runs on one CPU and serializes access to its registries
//! by masking interrupts. [`IrqCell`] is the container for such state: access
//! is scoped to a closure, so no borrow can survive into a context switch.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

pub struct IrqCell<T> {
    busy: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: one CPU, and every access happens inside `with` with interrupts
// masked; `busy` catches re-entry.
unsafe impl<T: Send> Sync for IrqCell<T> {}

impl<T> IrqCell<T> {
    pub const fn new(value: T) -> Self {
        IrqCell {
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// # Panics
    ///
    /// On re-entry from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        assert!(
            !self.busy.swap(true, Ordering::Acquire),
            "re-entrant access to interrupt-masked state"
        );
        // SAFETY: `busy` guarantees this is the only live reference.
        let result = f(unsafe { &mut *self.value.get() });
        self.busy.store(false, Ordering::Release);
        result
    }
}
