//! Pid allocation.
//!
//! A bitmap over a bounded pid range behind a spin lock. The lock is taken
//! even though most callers already run with interrupts masked, since pids
//! are also released from paths that run with interrupts enabled.

use spin::Mutex;

use super::task::Pid;
use crate::bitmap::Bitmap;
use crate::config::{PID_BITMAP_BYTES, PID_START};

pub struct PidPool {
    bits: Mutex<Bitmap<[u8; PID_BITMAP_BYTES]>>,
    start: u32,
}

impl PidPool {
    pub const fn new() -> Self {
        PidPool {
            bits: Mutex::new(Bitmap::new([0; PID_BITMAP_BYTES])),
            start: PID_START,
        }
    }

    /// Lowest free pid.
    ///
    /// # Panics
    ///
    /// If every pid is in use; the pool is sized for the task limit.
    pub fn allocate(&self) -> Pid {
        let mut bits = self.bits.lock();
        let Some(index) = bits.scan(1) else {
            panic!("pid pool exhausted");
        };
        bits.set(index, true);
        Pid::new(index as u32 + self.start)
    }

    /// Return `pid` to the pool.
    pub fn release(&self, pid: Pid) {
        let index = (pid.as_u32() - self.start) as usize;
        let mut bits = self.bits.lock();
        assert!(bits.test(index), "pid {} released twice", pid);
        bits.set(index, false);
    }

    pub fn in_use(&self) -> usize {
        self.bits.lock().count_set()
    }

    /// Largest number of pids the pool can hold.
    pub fn capacity(&self) -> usize {
        PID_BITMAP_BYTES * 8
    }
}

impl Default for PidPool {
    fn default() -> Self {
        Self::new()
    }
}
