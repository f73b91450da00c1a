//! ktask: process and thread management core of a small i386 kernel.
//!
//! The crate owns the task control blocks, the pid pool, the ready queue
//! and all-tasks list, the round-robin scheduler, the thread lifecycle and
//! the process operations built on it (fork, exec, exit, wait, census).
//! The processor and the memory subsystem are reached through the
//! [`arch::Cpu`] and [`memory::MemoryManager`] traits.
//!
//! The library is `no_std`; under `cfg(test)` it links `std` and runs on a
//! simulated machine (see `test`).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod arch;
pub mod bitmap;
pub mod config;
pub mod console;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;


#[cfg(test)]
mod tests;

pub use config::BootConfig;
pub use process::{ForkError, WaitError};
pub use scheduler::{Kernel, Pid, SpawnError, TaskInfo, TaskStatus};
pub use syscall::{Syscall, SyscallError};
