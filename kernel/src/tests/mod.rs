//! Kernel Scenario Tests
//!
//! End-to-end runs of the process core on the simulated machine.

mod process_tests;

use crate::scheduler::{Pid, TaskStatus};
use crate::test::{boot, SimKernel};

pub(crate) const MAIN: Pid = Pid::new(2);
pub(crate) const IDLE: Pid = Pid::new(3);

/// Boot, then park init and idle: main runs alone with an empty ready
/// queue.
pub(crate) fn quiet_boot() -> &'static SimKernel {
    let k = boot();
    k.yield_now(); // main -> init
    k.block(TaskStatus::Blocked); // init -> idle
    k.block(TaskStatus::Blocked); // idle -> main
    assert_eq!(k.current_pid(), MAIN);
    assert!(k.ready_pids().is_empty());
    k
}

/// Boot with init running alone and main parked.
pub(crate) fn init_running() -> &'static SimKernel {
    let k = quiet_boot();
    assert!(k.unblock(Pid::INIT));
    k.block(TaskStatus::Blocked); // main -> init
    assert_eq!(k.current_pid(), Pid::INIT);
    k
}

/// Yield until `pid` is on the CPU.
pub(crate) fn run_until(k: &SimKernel, pid: Pid) {
    for _ in 0..64 {
        if k.current_pid() == pid {
            return;
        }
        k.yield_now();
    }
    panic!("{} never got the CPU", pid);
}
