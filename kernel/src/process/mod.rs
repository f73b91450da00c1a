//! User processes.
//!
//! A process is a task with a page directory and a virtual-address pool.
//! This module creates them, forks them, replaces their image and
//! coordinates exit with the parent's wait.

mod exec;
mod fork;
mod spawn;
mod wait_exit;

pub use fork::ForkError;
pub use wait_exit::WaitError;

use crate::arch::Cpu;
use crate::memory::{release_user_frames, MemoryManager};
use crate::scheduler::{Kernel, TaskRef};

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Tear down a task that was never published: its user frames, page
    /// directory, address pool, control block and pid.
    pub(crate) fn discard(&self, task: TaskRef) {
        let (pid, dir, pool) = task.with(|t| (t.pid(), t.take_page_dir(), t.take_vaddr()));
        let back = self.active_dir();
        self.with_memory(|mm| {
            if let Some(dir) = dir {
                mm.activate(Some(dir));
                release_user_frames(mm, dir);
                mm.activate(back);
                // SAFETY: the directory belongs to the unpublished task.
                unsafe { mm.free_kernel_pages(dir.as_ptr(), 1) };
            }
            if let Some(pool) = pool {
                // SAFETY: the pool is owned by the task, nobody else has a copy.
                unsafe { pool.release(mm) };
            }
            // SAFETY: nothing refers to the page.
            unsafe { mm.free_kernel_pages(task.page().cast(), 1) };
        });
        self.pids().release(pid);
    }
}
