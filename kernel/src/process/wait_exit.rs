//! Exit and wait.
//!
//! An exiting process gives its children to init, frees its user memory,
//! wakes a waiting parent and parks itself HANGING. The parent's `wait`
//! collects the status and reclaims what is left.

use core::fmt;

use log::{info, warn};

use crate::arch::{Cpu, IntrGuard};
use crate::memory::{release_user_frames, MemoryManager};
use crate::scheduler::{Kernel, Pid, TaskRef, TaskStatus};

/// Wait errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The caller has no children.
    NoChildren,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::NoChildren => write!(f, "no children"),
        }
    }
}

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Terminate the running process with `status`.
    ///
    /// Never returns on hardware; the control block and page directory
    /// stay until the parent collects the status.
    ///
    /// # Panics
    ///
    /// If the running task has no parent, or the parent is gone.
    pub fn exit(&self, status: i32) {
        let _irq = IntrGuard::new(self.cpu());
        let current = self.current();
        let (pid, parent) = current.with(|t| {
            t.set_exit_status(status);
            (t.pid(), t.parent())
        });
        let Some(parent_pid) = parent else {
            panic!("task {} exited without a parent", pid);
        };

        self.adopt_orphans(pid);
        self.release_address_space(current);

        let Some(parent) = self.find(parent_pid) else {
            panic!("parent {} of task {} is gone", parent_pid, pid);
        };
        info!(target: "exit", "{} exited with status {}", pid, status);
        if parent.with(|t| t.status()) == TaskStatus::Waiting {
            self.unblock_task(parent);
        }
        self.block(TaskStatus::Hanging);
    }

    /// Hand every child of `pid` to init.
    fn adopt_orphans(&self, pid: Pid) {
        self.with_state(|s| {
            for task in s.registry.tasks() {
                task.with(|t| {
                    if t.parent() == Some(pid) {
                        t.set_parent(Some(Pid::INIT));
                    }
                });
            }
        });
    }

    /// Free user frames, page tables and the address pool of the running
    /// task. The directory page itself goes with `reclaim`.
    fn release_address_space(&self, task: TaskRef) {
        let (dir, pool) = task.with(|t| (t.page_dir(), t.take_vaddr()));
        self.with_memory(|mm| {
            if let Some(dir) = dir {
                release_user_frames(mm, dir);
            }
            if let Some(pool) = pool {
                // SAFETY: taken out of the task; no other copy survives.
                unsafe { pool.release(mm) };
            }
        });
    }

    /// Wait for a child to exit and collect it.
    ///
    /// Returns the child's pid and exit status, blocking WAITING while
    /// children exist but none has exited.
    pub fn wait(&self) -> Result<(Pid, i32), WaitError> {
        let _irq = IntrGuard::new(self.cpu());
        let parent = self.current_pid();
        loop {
            if let Some(child) = self.find_child(parent, |status| status == TaskStatus::Hanging) {
                let (pid, status) = child.with(|t| (t.pid(), t.exit_status()));
                self.reclaim(child);
                info!(target: "wait", "{} collected {} with status {}", parent, pid, status);
                return Ok((pid, status));
            }
            if self.find_child(parent, |_| true).is_none() {
                warn!(target: "wait", "{} has no children", parent);
                return Err(WaitError::NoChildren);
            }
            self.block(TaskStatus::Waiting);
        }
    }

    fn find_child(&self, parent: Pid, matches: impl Fn(TaskStatus) -> bool) -> Option<TaskRef> {
        self.with_state(|s| {
            s.registry
                .tasks()
                .find(|task| task.with(|t| t.parent() == Some(parent) && matches(t.status())))
        })
    }
}
