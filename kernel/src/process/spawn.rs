//! Process creation.

use log::{info, warn};

use crate::arch::{Cpu, IntrGuard};
use crate::config::{DEFAULT_PRIORITY, PAGE_SIZE, USER_STACK_TOP};
use crate::memory::{MemError, MemoryManager, VaddrPool};
use crate::scheduler::{IntrFrame, Kernel, Pid, SpawnError, SwitchContext, TaskRef};

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Create a user process entering user mode at `entry` with one stack
    /// page mapped just below the user stack top.
    ///
    /// Every process except init gets init as its parent.
    pub fn spawn_process(&self, name: &str, entry: usize) -> Result<Pid, SpawnError> {
        let task = self.alloc_task(name, DEFAULT_PRIORITY)?;
        if let Err(err) = self.build_user_space(task, entry) {
            self.discard(task);
            warn!(target: "proc", "cannot create process {}: {}", name, err);
            return Err(err.into());
        }

        let frame = task.frame_addr();
        let context = SwitchContext::for_interrupt_return(self.cpu().interrupt_exit(), frame);
        let pid = task.with(|t| {
            t.context = context;
            if t.pid() != Pid::INIT {
                t.set_parent(Some(Pid::INIT));
            }
            t.pid()
        });

        let _irq = IntrGuard::new(self.cpu());
        self.with_state(|s| s.registry.publish(task));
        info!(target: "proc", "created process {} ({}) at {:#x}", pid, name, entry);
        Ok(pid)
    }

    fn build_user_space(&self, task: TaskRef, entry: usize) -> Result<(), MemError> {
        let back = self.active_dir();
        let stack = USER_STACK_TOP - PAGE_SIZE;
        self.with_memory(|mm| {
            let pool = VaddrPool::allocate(mm)?;
            task.with(|t| t.set_vaddr(Some(pool)));
            let dir = mm.create_page_dir()?;
            task.with(|t| t.set_page_dir(Some(dir)));

            mm.activate(Some(dir));
            let mapped = mm.map_user_page(stack);
            mm.activate(back);
            mapped
        })?;
        task.with(|t| {
            if let Some(pool) = t.vaddr_mut() {
                pool.mark(stack);
            }
        });
        task.with_frame(|frame| *frame = IntrFrame::user_entry(entry, USER_STACK_TOP));
        Ok(())
    }

    /// Back the page holding `vaddr` in the running process with a fresh
    /// frame and mark it resident.
    ///
    /// # Panics
    ///
    /// If the running task is a kernel thread.
    pub fn alloc_user_page(&self, vaddr: usize) -> Result<(), MemError> {
        let _irq = IntrGuard::new(self.cpu());
        let current = self.current();
        let page = vaddr & !(PAGE_SIZE - 1);
        let Some(pool) = current.with(|t| t.vaddr()) else {
            panic!("user page requested by kernel thread {}", current.with(|t| t.pid()));
        };
        if !pool.covers(page) {
            return Err(MemError::OutOfRange);
        }
        if pool.contains(page) {
            return Err(MemError::AlreadyMapped);
        }
        self.with_memory(|mm| mm.map_user_page(page))?;
        current.with(|t| {
            if let Some(pool) = t.vaddr_mut() {
                pool.mark(page);
            }
        });
        Ok(())
    }
}
