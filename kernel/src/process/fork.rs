//! Process duplication.
//!
//! The child gets a byte copy of the parent's control-block page, its own
//! pid and address pool, a fresh page directory and a private copy of every
//! resident user page. It resumes in user mode at the parent's interrupt
//! frame with a system-call result of 0.

use core::fmt;
use core::ptr::{self, NonNull};
use core::slice;

use log::{info, warn};

use crate::arch::Cpu;
use crate::config::PAGE_SIZE;
use crate::memory::{MemError, MemoryManager, PageDir, VaddrPool};
use crate::scheduler::{Kernel, Pid, SwitchContext, TaskPage, TaskRef};

/// Fork errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    /// A page for the child's control block, pool, directory, page tables
    /// or user pages could not be allocated.
    OutOfMemory,
}

impl From<MemError> for ForkError {
    fn from(_: MemError) -> Self {
        ForkError::OutOfMemory
    }
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Duplicate the running process. Returns the child's pid to the
    /// parent; the child sees 0.
    ///
    /// Must be called with interrupts disabled. On failure everything
    /// allocated for the child is released.
    ///
    /// # Panics
    ///
    /// If the running task is a kernel thread, or its name is too long to
    /// take the fork suffix.
    pub fn fork(&self) -> Result<Pid, ForkError> {
        assert!(
            !self.cpu().interrupts_enabled(),
            "fork with interrupts enabled"
        );
        let parent = self.current();
        let (parent_pid, parent_dir) = parent.with(|t| (t.pid(), t.page_dir()));
        let Some(parent_dir) = parent_dir else {
            panic!("fork from kernel thread {}", parent_pid);
        };

        let child = self.copy_control_block(parent, parent_pid)?;
        if let Err(err) = self.copy_address_space(child, parent_dir) {
            self.discard(child);
            warn!(target: "fork", "fork of {} failed: {}", parent_pid, err);
            return Err(err);
        }

        let context = SwitchContext::for_interrupt_return(self.cpu().interrupt_exit(), child.frame_addr());
        child.with(|t| t.context = context);
        child.with_frame(|frame| frame.set_syscall_return(0));

        let pid = child.with(|t| t.pid());
        self.with_state(|s| s.registry.publish(child));
        info!(target: "fork", "{} forked {}", parent_pid, pid);
        Ok(pid)
    }

    fn copy_control_block(&self, parent: TaskRef, parent_pid: Pid) -> Result<TaskRef, ForkError> {
        let page: NonNull<TaskPage> = self.with_memory(|mm| mm.alloc_kernel_pages(1))?.cast();
        // SAFETY: two distinct live pages; nothing borrows the parent's.
        unsafe { ptr::copy_nonoverlapping(parent.page().as_ptr(), page.as_ptr(), 1) };
        // SAFETY: fully initialized by the copy.
        let child = unsafe { TaskRef::from_page(page) };

        // The copy still refers to the parent's address space.
        let shared = child.with(|t| {
            t.set_page_dir(None);
            t.take_vaddr()
        });
        let own = match shared.map(|pool| self.with_memory(|mm| pool.duplicate(mm))).transpose() {
            Ok(own) => own,
            Err(err) => {
                // SAFETY: the page was never handed out.
                self.with_memory(|mm| unsafe { mm.free_kernel_pages(page.cast(), 1) });
                return Err(err.into());
            }
        };

        let pid = self.pids().allocate();
        child.with(|t| t.become_child(pid, parent_pid, own));
        Ok(child)
    }

    fn copy_address_space(&self, child: TaskRef, parent_dir: PageDir) -> Result<(), ForkError> {
        let dir = self.with_memory(|mm| mm.create_page_dir())?;
        child.with(|t| t.set_page_dir(Some(dir)));
        let Some(pool) = child.with(|t| t.vaddr()) else {
            return Ok(());
        };
        self.with_memory(|mm| {
            let buffer = mm.alloc_kernel_pages(1)?;
            let copied = copy_resident_pages(mm, &pool, buffer, parent_dir, dir);
            // SAFETY: the transit buffer is ours and no longer borrowed.
            unsafe { mm.free_kernel_pages(buffer, 1) };
            copied
        })?;
        Ok(())
    }
}

/// Copy every page marked in `pool` from `parent` into freshly mapped
/// frames of `child`, through a kernel transit buffer. `parent` is active
/// on entry and on return.
fn copy_resident_pages<M: MemoryManager + ?Sized>(
    mm: &mut M,
    pool: &VaddrPool,
    buffer: NonNull<u8>,
    parent: PageDir,
    child: PageDir,
) -> Result<(), MemError> {
    // SAFETY: one kernel page owned by the caller for this call.
    let transit = unsafe { slice::from_raw_parts_mut(buffer.as_ptr(), PAGE_SIZE) };
    for vaddr in pool.pages() {
        mm.read_user(vaddr, transit)?;
        mm.activate(Some(child));
        let copied = mm
            .map_user_page(vaddr)
            .and_then(|()| mm.write_user(vaddr, transit));
        mm.activate(Some(parent));
        copied?;
    }
    Ok(())
}
