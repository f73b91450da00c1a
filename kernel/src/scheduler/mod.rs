//! Kernel scheduler module.
//!
//! [`Kernel`] owns the task registries, the pid pool, the processor and the
//! memory collaborator. This module implements scheduling and the task
//! lifecycle (start, block, unblock, yield, timer tick, thread exit); the
//! process operations live in [`crate::process`].
//!
//! Registry and status changes happen with interrupts masked. No borrow of
//! the registries or of a control block is held across a context switch.

pub mod context;
pub mod pid;
pub mod registry;
pub mod task;

use alloc::vec::Vec;
use core::fmt;
use core::ptr::NonNull;

use log::{debug, info};

pub use context::{IntrFrame, Resume, SwitchContext, ThreadFn};
pub use pid::PidPool;
pub use registry::TaskRegistry;
pub use task::{Pid, Task, TaskInfo, TaskName, TaskPage, TaskRef, TaskStatus};

use crate::arch::{Cpu, IntrGuard};
use crate::config::{BootConfig, IDLE_PRIORITY, MAIN_PRIORITY};
use crate::memory::{MemError, MemoryManager, PageDir};
use crate::sync::IrqCell;

/// Task creation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No page for the control block, address pool or page directory.
    OutOfMemory,
}

impl From<MemError> for SpawnError {
    fn from(_: MemError) -> Self {
        SpawnError::OutOfMemory
    }
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// A task that exited on its own stack. Whoever finishes the next switch
/// frees it.
#[derive(Debug, Clone, Copy)]
struct Retired {
    task: TaskRef,
    pid: Pid,
    free_page: bool,
}

/// Scheduler state guarded by interrupt masking.
pub(crate) struct SchedState {
    pub(crate) registry: TaskRegistry,
    current: Option<TaskRef>,
    /// The boot thread; its page belongs to the boot code.
    main: Option<TaskRef>,
    idle: Option<TaskRef>,
    retired: Option<Retired>,
    total_ticks: u64,
}

impl SchedState {
    const fn new() -> Self {
        SchedState {
            registry: TaskRegistry::new(),
            current: None,
            main: None,
            idle: None,
            retired: None,
            total_ticks: 0,
        }
    }

    /// Put a blocked task at the front of the ready queue.
    /// Returns false if it was already READY.
    fn wake(&mut self, task: TaskRef) -> bool {
        let status = task.with(|t| t.status());
        if status == TaskStatus::Ready {
            return false;
        }
        assert!(
            status.is_blocking(),
            "unblock of task {} in status {}",
            task.with(|t| t.pid()),
            status.name()
        );
        self.registry.enqueue_front(task);
        task.with(|t| t.set_status(TaskStatus::Ready));
        true
    }
}

/// The process core.
pub struct Kernel<M, C> {
    cpu: C,
    memory: IrqCell<M>,
    pids: PidPool,
    state: IrqCell<SchedState>,
    config: BootConfig,
}

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    pub fn new(memory: M, cpu: C, config: BootConfig) -> Self {
        Kernel {
            cpu,
            memory: IrqCell::new(memory),
            pids: PidPool::new(),
            state: IrqCell::new(SchedState::new()),
            config,
        }
    }

    /// Create the init process (pid 1), adopt the boot thread as `main`
    /// and start the idle thread.
    ///
    /// # Safety
    ///
    /// `boot_page` must be the page-aligned page the calling thread runs
    /// on. Its bottom is overwritten with a control block and it is never
    /// freed.
    pub unsafe fn init(&'static self, boot_page: NonNull<TaskPage>) -> Result<(), SpawnError>
    where
        M: 'static,
        C: 'static,
    {
        assert!(
            self.state.with(|s| s.current.is_none()),
            "process core initialized twice"
        );
        let init = self.spawn_process("init", self.config.init_entry)?;

        let pid = self.pids.allocate();
        let main = Task::new(pid, "main", MAIN_PRIORITY, TaskStatus::Running);
        // SAFETY: caller contract.
        let main = unsafe { TaskRef::init_block(boot_page, main) };
        self.state.with(|s| {
            s.registry.register(main);
            s.current = Some(main);
            s.main = Some(main);
        });

        let arg = self as *const Self as usize;
        let idle = self.create_thread("idle", IDLE_PRIORITY, idle_main::<M, C>, arg)?;
        self.state.with(|s| {
            s.registry.publish(idle);
            s.idle = Some(idle);
        });

        info!(
            target: "sched",
            "process core up: init {}, main {}, idle {}",
            init,
            pid,
            idle.with(|t| t.pid())
        );
        Ok(())
    }

    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    /// Run `f` on the memory collaborator.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        self.memory.with(f)
    }

    pub fn pids(&self) -> &PidPool {
        &self.pids
    }

    pub(crate) fn current(&self) -> TaskRef {
        let Some(current) = self.state.with(|s| s.current) else {
            panic!("process core not initialized");
        };
        current
    }

    /// Pid of the running task.
    pub fn current_pid(&self) -> Pid {
        self.current().with(|t| t.pid())
    }

    /// Look up a live task.
    pub(crate) fn find(&self, pid: Pid) -> Option<TaskRef> {
        self.state
            .with(|s| s.registry.tasks().find(|task| task.with(|t| t.pid() == pid)))
    }

    pub fn task_info(&self, pid: Pid) -> Option<TaskInfo> {
        self.find(pid).map(|task| task.with(|t| t.info()))
    }

    /// Snapshot of every live task, oldest first.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.state
            .with(|s| s.registry.tasks().map(|task| task.with(|t| t.info())).collect())
    }

    /// Pids in the ready queue, next to run first.
    pub fn ready_pids(&self) -> Vec<Pid> {
        self.state
            .with(|s| s.registry.ready().map(|task| task.with(|t| t.pid())).collect())
    }

    /// Timer ticks seen since boot.
    pub fn total_ticks(&self) -> u64 {
        self.state.with(|s| s.total_ticks)
    }

    /// Page directory of the running task, if it is a process.
    pub(crate) fn active_dir(&self) -> Option<PageDir> {
        self.state
            .with(|s| s.current)
            .and_then(|task| task.with(|t| t.page_dir()))
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut SchedState) -> R) -> R {
        self.state.with(f)
    }

    /// Fresh READY control block with a new pid. Not yet published.
    pub(crate) fn alloc_task(&self, name: &str, priority: u8) -> Result<TaskRef, SpawnError> {
        let page = self.memory.with(|mm| mm.alloc_kernel_pages(1))?;
        let pid = self.pids.allocate();
        let task = Task::new(pid, name, priority, TaskStatus::Ready);
        // SAFETY: a fresh kernel page.
        Ok(unsafe { TaskRef::init_page(page.cast(), task) })
    }

    pub(crate) fn create_thread(
        &self,
        name: &str,
        priority: u8,
        function: ThreadFn,
        arg: usize,
    ) -> Result<TaskRef, SpawnError> {
        let task = self.alloc_task(name, priority)?;
        let context =
            SwitchContext::for_thread(self.cpu.thread_entry(), task.frame_addr(), function, arg);
        task.with(|t| t.context = context);
        Ok(task)
    }

    /// Start a kernel thread running `function(arg)`.
    pub fn start(
        &self,
        name: &str,
        priority: u8,
        function: ThreadFn,
        arg: usize,
    ) -> Result<Pid, SpawnError> {
        let task = self.create_thread(name, priority, function, arg)?;
        let pid = task.with(|t| t.pid());
        let _irq = IntrGuard::new(&self.cpu);
        self.state.with(|s| s.registry.publish(task));
        debug!(target: "sched", "started thread {} ({}) priority {}", pid, name, priority);
        Ok(pid)
    }

    /// Switch to the next ready task.
    ///
    /// A RUNNING caller goes to the tail of the ready queue with a fresh
    /// quantum; a caller that just blocked stays out of it. The idle thread
    /// is woken if nothing else is ready.
    pub fn schedule(&self) {
        assert!(
            !self.cpu.interrupts_enabled(),
            "schedule with interrupts enabled"
        );
        let (prev, next) = self.state.with(|s| {
            let Some(prev) = s.current else {
                panic!("schedule before init");
            };
            let requeue = prev.with(|t| {
                if t.status() == TaskStatus::Running {
                    t.set_ticks(t.priority());
                    t.set_status(TaskStatus::Ready);
                    true
                } else {
                    false
                }
            });
            if requeue {
                s.registry.enqueue(prev);
            }
            if s.registry.ready_len() == 0 {
                let Some(idle) = s.idle else {
                    panic!("nothing to run and no idle thread");
                };
                s.wake(idle);
            }
            let Some(next) = s.registry.dequeue() else {
                panic!("ready queue empty after waking idle");
            };
            next.with(|t| t.set_status(TaskStatus::Running));
            s.current = Some(next);
            (prev, next)
        });
        if prev == next {
            return;
        }

        self.activate(next);
        #[cfg(feature = "trace-switches")]
        log::trace!(
            target: "sched",
            "switch {} -> {}",
            prev.with(|t| t.pid()),
            next.with(|t| t.pid())
        );
        // SAFETY: both pages are live, nothing borrows them, interrupts are off.
        unsafe {
            (*prev.context_ptr()).resume = Resume::Suspended;
            self.cpu.switch_to(prev.context_ptr(), next.context_ptr());
        }
        self.finish_switch();
    }

    /// Load the address space of `task`.
    fn activate(&self, task: TaskRef) {
        let dir = task.with(|t| t.page_dir());
        self.memory.with(|mm| mm.activate(dir));
        if dir.is_some() {
            self.cpu.set_kernel_stack(task.page_top());
        }
    }

    /// Free a task that retired on its own stack, once we are off it.
    fn finish_switch(&self) {
        let retired = self.state.with(|s| {
            let done = matches!(s.retired, Some(r) if s.current != Some(r.task));
            if done {
                s.retired.take()
            } else {
                None
            }
        });
        if let Some(r) = retired {
            self.release_task(r.task, r.pid, r.free_page);
        }
    }

    /// Block the running task with `status` until someone unblocks it.
    ///
    /// # Panics
    ///
    /// If `status` is not BLOCKED, WAITING or HANGING.
    pub fn block(&self, status: TaskStatus) {
        assert!(status.is_blocking(), "block with status {}", status.name());
        let _irq = IntrGuard::new(&self.cpu);
        let current = self.current();
        let pid = current.with(|t| {
            t.set_status(status);
            t.pid()
        });
        debug!(target: "sched", "{} blocked ({})", pid, status.name());
        self.schedule();
    }

    /// Move a blocked task to the front of the ready queue.
    ///
    /// Returns false if no such task is live.
    pub fn unblock(&self, pid: Pid) -> bool {
        match self.find(pid) {
            Some(task) => {
                self.unblock_task(task);
                true
            }
            None => false,
        }
    }

    pub(crate) fn unblock_task(&self, task: TaskRef) {
        let _irq = IntrGuard::new(&self.cpu);
        if self.state.with(|s| s.wake(task)) {
            debug!(target: "sched", "{} unblocked", task.with(|t| t.pid()));
        }
    }

    /// Give up the CPU, staying ready.
    pub fn yield_now(&self) {
        let _irq = IntrGuard::new(&self.cpu);
        let current = self.current();
        self.state.with(|s| s.registry.enqueue(current));
        current.with(|t| t.set_status(TaskStatus::Ready));
        self.schedule();
    }

    /// Timer interrupt hook: account the tick and preempt on quantum expiry.
    pub fn on_timer_tick(&self) {
        let _irq = IntrGuard::new(&self.cpu);
        let current = self.current();
        let expired = current.with(|t| {
            assert!(
                t.stack_intact(),
                "kernel stack overflow in task {} ({})",
                t.pid(),
                t.name()
            );
            t.tick()
        });
        self.state.with(|s| s.total_ticks += 1);
        if expired {
            self.schedule();
        }
    }

    /// End the running kernel thread.
    ///
    /// Never returns on hardware.
    pub fn exit_thread(&self) {
        let _irq = IntrGuard::new(&self.cpu);
        let current = self.current();
        self.reclaim(current);
        self.schedule();
    }

    /// Retire `task` for good: DIED, out of both registries, page directory
    /// freed, then its control block and pid. The main thread's page is
    /// never freed.
    pub(crate) fn reclaim(&self, task: TaskRef) {
        let (pid, dir) = task.with(|t| {
            t.set_status(TaskStatus::Died);
            (t.pid(), t.take_page_dir())
        });
        let (running, free_page) = self.state.with(|s| {
            s.registry.remove_ready(task);
            s.registry.unregister(task);
            (s.current == Some(task), s.main != Some(task))
        });
        if let Some(dir) = dir {
            // SAFETY: the directory page belongs to the dead task.
            self.memory.with(|mm| unsafe { mm.free_kernel_pages(dir.as_ptr(), 1) });
        }
        if running {
            let stale = self.state.with(|s| {
                s.retired.replace(Retired {
                    task,
                    pid,
                    free_page,
                })
            });
            if let Some(r) = stale {
                self.release_task(r.task, r.pid, r.free_page);
            }
        } else {
            self.release_task(task, pid, free_page);
        }
        debug!(target: "sched", "reclaimed {}", pid);
    }

    fn release_task(&self, task: TaskRef, pid: Pid, free_page: bool) {
        if free_page {
            // SAFETY: the task left both registries and is off the CPU.
            self.memory
                .with(|mm| unsafe { mm.free_kernel_pages(task.page().cast(), 1) });
        }
        self.pids.release(pid);
    }
}

/// Body of the idle thread.
extern "C" fn idle_main<M: MemoryManager, C: Cpu>(arg: usize) {
    // SAFETY: `init` passes the address of a `&'static Kernel`.
    let kernel = unsafe { &*(arg as *const Kernel<M, C>) };
    loop {
        kernel.block(TaskStatus::Blocked);
        kernel.cpu.enable_interrupts();
        kernel.cpu.halt();
    }
}
