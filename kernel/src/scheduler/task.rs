//! Task definition.
//!
//! Threads and user processes share one control block. A control block
//! occupies the bottom of a page-aligned page; the interrupt frame sits at
//! the top and the kernel stack grows down between them toward
//! `stack_magic`.

use core::fmt;
use core::mem::size_of;
use core::ptr::{self, addr_of_mut, NonNull};

use static_assertions::const_assert_eq;

use super::context::{IntrFrame, SwitchContext};
use crate::config::{FORK_NAME_LIMIT, FORK_SUFFIX, INIT_PID, PAGE_SIZE, STACK_MAGIC, TASK_NAME_LEN};
use crate::memory::{PageDir, VaddrPool};

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The init process.
    pub const INIT: Pid = Pid(INIT_PID);

    pub const fn new(raw: u32) -> Self {
        Pid(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// On the CPU.
    Running = 0,
    /// In the ready queue.
    Ready,
    /// Blocked on some event.
    Blocked,
    /// A parent blocked in `wait`.
    Waiting,
    /// Exited, waiting to be collected.
    Hanging,
    /// Reclaimed.
    Died,
}

impl TaskStatus {
    /// Whether `block` accepts this status.
    pub fn is_blocking(self) -> bool {
        matches!(self, TaskStatus::Blocked | TaskStatus::Waiting | TaskStatus::Hanging)
    }

    /// Census name.
    pub fn name(self) -> &'static str {
        match self {
            TaskStatus::Running => "RUNNING",
            TaskStatus::Ready => "READY",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Hanging => "HANGING",
            TaskStatus::Died => "DIED",
        }
    }
}

/// Fixed-length, NUL-terminated task name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TaskName([u8; TASK_NAME_LEN]);

impl TaskName {
    /// Copy `name`, truncated to fit with its terminator.
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(TASK_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; TASK_NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        TaskName(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(TASK_NAME_LEN)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.0[..self.len()]).unwrap_or("?")
    }

    /// Name of a forked child.
    ///
    /// # Panics
    ///
    /// If the base name is too long to take the suffix.
    pub fn forked(&self) -> Self {
        let len = self.len();
        assert!(
            len < FORK_NAME_LIMIT,
            "name {:?} too long to fork",
            self.as_str()
        );
        let mut bytes = self.0;
        bytes[len..len + FORK_SUFFIX.len()].copy_from_slice(FORK_SUFFIX.as_bytes());
        TaskName(bytes)
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub status: TaskStatus,
    pub priority: u8,
    pub ticks: u8,
    pub elapsed_ticks: u32,
    pub name: TaskName,
    /// Owns a user address space.
    pub is_process: bool,
}

/// A task control block.
#[repr(C)]
pub struct Task {
    /// Saved context; only valid while the task is off the CPU.
    pub(crate) context: SwitchContext,
    pid: Pid,
    /// `None` only for the init process and kernel threads.
    parent: Option<Pid>,
    status: TaskStatus,
    name: TaskName,
    priority: u8,
    /// Quantum left.
    ticks: u8,
    elapsed_ticks: u32,
    /// User page directory; `None` for kernel threads.
    page_dir: Option<PageDir>,
    /// User virtual-address pool; `None` for kernel threads.
    vaddr: Option<VaddrPool>,
    exit_status: i32,
    stack_magic: u32,
}

impl Task {
    pub(crate) fn new(pid: Pid, name: &str, priority: u8, status: TaskStatus) -> Self {
        Task {
            context: SwitchContext::running(),
            pid,
            parent: None,
            status,
            name: TaskName::new(name),
            priority,
            ticks: priority,
            elapsed_ticks: 0,
            page_dir: None,
            vaddr: None,
            exit_status: 0,
            stack_magic: STACK_MAGIC,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<Pid>) {
        self.parent = parent;
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = TaskName::new(name);
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn ticks(&self) -> u8 {
        self.ticks
    }

    pub fn set_ticks(&mut self, ticks: u8) {
        self.ticks = ticks;
    }

    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks
    }

    /// Account one timer tick. Returns true when the quantum is used up.
    pub fn tick(&mut self) -> bool {
        self.elapsed_ticks = self.elapsed_ticks.wrapping_add(1);
        if self.ticks == 0 {
            true
        } else {
            self.ticks -= 1;
            false
        }
    }

    pub fn page_dir(&self) -> Option<PageDir> {
        self.page_dir
    }

    pub fn set_page_dir(&mut self, dir: Option<PageDir>) {
        self.page_dir = dir;
    }

    pub fn take_page_dir(&mut self) -> Option<PageDir> {
        self.page_dir.take()
    }

    pub fn vaddr(&self) -> Option<VaddrPool> {
        self.vaddr
    }

    pub fn vaddr_mut(&mut self) -> Option<&mut VaddrPool> {
        self.vaddr.as_mut()
    }

    pub fn set_vaddr(&mut self, pool: Option<VaddrPool>) {
        self.vaddr = pool;
    }

    pub fn take_vaddr(&mut self) -> Option<VaddrPool> {
        self.vaddr.take()
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn set_exit_status(&mut self, status: i32) {
        self.exit_status = status;
    }

    /// Whether the stack guard is untouched.
    pub fn stack_intact(&self) -> bool {
        self.stack_magic == STACK_MAGIC
    }

    #[cfg(test)]
    pub(crate) fn clobber_stack_magic(&mut self) {
        self.stack_magic = 0;
    }

    /// Turn a byte copy of the parent's block into the child's.
    ///
    /// `vaddr` is the child's own copy of the address pool; the page
    /// directory is attached later.
    pub(crate) fn become_child(&mut self, pid: Pid, parent: Pid, vaddr: Option<VaddrPool>) {
        self.name = self.name.forked();
        self.pid = pid;
        self.parent = Some(parent);
        self.elapsed_ticks = 0;
        self.status = TaskStatus::Ready;
        self.ticks = self.priority;
        self.page_dir = None;
        self.vaddr = vaddr;
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            pid: self.pid,
            parent: self.parent,
            status: self.status,
            priority: self.priority,
            ticks: self.ticks,
            elapsed_ticks: self.elapsed_ticks,
            name: self.name,
            is_process: self.page_dir.is_some(),
        }
    }
}

/// Bytes of kernel stack between a control block and its interrupt frame.
pub const KERNEL_STACK_BYTES: usize = PAGE_SIZE - size_of::<Task>() - size_of::<IntrFrame>();

/// One control-block page.
#[repr(C, align(4096))]
pub struct TaskPage {
    pub task: Task,
    #[allow(dead_code)]
    stack: [u8; KERNEL_STACK_BYTES],
    pub intr: IntrFrame,
}

const_assert_eq!(size_of::<TaskPage>(), PAGE_SIZE);

/// Handle to a control-block page owned by the task registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRef(NonNull<TaskPage>);

// SAFETY: pages are only touched with interrupts masked on the one CPU.
unsafe impl Send for TaskRef {}

impl TaskRef {
    /// # Safety
    ///
    /// `page` must point to a live control-block page.
    pub(crate) unsafe fn from_page(page: NonNull<TaskPage>) -> Self {
        TaskRef(page)
    }

    /// Write a fresh control block into `page` and leave the rest of the
    /// page alone (the boot thread is running on it).
    ///
    /// # Safety
    ///
    /// `page` must be one writable, page-aligned page.
    pub(crate) unsafe fn init_block(page: NonNull<TaskPage>, task: Task) -> Self {
        // SAFETY: caller contract.
        unsafe { ptr::write(addr_of_mut!((*page.as_ptr()).task), task) };
        TaskRef(page)
    }

    /// Write a fresh control block and an empty interrupt frame into `page`.
    ///
    /// # Safety
    ///
    /// `page` must be one writable, page-aligned page.
    pub(crate) unsafe fn init_page(page: NonNull<TaskPage>, task: Task) -> Self {
        // SAFETY: caller contract.
        unsafe { ptr::write(addr_of_mut!((*page.as_ptr()).intr), IntrFrame::default()) };
        // SAFETY: caller contract.
        unsafe { Self::init_block(page, task) }
    }

    pub fn page(self) -> NonNull<TaskPage> {
        self.0
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Run `f` on the control block.
    ///
    /// The registry keeps every handed-out page live, and no block is
    /// borrowed across a context switch.
    pub(crate) fn with<R>(self, f: impl FnOnce(&mut Task) -> R) -> R {
        // SAFETY: see above; callers never nest `with` on the same task.
        f(unsafe { &mut (*self.0.as_ptr()).task })
    }

    /// Run `f` on the interrupt frame at the top of the page.
    pub(crate) fn with_frame<R>(self, f: impl FnOnce(&mut IntrFrame) -> R) -> R {
        // SAFETY: as for `with`.
        f(unsafe { &mut (*self.0.as_ptr()).intr })
    }

    pub(crate) fn context_ptr(self) -> *mut SwitchContext {
        // SAFETY: in-bounds field projection of a live page.
        unsafe { addr_of_mut!((*self.0.as_ptr()).task.context) }
    }

    pub(crate) fn frame_ptr(self) -> *mut IntrFrame {
        // SAFETY: in-bounds field projection of a live page.
        unsafe { addr_of_mut!((*self.0.as_ptr()).intr) }
    }

    /// Address of the interrupt frame; a fresh kernel stack starts below it.
    pub fn frame_addr(self) -> usize {
        self.frame_ptr() as usize
    }

    /// One past the end of the page.
    pub fn page_top(self) -> usize {
        self.addr() + PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn frame_sits_at_page_top() {
        assert_eq!(offset_of!(TaskPage, task), 0);
        assert_eq!(
            offset_of!(TaskPage, intr) + size_of::<IntrFrame>(),
            PAGE_SIZE
        );
    }

    #[test]
    fn fork_suffix() {
        let name = TaskName::new("init");
        assert_eq!(name.forked().as_str(), "init_fork");
        assert_eq!(name.forked().forked().as_str(), "init_fork_fork");
    }

    #[test]
    #[should_panic(expected = "too long to fork")]
    fn fork_suffix_overflow() {
        TaskName::new("init_fork_f").forked();
    }

    #[test]
    fn names_truncate_to_field() {
        let name = TaskName::new("a_very_long_task_name");
        assert_eq!(name.len(), TASK_NAME_LEN - 1);
        assert_eq!(name.as_str(), "a_very_long_tas");
    }

    #[test]
    fn quantum_counts_down_then_expires() {
        let mut task = Task::new(Pid::new(9), "t", 2, TaskStatus::Running);
        assert!(!task.tick());
        assert!(!task.tick());
        assert!(task.tick());
        assert_eq!(task.elapsed_ticks(), 3);
        assert!(task.stack_intact());
    }

    #[test]
    fn blocking_statuses() {
        assert!(TaskStatus::Blocked.is_blocking());
        assert!(TaskStatus::Waiting.is_blocking());
        assert!(TaskStatus::Hanging.is_blocking());
        assert!(!TaskStatus::Ready.is_blocking());
        assert!(!TaskStatus::Died.is_blocking());
    }
}
