//! Kernel configuration constants.
//!
//! This module contains compile-time configuration for the process core.
//! Values here fix the control-block layout, the pid range and the user
//! address-space geometry of an i386 two-level paging kernel.

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Guard value kept at the edge of every control block.
///
/// The kernel stack grows down toward it; a changed value means the stack
/// ran into the control fields.
pub const STACK_MAGIC: u32 = 0x1987_0916;

/// Bytes of pid bitmap (one bit per pid, 1024 pids).
pub const PID_BITMAP_BYTES: usize = 128;

/// First pid handed out by the pool.
pub const PID_START: u32 = 1;

/// Pid of the init process. Orphans are adopted by it.
pub const INIT_PID: u32 = 1;

/// Length of a task name, terminating NUL included.
pub const TASK_NAME_LEN: usize = 16;

/// Suffix appended to the name of a forked child.
pub const FORK_SUFFIX: &str = "_fork";

/// A name must be shorter than this to take [`FORK_SUFFIX`].
pub const FORK_NAME_LIMIT: usize = 11;

/// Lowest user virtual address.
pub const USER_VADDR_START: usize = 0x0804_8000;

/// Top of the user address range; the user stack starts here.
pub const USER_STACK_TOP: usize = 0xC000_0000;

/// Page-directory entries covering user space. The rest map the kernel.
pub const USER_PDE_COUNT: usize = 768;

/// Entries per page table.
pub const PTE_PER_TABLE: usize = 1024;

/// Pages in the user address range.
pub const USER_PAGES: usize = (USER_STACK_TOP - USER_VADDR_START) / PAGE_SIZE;

/// Bytes of a user virtual-address bitmap.
pub const VADDR_BITMAP_BYTES: usize = USER_PAGES / 8;

/// Kernel pages backing one user virtual-address bitmap.
pub const VADDR_BITMAP_PAGES: usize = VADDR_BITMAP_BYTES.div_ceil(PAGE_SIZE);

/// Priority (and quantum) of user processes.
pub const DEFAULT_PRIORITY: u8 = 31;

/// Priority of the boot thread.
pub const MAIN_PRIORITY: u8 = 31;

/// Priority of the idle thread.
pub const IDLE_PRIORITY: u8 = 10;

/// User code segment selector (GDT index 5, RPL 3).
pub const SELECTOR_U_CODE: usize = (5 << 3) | 3;

/// User data segment selector (GDT index 6, RPL 3).
pub const SELECTOR_U_DATA: usize = (6 << 3) | 3;

/// EFLAGS on first entry to user mode: reserved bit 1 and IF.
pub const EFLAGS_USER: usize = (1 << 1) | (1 << 9);

/// Width of a census column.
pub const CENSUS_COLUMN: usize = 15;

/// Most `argv` entries `exec` will count.
pub const MAX_EXEC_ARGS: usize = 16;

/// Runtime configuration handed over by the boot code.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// User entry point of the init process.
    pub init_entry: usize,
    /// User-mode trampoline `exec` resumes at. It calls the entry staged in
    /// `edx` with `argc`/`argv` from `ecx`/`ebx`, then exits.
    pub exec_trampoline: usize,
}
