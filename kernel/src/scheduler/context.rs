//! Saved execution context of a task.
//!
//! [`SwitchContext`] is the only record the context switch reads and writes.
//! Fresh contexts are built by its constructors, never by poking offsets
//! into a stack. [`IntrFrame`] is the register image the interrupt entry
//! path pushes at the top of a control-block page.

use crate::config::{EFLAGS_USER, SELECTOR_U_CODE, SELECTOR_U_DATA};

/// Kernel thread body.
pub type ThreadFn = extern "C" fn(usize);

/// How a task continues when it is next switched to.
#[derive(Debug, Clone, Copy)]
pub enum Resume {
    /// First run of a kernel thread: enable interrupts, call `function(arg)`.
    Thread { function: ThreadFn, arg: usize },
    /// Return to user mode through the interrupt frame at `esp`.
    InterruptReturn,
    /// Continue after the switch that suspended the task.
    Suspended,
}

/// Minimal CPU context for context switching.
///
/// Only callee-saved registers are kept; the calling convention handles the
/// rest. `esp` is meaningful only while the task is off the CPU.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SwitchContext {
    pub ebp: usize,
    pub ebx: usize,
    pub edi: usize,
    pub esi: usize,
    /// Where the switch jumps to.
    pub eip: usize,
    /// Saved kernel stack pointer.
    pub esp: usize,
    pub resume: Resume,
}

impl SwitchContext {
    /// Context of the task that is already running (the boot thread).
    pub const fn running() -> Self {
        SwitchContext {
            ebp: 0,
            ebx: 0,
            edi: 0,
            esi: 0,
            eip: 0,
            esp: 0,
            resume: Resume::Suspended,
        }
    }

    /// Context that starts a kernel thread.
    ///
    /// The switch lands on `trampoline` with the stack at `stack_top`; the
    /// trampoline finds `function` in `ebx` and `arg` in `esi`.
    pub fn for_thread(trampoline: usize, stack_top: usize, function: ThreadFn, arg: usize) -> Self {
        SwitchContext {
            ebp: 0,
            ebx: function as usize,
            edi: 0,
            esi: arg,
            eip: trampoline,
            esp: stack_top,
            resume: Resume::Thread { function, arg },
        }
    }

    /// Context that leaves for user mode through `interrupt_exit` with the
    /// stack at the interrupt frame `frame`.
    pub fn for_interrupt_return(interrupt_exit: usize, frame: usize) -> Self {
        SwitchContext {
            ebp: 0,
            ebx: 0,
            edi: 0,
            esi: 0,
            eip: interrupt_exit,
            esp: frame,
            resume: Resume::InterruptReturn,
        }
    }
}

/// Registers pushed on entry from an interrupt or system call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct IntrFrame {
    pub vec_no: usize,
    pub edi: usize,
    pub esi: usize,
    pub ebp: usize,
    /// Ignored by `popad`.
    pub esp_dummy: usize,
    pub ebx: usize,
    pub edx: usize,
    pub ecx: usize,
    /// System-call return value.
    pub eax: usize,
    pub gs: usize,
    pub fs: usize,
    pub es: usize,
    pub ds: usize,
    pub err_code: usize,
    pub eip: usize,
    pub cs: usize,
    pub eflags: usize,
    /// User stack pointer.
    pub esp: usize,
    pub ss: usize,
}

impl IntrFrame {
    /// Frame that enters user mode at `entry` with the stack at `stack_top`.
    pub fn user_entry(entry: usize, stack_top: usize) -> Self {
        IntrFrame {
            ds: SELECTOR_U_DATA,
            es: SELECTOR_U_DATA,
            fs: SELECTOR_U_DATA,
            cs: SELECTOR_U_CODE,
            ss: SELECTOR_U_DATA,
            eflags: EFLAGS_USER,
            eip: entry,
            esp: stack_top,
            ..IntrFrame::default()
        }
    }

    pub fn syscall_return(&self) -> usize {
        self.eax
    }

    pub fn set_syscall_return(&mut self, value: usize) {
        self.eax = value;
    }
}
