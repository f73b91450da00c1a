//! i686 protected-mode primitives.

use core::arch::{asm, naked_asm};

use super::Cpu;
use crate::scheduler::context::{IntrFrame, SwitchContext};

extern "C" {
    /// Interrupt-return path of the interrupt subsystem. Expects `esp` at an
    /// [`IntrFrame`], pops it and `iretd`s.
    fn intr_exit();

    /// Set `esp0` of the task-state segment.
    fn update_tss_esp(top: usize);
}

/// The boot processor.
pub struct I686;

impl Cpu for I686 {
    fn interrupts_enabled(&self) -> bool {
        let eflags: usize;
        // SAFETY: reads EFLAGS through the stack only.
        unsafe { asm!("pushfd", "pop {}", out(reg) eflags, options(preserves_flags)) };
        eflags & (1 << 9) != 0
    }

    fn disable_interrupts(&self) {
        // SAFETY: cli has no memory effects.
        unsafe { asm!("cli", options(nomem, nostack)) };
    }

    fn enable_interrupts(&self) {
        // SAFETY: sti has no memory effects.
        unsafe { asm!("sti", options(nomem, nostack)) };
    }

    fn halt(&self) {
        // SAFETY: hlt waits for the next interrupt.
        unsafe { asm!("hlt", options(nomem, nostack)) };
    }

    unsafe fn switch_to(&self, prev: *mut SwitchContext, next: *mut SwitchContext) {
        // SAFETY: forwarded caller contract.
        unsafe { switch_context(prev, next) };
    }

    unsafe fn interrupt_return(&self, frame: *mut IntrFrame) {
        // SAFETY: the frame is the top of the running task's kernel stack.
        unsafe {
            asm!(
                "mov esp, {frame}",
                "jmp {exit}",
                frame = in(reg) frame,
                exit = sym intr_exit,
                options(noreturn),
            )
        }
    }

    fn set_kernel_stack(&self, top: usize) {
        // SAFETY: the TSS is set up by the boot code before any task runs.
        unsafe { update_tss_esp(top) };
    }

    fn thread_entry(&self) -> usize {
        thread_trampoline as *const () as usize
    }

    fn interrupt_exit(&self) -> usize {
        intr_exit as *const () as usize
    }
}

/// Save callee-saved registers, `eip` and `esp` into `prev`, load `next`.
///
/// Layout must match [`SwitchContext`]: ebp, ebx, edi, esi, eip, esp.
#[unsafe(naked)]
unsafe extern "C" fn switch_context(_prev: *mut SwitchContext, _next: *mut SwitchContext) {
    naked_asm!(
        "mov eax, [esp + 4]",
        "mov edx, [esp + 8]",
        // Save current context
        "mov [eax + 0x00], ebp",
        "mov [eax + 0x04], ebx",
        "mov [eax + 0x08], edi",
        "mov [eax + 0x0c], esi",
        // Resume at our return address with the return already popped
        "mov ecx, [esp]",
        "mov [eax + 0x10], ecx",
        "lea ecx, [esp + 4]",
        "mov [eax + 0x14], ecx",
        // Restore next context
        "mov ebp, [edx + 0x00]",
        "mov ebx, [edx + 0x04]",
        "mov edi, [edx + 0x08]",
        "mov esi, [edx + 0x0c]",
        "mov esp, [edx + 0x14]",
        "jmp dword ptr [edx + 0x10]",
    );
}

/// First instruction of every kernel thread.
///
/// The context builder leaves the thread function in `ebx` and its
/// argument in `esi`.
#[unsafe(naked)]
unsafe extern "C" fn thread_trampoline() {
    naked_asm!("sti", "push esi", "call ebx", "ud2");
}
