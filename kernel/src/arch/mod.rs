//! Architecture interface of the process core.
//!
//! Everything the core needs from the processor goes through [`Cpu`]: the
//! interrupt flag, the context switch, the interrupt-return path and the
//! kernel stack used on privilege transitions.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod i686;

use crate::scheduler::context::{IntrFrame, SwitchContext};

/// Processor primitives.
pub trait Cpu {
    /// Whether maskable interrupts are enabled.
    fn interrupts_enabled(&self) -> bool;

    fn disable_interrupts(&self);

    fn enable_interrupts(&self);

    /// Halt until the next interrupt.
    fn halt(&self);

    /// Save the running context into `prev` and resume `next`.
    ///
    /// Returns when some later switch resumes `prev`.
    ///
    /// # Safety
    ///
    /// Both pointers must reference live, initialized contexts inside
    /// control-block pages, and interrupts must be disabled.
    unsafe fn switch_to(&self, prev: *mut SwitchContext, next: *mut SwitchContext);

    /// Leave the kernel through the interrupt-return path with `frame` as
    /// the stack. Does not come back on hardware.
    ///
    /// # Safety
    ///
    /// `frame` must be the interrupt frame of the running task.
    unsafe fn interrupt_return(&self, frame: *mut IntrFrame);

    /// Kernel stack loaded on the next user-to-kernel transition.
    fn set_kernel_stack(&self, top: usize);

    /// Address a fresh kernel thread starts at.
    fn thread_entry(&self) -> usize;

    /// Address of the interrupt-return path.
    fn interrupt_exit(&self) -> usize;
}

/// Interrupt flag state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrStatus {
    Off,
    On,
}

/// Disable interrupts and return the previous state.
pub fn intr_disable<C: Cpu + ?Sized>(cpu: &C) -> IntrStatus {
    if cpu.interrupts_enabled() {
        cpu.disable_interrupts();
        IntrStatus::On
    } else {
        IntrStatus::Off
    }
}

/// Restore a state returned by [`intr_disable`].
pub fn intr_set_status<C: Cpu + ?Sized>(cpu: &C, status: IntrStatus) {
    match status {
        IntrStatus::On => cpu.enable_interrupts(),
        IntrStatus::Off => cpu.disable_interrupts(),
    }
}

/// Masks interrupts while alive and restores the previous state on drop.
pub struct IntrGuard<'a, C: Cpu + ?Sized> {
    cpu: &'a C,
    saved: IntrStatus,
}

impl<'a, C: Cpu + ?Sized> IntrGuard<'a, C> {
    pub fn new(cpu: &'a C) -> Self {
        let saved = intr_disable(cpu);
        IntrGuard { cpu, saved }
    }

    /// State that will be restored.
    pub fn saved(&self) -> IntrStatus {
        self.saved
    }
}

impl<C: Cpu + ?Sized> Drop for IntrGuard<'_, C> {
    fn drop(&mut self) {
        intr_set_status(self.cpu, self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::SimCpu;

    #[test]
    fn guard_restores_previous_state() {
        let cpu = SimCpu::new();
        assert!(cpu.interrupts_enabled());
        {
            let outer = IntrGuard::new(&cpu);
            assert_eq!(outer.saved(), IntrStatus::On);
            assert!(!cpu.interrupts_enabled());
            {
                let inner = IntrGuard::new(&cpu);
                assert_eq!(inner.saved(), IntrStatus::Off);
            }
            assert!(!cpu.interrupts_enabled());
        }
        assert!(cpu.interrupts_enabled());
    }
}
