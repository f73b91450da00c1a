//! Program image replacement.

use core::mem::size_of;

use log::info;

use crate::arch::{Cpu, IntrGuard};
use crate::config::{MAX_EXEC_ARGS, USER_STACK_TOP};
use crate::memory::{MemError, MemoryManager};
use crate::scheduler::Kernel;

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Restart the running process at `entry` under `name`.
    ///
    /// The interrupt frame is rewritten so the return to user mode lands on
    /// the exec trampoline with `ebx = argv`, `ecx = argc`, `edx = entry`
    /// and the stack at the user stack top; the trampoline calls
    /// `entry(argc, argv)`. Does not return on hardware.
    pub fn exec(&self, name: &str, entry: usize, argv: usize) -> Result<(), MemError> {
        let _irq = IntrGuard::new(self.cpu());
        let argc = self.count_args(argv)?;
        let current = self.current();
        let trampoline = self.config().exec_trampoline;
        let pid = current.with(|t| {
            t.set_name(name);
            t.pid()
        });
        current.with_frame(|frame| {
            frame.ebx = argv;
            frame.ecx = argc;
            frame.edx = entry;
            frame.eip = trampoline;
            frame.esp = USER_STACK_TOP;
        });
        info!(target: "exec", "{} exec {} at {:#x} argc {}", pid, name, entry, argc);

        // SAFETY: the frame belongs to the running task.
        unsafe { self.cpu().interrupt_return(current.frame_ptr()) };
        Ok(())
    }

    /// Count the words of the NULL-terminated pointer array at `argv`.
    fn count_args(&self, argv: usize) -> Result<usize, MemError> {
        if argv == 0 {
            return Ok(0);
        }
        self.with_memory(|mm| {
            let mut word = [0u8; size_of::<usize>()];
            for argc in 0..MAX_EXEC_ARGS {
                mm.read_user(argv + argc * word.len(), &mut word)?;
                if usize::from_ne_bytes(word) == 0 {
                    return Ok(argc);
                }
            }
            Ok(MAX_EXEC_ARGS)
        })
    }
}
