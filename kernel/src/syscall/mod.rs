//! System-call surface of the process core.
//!
//! The interrupt-gate stub hands `Kernel::syscall` the call number and the
//! three argument registers. Only the process calls are served here; the
//! rest belong to other subsystems and fail with -1.

pub mod census;

use core::fmt;

use log::debug;

use crate::arch::{Cpu, IntrGuard};
use crate::config::TASK_NAME_LEN;
use crate::memory::{MemError, MemoryManager};
use crate::process::{ForkError, WaitError};
use crate::scheduler::{Kernel, Pid, TaskName};

/// Value user mode sees for a failed call.
pub const SYSCALL_FAILED: isize = -1;

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Syscall {
    GetPid = 0,
    Write = 1,
    Malloc = 2,
    Free = 3,
    Fork = 4,
    Read = 5,
    PutChar = 6,
    /// Print the task census.
    Ps = 7,
    Exit = 8,
    Wait = 9,
    Clear = 10,
    Help = 11,
    Execv = 12,
}

impl Syscall {
    /// Every call, indexed by number.
    pub const ALL: [Syscall; 13] = [
        Syscall::GetPid,
        Syscall::Write,
        Syscall::Malloc,
        Syscall::Free,
        Syscall::Fork,
        Syscall::Read,
        Syscall::PutChar,
        Syscall::Ps,
        Syscall::Exit,
        Syscall::Wait,
        Syscall::Clear,
        Syscall::Help,
        Syscall::Execv,
    ];

    pub fn from_raw(nr: usize) -> Option<Self> {
        Self::ALL.get(nr).copied()
    }
}

/// System call errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// No such call number.
    Unknown(usize),
    /// Served by another subsystem.
    Unsupported(Syscall),
    /// A user pointer could not be read or written.
    BadAddress,
    Fork(ForkError),
    Wait(WaitError),
    /// The console rejected census output.
    Console,
}

impl From<MemError> for SyscallError {
    fn from(_: MemError) -> Self {
        SyscallError::BadAddress
    }
}

impl From<ForkError> for SyscallError {
    fn from(err: ForkError) -> Self {
        SyscallError::Fork(err)
    }
}

impl From<WaitError> for SyscallError {
    fn from(err: WaitError) -> Self {
        SyscallError::Wait(err)
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::Unknown(nr) => write!(f, "unknown system call {}", nr),
            SyscallError::Unsupported(call) => write!(f, "{:?} is not served here", call),
            SyscallError::BadAddress => write!(f, "bad user address"),
            SyscallError::Fork(err) => write!(f, "fork: {}", err),
            SyscallError::Wait(err) => write!(f, "wait: {}", err),
            SyscallError::Console => write!(f, "console write failed"),
        }
    }
}

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Pid of the caller.
    pub fn getpid(&self) -> Pid {
        self.current_pid()
    }

    /// System-call entry. Interrupts stay masked for the whole call.
    pub fn syscall(&self, nr: usize, args: [usize; 3], console: &mut dyn fmt::Write) -> isize {
        let _irq = IntrGuard::new(self.cpu());
        match self.dispatch(nr, args, console) {
            Ok(value) => value as isize,
            Err(err) => {
                debug!(target: "syscall", "{} failed for {}: {}", nr, self.current_pid(), err);
                SYSCALL_FAILED
            }
        }
    }

    fn dispatch(
        &self,
        nr: usize,
        args: [usize; 3],
        console: &mut dyn fmt::Write,
    ) -> Result<usize, SyscallError> {
        let call = Syscall::from_raw(nr).ok_or(SyscallError::Unknown(nr))?;
        match call {
            Syscall::GetPid => Ok(self.getpid().as_u32() as usize),
            Syscall::Fork => Ok(self.fork()?.as_u32() as usize),
            Syscall::Ps => {
                self.ps(console).map_err(|_| SyscallError::Console)?;
                Ok(0)
            }
            Syscall::Exit => {
                self.exit(args[0] as i32);
                Ok(0)
            }
            Syscall::Wait => {
                // A bad status pointer must fail before a child is collected.
                if args[0] != 0 {
                    self.with_memory(|mm| mm.write_user(args[0], &0i32.to_ne_bytes()))?;
                }
                let (pid, status) = self.wait()?;
                if args[0] != 0 {
                    self.with_memory(|mm| mm.write_user(args[0], &status.to_ne_bytes()))?;
                }
                Ok(pid.as_u32() as usize)
            }
            Syscall::Execv => {
                let name = self.read_user_name(args[0])?;
                self.exec(name.as_str(), args[1], args[2])?;
                Ok(0)
            }
            other => Err(SyscallError::Unsupported(other)),
        }
    }

    /// Read a NUL-terminated name from user memory, keeping at most what
    /// fits a task name. A multi-byte character cut at the limit is dropped.
    fn read_user_name(&self, addr: usize) -> Result<TaskName, MemError> {
        let mut bytes = [0u8; TASK_NAME_LEN - 1];
        let mut len = 0;
        self.with_memory(|mm| {
            while len < bytes.len() {
                mm.read_user(addr + len, &mut bytes[len..len + 1])?;
                if bytes[len] == 0 {
                    break;
                }
                len += 1;
            }
            Ok::<(), MemError>(())
        })?;
        let name = match core::str::from_utf8(&bytes[..len]) {
            Ok(name) => name,
            Err(err) => core::str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or_default(),
        };
        Ok(TaskName::new(name))
    }
}
