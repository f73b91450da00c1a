//! Task census (`ps`).

use core::fmt::{self, Write};

use crate::arch::Cpu;
use crate::config::CENSUS_COLUMN;
use crate::memory::MemoryManager;
use crate::scheduler::{Kernel, Pid, TaskInfo};

/// Parent column: a pid, or `NULL`.
struct ParentPid(Option<Pid>);

impl fmt::Display for ParentPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(pid) => fmt::Display::fmt(&pid, f),
            None => f.pad("NULL"),
        }
    }
}

/// Render the census of `tasks` under a header.
pub fn write_census(out: &mut dyn Write, tasks: &[TaskInfo]) -> fmt::Result {
    let w = CENSUS_COLUMN;
    writeln!(out, "{:<w$}{:<w$}{:<w$}{:<w$}COMMAND", "PID", "PPID", "STAT", "TICKS")?;
    for task in tasks {
        writeln!(
            out,
            "{:<w$}{:<w$}{:<w$}{:<w$x}{}",
            task.pid,
            ParentPid(task.parent),
            task.status.name(),
            task.elapsed_ticks,
            task.name
        )?;
    }
    Ok(())
}

impl<M: MemoryManager, C: Cpu> Kernel<M, C> {
    /// Print one row per live task, oldest first.
    pub fn ps(&self, out: &mut dyn Write) -> fmt::Result {
        write_census(out, &self.tasks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{TaskName, TaskStatus};
    use alloc::string::String;

    fn info(pid: u32, parent: Option<u32>, status: TaskStatus, elapsed: u32, name: &str) -> TaskInfo {
        TaskInfo {
            pid: Pid::new(pid),
            parent: parent.map(Pid::new),
            status,
            priority: 31,
            ticks: 31,
            elapsed_ticks: elapsed,
            name: TaskName::new(name),
            is_process: true,
        }
    }

    #[test]
    fn rows_are_padded_to_fifteen_columns() {
        let tasks = [
            info(1, None, TaskStatus::Waiting, 0x1f, "init"),
            info(12, Some(1), TaskStatus::Running, 255, "sh"),
        ];
        let mut out = String::new();
        write_census(&mut out, &tasks).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "PID            PPID           STAT           TICKS          COMMAND"
        );
        assert_eq!(
            lines[1],
            "1              NULL           WAITING        1f             init"
        );
        assert_eq!(
            lines[2],
            "12             1              RUNNING        ff             sh"
        );
    }
}
