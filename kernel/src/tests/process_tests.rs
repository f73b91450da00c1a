//! Process Management Unit Tests
//!
//! Tests for process creation, fork, exit/wait and exec.

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::mem::size_of;

    use crate::arch::{Cpu, IntrGuard};
    use crate::config::{PAGE_SIZE, USER_STACK_TOP, USER_VADDR_START};
    use crate::memory::{MemError, MemoryManager};
    use crate::process::{ForkError, WaitError};
    use crate::scheduler::{Pid, Resume, SpawnError, TaskStatus};
    use crate::test::{boot, user_noop, SimKernel, SIM_EXEC_TRAMPOLINE, SIM_INTERRUPT_EXIT};
    use crate::tests::{init_running, quiet_boot, run_until};

    const STACK_PAGE: usize = USER_STACK_TOP - PAGE_SIZE;

    fn fork(k: &SimKernel) -> Result<Pid, ForkError> {
        let _irq = IntrGuard::new(k.cpu());
        k.fork()
    }

    /// Kernel pages, frames and pids in use.
    fn usage(k: &SimKernel) -> (usize, usize, usize) {
        let (pages, frames) = k.with_memory(|mm| (mm.kernel_pages_in_use(), mm.frames_in_use()));
        (pages, frames, k.pids().in_use())
    }

    thread_local! {
        static KERNEL: Cell<Option<&'static SimKernel>> = const { Cell::new(None) };
        static CHILD_SAW: Cell<Option<usize>> = const { Cell::new(None) };
    }

    /// User continuation of a forked child: record the fork result, exit 42.
    extern "C" fn child_exits(ret: usize) {
        CHILD_SAW.with(|saw| saw.set(Some(ret)));
        if let Some(k) = KERNEL.with(Cell::get) {
            k.exit(42);
        }
    }

    // ========================================
    // Creation Tests
    // ========================================

    #[test]
    fn test_init_process_layout() {
        let k = boot();
        let init = k.find(Pid::INIT).unwrap();
        let dir = init.with(|t| t.page_dir()).unwrap();
        let pool = init.with(|t| t.vaddr()).unwrap();
        assert_eq!(pool.pages().collect::<Vec<_>>(), vec![STACK_PAGE]);
        assert!(k.with_memory(|mm| mm.frame_of(dir, STACK_PAGE)).is_some());

        let frame = init.with_frame(|f| *f);
        assert_eq!(frame.eip, user_noop as *const () as usize);
        assert_eq!(frame.esp, USER_STACK_TOP);
        let ctx = init.with(|t| t.context);
        assert_eq!((ctx.eip, ctx.esp), (SIM_INTERRUPT_EXIT, init.frame_addr()));
    }

    #[test]
    fn test_spawned_process_is_adopted_by_init() {
        let k = boot();
        let pid = k.spawn_process("sh", 0x0804_8000).unwrap();
        let info = k.task_info(pid).unwrap();
        assert_eq!(info.parent, Some(Pid::INIT));
        assert!(info.is_process);
        assert_eq!(info.priority, 31);
        assert_eq!(k.ready_pids().last(), Some(&pid));
        // main is still on the CPU with the kernel directory loaded.
        assert_eq!(k.with_memory(|mm| mm.active()), None);
    }

    #[test]
    fn test_failed_spawn_leaks_nothing() {
        let k = boot();
        let before = usage(k);
        // control block, pool, directory, stack page
        for budget in 0..4 {
            k.with_memory(|mm| mm.fail_after(budget));
            assert_eq!(
                k.spawn_process("sh", 0x0804_8000),
                Err(SpawnError::OutOfMemory)
            );
            k.with_memory(|mm| mm.never_fail());
            assert_eq!(usage(k), before, "budget {}", budget);
        }
        assert_eq!(k.tasks().len(), 3);
    }

    #[test]
    fn test_user_pages_are_marked_and_mapped_once() {
        let k = init_running();
        k.alloc_user_page(USER_VADDR_START + 0x10).unwrap();
        assert_eq!(
            k.alloc_user_page(USER_VADDR_START),
            Err(MemError::AlreadyMapped)
        );
        let pool = k.find(Pid::INIT).unwrap().with(|t| t.vaddr()).unwrap();
        assert_eq!(
            pool.pages().collect::<Vec<_>>(),
            vec![USER_VADDR_START, STACK_PAGE]
        );

        let frames = k.with_memory(|mm| mm.frames_in_use());
        for vaddr in [0, USER_VADDR_START - PAGE_SIZE, USER_STACK_TOP, usize::MAX] {
            assert_eq!(k.alloc_user_page(vaddr), Err(MemError::OutOfRange), "{:#x}", vaddr);
        }
        assert_eq!(k.with_memory(|mm| mm.frames_in_use()), frames);
    }

    // ========================================
    // Fork Tests
    // ========================================

    #[test]
    fn test_fork_copies_address_space() {
        let k = init_running();
        k.alloc_user_page(USER_VADDR_START).unwrap();
        k.with_memory(|mm| {
            mm.write_user(USER_VADDR_START, b"text segment").unwrap();
            mm.write_user(STACK_PAGE + 0x100, b"stack data").unwrap();
        });

        let child = fork(k).unwrap();
        assert_eq!(child, Pid::new(4));
        let info = k.task_info(child).unwrap();
        assert_eq!(info.name.as_str(), "init_fork");
        assert_eq!(info.parent, Some(Pid::INIT));
        assert_eq!(
            (info.status, info.ticks, info.elapsed_ticks),
            (TaskStatus::Ready, 31, 0)
        );
        assert_eq!(k.ready_pids(), vec![child]);

        let parent = k.find(Pid::INIT).unwrap();
        let task = k.find(child).unwrap();
        let (pdir, ppool) = parent.with(|t| (t.page_dir().unwrap(), t.vaddr().unwrap()));
        let (cdir, cpool) = task.with(|t| (t.page_dir().unwrap(), t.vaddr().unwrap()));
        assert_ne!(pdir, cdir);
        assert_eq!(ppool.bits(), cpool.bits());
        assert_ne!(ppool.bits().as_ptr(), cpool.bits().as_ptr());

        k.with_memory(|mm| {
            for vaddr in [USER_VADDR_START, STACK_PAGE] {
                let p = mm.frame_of(pdir, vaddr).unwrap();
                let c = mm.frame_of(cdir, vaddr).unwrap();
                assert_ne!(p, c);
                assert_eq!(mm.frame_bytes(p), mm.frame_bytes(c));
            }
            let text = mm.frame_of(cdir, USER_VADDR_START).unwrap();
            assert_eq!(&mm.frame_bytes(text)[..12], b"text segment");
            assert_eq!(mm.active(), Some(pdir.addr()));
        });
    }

    #[test]
    fn test_child_resumes_at_parent_frame_with_zero() {
        let k = init_running();
        k.find(Pid::INIT).unwrap().with_frame(|f| {
            f.eip = 0x0804_8123;
            f.eax = 4;
        });
        let child = fork(k).unwrap();
        let task = k.find(child).unwrap();
        let frame = task.with_frame(|f| *f);
        assert_eq!((frame.eip, frame.eax), (0x0804_8123, 0));
        let ctx = task.with(|t| t.context);
        assert_eq!((ctx.eip, ctx.esp), (SIM_INTERRUPT_EXIT, task.frame_addr()));
        assert!(matches!(ctx.resume, Resume::InterruptReturn));
    }

    #[test]
    fn test_failed_fork_releases_everything() {
        let k = init_running();
        k.alloc_user_page(USER_VADDR_START).unwrap();
        let before = usage(k);
        let active = k.with_memory(|mm| mm.active());
        // control block, pool, directory, transit buffer, two user pages
        for budget in 0..6 {
            k.with_memory(|mm| mm.fail_after(budget));
            assert_eq!(fork(k), Err(ForkError::OutOfMemory), "budget {}", budget);
            k.with_memory(|mm| mm.never_fail());
            assert_eq!(usage(k), before, "budget {}", budget);
            assert_eq!(k.with_memory(|mm| mm.active()), active);
            assert_eq!(k.tasks().len(), 3);
            assert!(k.ready_pids().is_empty());
        }
        assert_eq!(fork(k), Ok(Pid::new(4)));
    }

    #[test]
    #[should_panic(expected = "fork from kernel thread 2")]
    fn test_fork_from_kernel_thread_is_fatal() {
        let _ = fork(boot());
    }

    #[test]
    #[should_panic(expected = "too long to fork")]
    fn test_fork_name_overflow_is_fatal() {
        let k = init_running();
        let child = fork(k).unwrap();
        run_until(k, child);
        let _ = fork(k).unwrap();
        let grandchild = Pid::new(5);
        run_until(k, grandchild);
        // "init_fork_fork" cannot take another suffix.
        let _ = fork(k);
    }

    // ========================================
    // Exit / Wait Tests
    // ========================================

    #[test]
    fn test_exit_then_wait_collects_status() {
        let k = init_running();
        let before = usage(k);
        let child = fork(k).unwrap();
        run_until(k, child);

        k.exit(7);
        assert_eq!(k.current_pid(), Pid::INIT);
        assert_eq!(k.task_info(child).unwrap().status, TaskStatus::Hanging);
        assert!(k.find(child).unwrap().with(|t| t.vaddr()).is_none());

        assert_eq!(k.wait(), Ok((child, 7)));
        assert_eq!(k.task_info(child), None);
        assert_eq!(usage(k), before);
        assert_eq!(fork(k), Ok(child));
    }

    #[test]
    fn test_orphans_are_adopted_by_init() {
        let k = init_running();
        let child = fork(k).unwrap();
        run_until(k, child);
        let grandchild = fork(k).unwrap();
        assert_eq!(k.task_info(grandchild).unwrap().name.as_str(), "init_fork_fork");
        assert_eq!(k.task_info(grandchild).unwrap().parent, Some(child));

        k.exit(1);
        assert_eq!(k.task_info(grandchild).unwrap().parent, Some(Pid::INIT));
        assert_eq!(k.current_pid(), Pid::INIT);
        assert_eq!(k.wait(), Ok((child, 1)));

        run_until(k, grandchild);
        k.exit(2);
        assert_eq!(k.current_pid(), Pid::INIT);
        assert_eq!(k.wait(), Ok((grandchild, 2)));
        assert_eq!(k.wait(), Err(WaitError::NoChildren));
    }

    #[test]
    fn test_exit_hands_every_child_to_init() {
        let k = init_running();
        let parent = fork(k).unwrap();
        let sibling = fork(k).unwrap();
        run_until(k, sibling);
        let nephew = fork(k).unwrap();
        run_until(k, parent);
        let children = [fork(k).unwrap(), fork(k).unwrap()];
        for child in children {
            assert_eq!(k.task_info(child).unwrap().parent, Some(parent));
        }

        k.exit(1);
        for child in children {
            assert_eq!(k.task_info(child).unwrap().parent, Some(Pid::INIT));
        }
        assert_eq!(k.task_info(nephew).unwrap().parent, Some(sibling));
        assert_eq!(k.task_info(sibling).unwrap().parent, Some(Pid::INIT));

        run_until(k, Pid::INIT);
        assert_eq!(k.wait(), Ok((parent, 1)));
    }

    #[test]
    fn test_wait_without_children_fails() {
        let k = quiet_boot();
        assert_eq!(k.wait(), Err(WaitError::NoChildren));
    }

    #[test]
    fn test_wait_blocks_until_child_exits() {
        let k = init_running();
        KERNEL.with(|cell| cell.set(Some(k)));
        k.find(Pid::INIT)
            .unwrap()
            .with_frame(|f| f.eip = child_exits as *const () as usize);
        let child = fork(k).unwrap();
        k.cpu().take_switches();

        k.cpu().set_run_entries(true);
        let collected = k.wait();
        k.cpu().set_run_entries(false);

        assert_eq!(collected, Ok((child, 42)));
        assert_eq!(CHILD_SAW.with(Cell::get), Some(0));
        assert_eq!(
            k.cpu().take_switches(),
            vec![(Pid::INIT, child), (child, Pid::INIT)]
        );
        assert_eq!(k.current_pid(), Pid::INIT);
        assert_eq!(k.task_info(child), None);
    }

    #[test]
    #[should_panic(expected = "exited without a parent")]
    fn test_exit_without_parent_is_fatal() {
        boot().exit(0);
    }

    // ========================================
    // Exec Tests
    // ========================================

    #[test]
    fn test_exec_stages_trampoline_frame() {
        let k = init_running();
        let argv = STACK_PAGE + 0x800;
        k.with_memory(|mm| {
            let words = [STACK_PAGE + 0x900, STACK_PAGE + 0x910, 0];
            for (i, word) in words.iter().enumerate() {
                mm.write_user(argv + i * size_of::<usize>(), &word.to_ne_bytes())
                    .unwrap();
            }
        });

        k.exec("echo", 0x0804_8400, argv).unwrap();
        assert_eq!(k.task_info(Pid::INIT).unwrap().name.as_str(), "echo");
        let frame = k.find(Pid::INIT).unwrap().with_frame(|f| *f);
        assert_eq!((frame.eip, frame.esp), (SIM_EXEC_TRAMPOLINE, USER_STACK_TOP));
        assert_eq!((frame.ebx, frame.ecx, frame.edx), (argv, 2, 0x0804_8400));
        assert_eq!(k.cpu().user_returns().last(), Some(&frame));
        assert!(k.cpu().interrupts_enabled());
    }

    #[test]
    fn test_exec_without_arguments_truncates_name() {
        let k = init_running();
        k.exec("a_rather_long_program_name", 0x0804_8000, 0).unwrap();
        let info = k.task_info(Pid::INIT).unwrap();
        assert_eq!(info.name.as_str(), "a_rather_long_p");
        let frame = k.find(Pid::INIT).unwrap().with_frame(|f| *f);
        assert_eq!((frame.ebx, frame.ecx), (0, 0));
    }

    #[test]
    fn test_exec_with_unmapped_argv_fails() {
        let k = init_running();
        assert_eq!(
            k.exec("x", 0x0804_8000, USER_VADDR_START),
            Err(MemError::Unmapped)
        );
        assert_eq!(k.task_info(Pid::INIT).unwrap().name.as_str(), "init");
        assert!(k.cpu().user_returns().is_empty());
    }
}
