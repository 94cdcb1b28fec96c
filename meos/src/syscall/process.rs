//! Process system calls: `getpid`, `fork`, `execv`, `_exit`, `waitpid`.
//!
//! The two hard paths here are the ones with partial-failure recovery:
//!
//! - **`fork`** builds the child bottom-up (shell, address-space copy,
//!   table slot, shared file descriptors, trapframe copy, thread). Every
//!   failure unwinds whatever was built: the child's structures are owned
//!   values that drop on the error return, and the PID slot is explicitly
//!   vacated if the thread cannot be spawned.
//! - **`execv`** keeps the old address space aside until the new image is
//!   loaded and the stack defined; any failure up to that point
//!   reinstalls and reactivates it. Once argument marshaling onto the new
//!   stack begins there is nothing to fall back to, and a failure there
//!   is a panic, not an errno.

use crate::{
    Errno,
    fs::OpenFlags,
    limits::{ARG_MAX, PATH_MAX},
    loader,
    mm::{AddrSpace, as_activate},
    proc::{self, Process},
    syscall::uaccess::{UserCString, UserPtrRO, UserPtrWO},
    thread::{self, Current, ThreadBuilder},
    wait,
};
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use bedrock::trapframe::TrapFrame;
use core::convert::Infallible;

fn current_process() -> Arc<Process> {
    thread::current_process().expect("process syscall from a bare kernel thread")
}

/// `getpid() -> pid`.
pub fn sys_getpid() -> Result<u32, Errno> {
    Ok(current_process().pid() as u32)
}

/// `fork(trapframe) -> child pid`.
///
/// The child shares the parent's open-file handles slot for slot (one
/// refcount unit per slot), gets a deep copy of the address space, and
/// starts in user mode with a trapframe identical to the parent's except
/// `v0 = 0`, `a3 = 0`, and the program counter advanced past the
/// syscall.
pub fn sys_fork(tf: &TrapFrame) -> Result<u32, Errno> {
    let parent = current_process();

    let child = Process::new_runnable("child", parent.program())?;
    let child_aspace = parent.with_addrspace(|aspace| {
        aspace.ok_or(Errno::BadAddress)?.copy()
    })?;
    child.set_addrspace(child_aspace);
    child.set_ppid(parent.pid());

    let pid = proc::table().insert(&child)?;
    child.set_pid(pid);

    // Share the parent's descriptors; the child's freshly created
    // console handles are discarded by the replacement.
    child.file_table().inherit_from(parent.file_table());

    let child_tf = Box::new(*tf);
    let thread_child = child.clone();
    let spawned = ThreadBuilder::new(child.name())
        .attach_process(child.clone())
        .spawn(move || {
            let mut tf = *child_tf;
            // The frame is a Copy; release the heap copy before the
            // diverging entry below, which would otherwise leak it.
            drop(child_tf);
            tf.v0 = 0;
            tf.a3 = 0;
            tf.advance_pc();
            as_activate();
            thread_child.program().enter(&tf)
        });
    if let Err(e) = spawned {
        // Unwind: vacate the PID slot; dropping our child references
        // tears down the address space and file table.
        proc::table()
            .remove(pid)
            .expect("child pid vanished during fork rollback");
        return Err(e);
    }

    log::debug!("fork: {} -> pid {}", parent.pid(), pid);
    Ok(pid as u32)
}

/// `_exit(code)`. Does not return.
///
/// Orphans (parent gone or already exited) remove themselves from the
/// process table and are destroyed when the last reference drops;
/// everyone else publishes the encoded status and persists until the
/// parent reaps them with `waitpid`.
pub fn sys_exit(code: i32) -> ! {
    let me = current_process();
    let parent_exited = match proc::table().get(me.ppid()) {
        Ok(parent) => parent.exited(),
        Err(_) => true,
    };

    if parent_exited {
        let removed = proc::table()
            .remove(me.pid())
            .expect("exiting process has an invalid pid");
        assert!(removed.is_some(), "exiting process missing from the table");
        log::debug!("exit: orphan pid {} code {}", me.pid(), code);
    } else {
        log::debug!("exit: pid {} code {}", me.pid(), code);
        me.mark_exited(wait::mkwait_exit(code));
    }
    drop(me);
    Current::exit(0)
}

/// `waitpid(pid, status_ptr, options) -> pid`.
///
/// Blocks until the named child exits, copies the encoded status to
/// `status_ptr` (if non-null), reaps the child, and returns its pid.
/// `options` accepts `0`, `WNOHANG` and `WUNTRACED` but alters nothing;
/// this kernel always blocks.
pub fn sys_waitpid(pid: i32, status_addr: usize, options: u32) -> Result<u32, Errno> {
    if !matches!(options, 0 | wait::WNOHANG | wait::WUNTRACED) {
        return Err(Errno::InvalidArgument);
    }
    let me = current_process();
    let target = proc::table().get(pid)?;
    if target.ppid() != me.pid() {
        return Err(Errno::NoChild);
    }

    target.wait_for_exit();

    if status_addr != 0 {
        UserPtrWO::<i32>::new(status_addr).put(target.exit_status())?;
    }
    proc::table().remove(pid)?;
    Ok(pid as u32)
}

/// Reads the argument vector out of user space: a null-terminated array
/// of string pointers, each string bounded by the remaining `ARG_MAX`
/// budget.
fn extract_args(argv_addr: usize) -> Result<Vec<String>, Errno> {
    let mut args = Vec::new();
    let mut total = 0usize;
    for i in 0..ARG_MAX / 4 {
        let ptr = UserPtrRO::<u32>::new(argv_addr + i * 4).get()?;
        if ptr == 0 {
            return Ok(args);
        }
        let s = UserCString::new(ptr as usize).read(ARG_MAX - total)?;
        total += s.len() + 1;
        if total > ARG_MAX {
            return Err(Errno::TooBig);
        }
        args.push(s);
    }
    Err(Errno::TooBig)
}

/// `execv(path, argv)`. Returns only on failure.
///
/// On success the calling thread re-enters user mode inside the new
/// image at its ELF entry point, with `argc`/`argv` marshaled onto the
/// fresh stack and the old address space destroyed.
pub fn sys_execv(path_addr: usize, argv_addr: usize) -> Result<Infallible, Errno> {
    let me = current_process();

    // Everything user-supplied is captured into kernel memory before the
    // address space is touched.
    let args = extract_args(argv_addr)?;
    let path = UserCString::new(path_addr).read(PATH_MAX)?;
    let vnode = crate::fs::open(&path, OpenFlags::RDONLY)?;

    // Hold the old space aside; it is the rollback target until the new
    // image is fully in place.
    let saved = me.take_addrspace();
    let mut new_aspace = AddrSpace::new();

    let loaded = match loader::load_elf(&vnode, &mut new_aspace) {
        Ok(entry) => new_aspace.define_stack().map(|sp| (entry, sp)),
        Err(e) => Err(e),
    };
    drop(vnode);
    let (entry, sp) = match loaded {
        Ok(v) => v,
        Err(e) => {
            me.restore_addrspace(saved);
            as_activate();
            return Err(e);
        }
    };

    // Point of no return: the argument image is marshaled onto the new
    // stack. The inputs were validated above, so the only way to fail
    // here is frame exhaustion mid-replacement, which leaves no
    // consistent image to return to.
    let layout = loader::build_argv(&new_aspace, sp, &args)
        .unwrap_or_else(|e| panic!("execv: argv marshaling failed past rollback: {e:?}"));

    me.set_addrspace(new_aspace);
    as_activate();
    log::debug!("execv: pid {} -> {:?} argc {}", me.pid(), path, layout.argc);

    let tf = TrapFrame::user_entry(
        entry.into_usize() as u32,
        layout.sp.into_usize() as u32,
        layout.argc as u32,
        layout.argv.into_usize() as u32,
    );
    me.program().enter(&tf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::file_table::Whence,
        proc::UserProgram,
        syscall::uaccess::UserU8SliceWO,
        test_support,
    };
    use bedrock::addressing::{PAGE_SIZE, USERSTACK, Va};
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicI32, AtomicUsize, Ordering},
        mpsc,
    };

    // A simulated user program: `enter` runs the provided closure as the
    // "user code" of whichever process's thread enters it, then exits.
    struct SimProgram {
        body: Box<dyn Fn(&TrapFrame) + Send + Sync>,
    }

    impl SimProgram {
        fn new(body: impl Fn(&TrapFrame) + Send + Sync + 'static) -> Arc<SimProgram> {
            Arc::new(SimProgram {
                body: Box::new(body),
            })
        }
    }

    impl UserProgram for SimProgram {
        fn enter(&self, tf: &TrapFrame) -> ! {
            (self.body)(tf);
            sys_exit(0)
        }
    }

    // Spawns `body` as the user code of a fresh process (with a small
    // mapped data region) and returns once it finishes.
    fn run_as_process(
        name: &str,
        program: Arc<dyn UserProgram>,
        body: impl FnOnce() + Send + 'static,
    ) {
        test_support::boot();
        let _gate = test_support::exclusive();
        let proc = Process::new_runnable(name, program).unwrap();
        let mut aspace = AddrSpace::new();
        aspace
            .define_region(
                Va::new(0x0100_0000).unwrap(),
                8 * PAGE_SIZE,
                true,
                true,
                false,
            )
            .unwrap();
        proc.set_addrspace(aspace);
        let pid = proc::table().insert(&proc).unwrap();
        proc.set_pid(pid);

        ThreadBuilder::new(name)
            .attach_process(proc.clone())
            .spawn(body)
            .unwrap()
            .join();

        // The test process itself is not reaped by anyone; vacate it.
        let _ = proc::table().remove(pid);
    }

    #[test]
    fn getpid_reports_the_table_slot() {
        let seen = Arc::new(AtomicI32::new(-1));
        let seen2 = seen.clone();
        run_as_process(
            "getpid",
            SimProgram::new(|_| {}),
            move || {
                seen2.store(sys_getpid().unwrap() as i32, Ordering::SeqCst);
            },
        );
        assert!(seen.load(Ordering::SeqCst) >= crate::limits::PID_MIN);
    }

    // Scenario: fork + exit + wait. The child sees v0 = 0 and an
    // advanced pc, exits with 7; the parent reaps exactly that status;
    // a second wait is ESRCH.
    #[test]
    fn fork_exit_wait_round_trip() {
        let (tx, rx) = mpsc::channel::<TrapFrame>();
        let tx = StdMutex::new(tx);
        let program = SimProgram::new(move |tf| {
            tx.lock().unwrap().send(*tf).unwrap();
            sys_exit(7);
        });

        run_as_process("forker", program, move || {
            let mut tf = TrapFrame::default();
            tf.v0 = 999; // syscall number slot, clobbered in the child
            tf.a3 = 77;
            tf.epc = 0x0040_0000;

            let child_pid = sys_fork(&tf).unwrap() as i32;
            assert!(child_pid >= crate::limits::PID_MIN);

            let child_tf = rx.recv().unwrap();
            assert_eq!(child_tf.v0, 0, "child must observe a zero return");
            assert_eq!(child_tf.a3, 0, "child must observe no error");
            assert_eq!(child_tf.epc, 0x0040_0004, "child must skip the syscall");

            let status_addr = 0x0100_0000usize;
            let reaped = sys_waitpid(child_pid, status_addr, 0).unwrap();
            assert_eq!(reaped as i32, child_pid);
            let status = UserPtrRO::<i32>::new(status_addr).get().unwrap();
            assert_eq!(wait::wexitstatus(status), 7);

            assert_eq!(
                sys_waitpid(child_pid, 0, 0).unwrap_err(),
                Errno::NoSuchProcess,
                "a reaped child is gone"
            );
        });
    }

    // Scenario: copy-on-fork isolation. Parent writes 0xaa, forks,
    // overwrites with 0xbb; the child still reads 0xaa.
    #[test]
    fn fork_isolates_memory() {
        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let observed2 = observed.clone();
        let program = SimProgram::new(move |_| {
            let byte = UserPtrRO::<u8>::new(0x0100_0040).get().unwrap();
            observed2.store(byte as usize, Ordering::SeqCst);
            sys_exit(0);
        });

        run_as_process("cow", program, move || {
            UserPtrWO::<u8>::new(0x0100_0040).put(0xaa).unwrap();
            let child = sys_fork(&TrapFrame::default()).unwrap() as i32;
            UserPtrWO::<u8>::new(0x0100_0040).put(0xbb).unwrap();
            sys_waitpid(child, 0, 0).unwrap();
        });
        assert_eq!(observed.load(Ordering::SeqCst), 0xaa);
    }

    // After fork, descriptors refer to shared handles (refcount >= 2);
    // closing in one table does not disturb the other.
    #[test]
    fn fork_shares_file_handles() {
        let program = SimProgram::new(|_| sys_exit(0));
        run_as_process("sharer", program, move || {
            let me = current_process();
            crate::fs::rootfs().install("shared-file", b"contents");
            let vn = crate::fs::open("shared-file", OpenFlags::RDONLY).unwrap();
            let handle =
                crate::fs::FileHandle::create("shared-file", vn, OpenFlags::RDONLY);
            let fd = me.file_table().add(handle.clone()).unwrap();
            let base_count = Arc::strong_count(&handle);

            let child_pid = sys_fork(&TrapFrame::default()).unwrap() as i32;
            let child = proc::table().get(child_pid).unwrap();
            assert!(
                Arc::strong_count(&handle) > base_count,
                "child slot must hold a reference"
            );
            let shared = child.file_table().get(fd).unwrap();
            assert!(Arc::ptr_eq(&shared, &handle), "same open-file description");
            // Offsets travel with the handle, not the descriptor.
            let mut buf = [0u8; 4];
            shared.read(&mut buf).unwrap();
            assert_eq!(handle.offset(), 4);

            child.file_table().remove(fd).unwrap();
            drop(shared);
            assert!(me.file_table().get(fd).is_ok(), "parent descriptor survives");
            assert_eq!(handle.lseek(0, Whence::Set).unwrap(), 0);

            sys_waitpid(child_pid, 0, 0).unwrap();
        });
    }

    #[test]
    fn waitpid_validates_its_arguments() {
        let program = SimProgram::new(|_| sys_exit(0));
        run_as_process("validator", program, move || {
            assert_eq!(sys_waitpid(1, 0, 0xff).unwrap_err(), Errno::InvalidArgument);
            assert_eq!(
                sys_waitpid(crate::limits::PID_MAX, 0, 0).unwrap_err(),
                Errno::NoSuchProcess
            );
            // PID 0 exists (the kernel process) but is nobody's child.
            assert_eq!(sys_waitpid(0, 0, 0).unwrap_err(), Errno::NoChild);
        });
    }

    // Scenario: orphan exit. A forks B and exits immediately; B then
    // exits and must destroy itself, leaving no table slot behind.
    #[test]
    fn orphans_self_destruct() {
        let generation = Arc::new(AtomicUsize::new(0));
        let b_pid = Arc::new(AtomicI32::new(-1));
        let (generation2, b_pid2) = (generation.clone(), b_pid.clone());

        let program = SimProgram::new(move |_| {
            match generation2.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    // Running as A: fork B, then exit before it.
                    let pid = sys_fork(&TrapFrame::default()).unwrap() as i32;
                    b_pid2.store(pid, Ordering::SeqCst);
                    sys_exit(0);
                }
                _ => {
                    // Running as B: linger until the root has reaped A
                    // (generation 3), so A is certainly gone.
                    while generation2.load(Ordering::SeqCst) < 3 {
                        crate::thread::yield_now();
                    }
                    sys_exit(3);
                }
            }
        });

        run_as_process("orphan-root", program, move || {
            let a_pid = sys_fork(&TrapFrame::default()).unwrap() as i32;
            sys_waitpid(a_pid, 0, 0).unwrap();
            let b = loop {
                let pid = b_pid.load(Ordering::SeqCst);
                if pid > 0 {
                    break pid;
                }
                crate::thread::yield_now();
            };
            // Signal B that A has been reaped, then wait for its slot to
            // clear itself; B is not reapable by anyone.
            generation.fetch_add(1, Ordering::SeqCst);
            let mut tries = 0;
            while proc::table().get(b).is_ok() {
                tries += 1;
                assert!(tries < 1000, "orphan pid slot never cleared");
                test_support::settle();
            }
            assert_eq!(sys_waitpid(b, 0, 0).unwrap_err(), Errno::NoSuchProcess);
        });
    }

    // Scenario: exec argv marshaling observed from inside the new image.
    #[test]
    fn execv_marshals_argv_onto_the_new_stack() {
        let image = crate::loader::elf::build_image(
            0x0040_0000,
            &[(0x0040_0000, b"\0\0\0\0", 16)],
        );
        let entered = Arc::new(AtomicUsize::new(0));
        let entered2 = entered.clone();

        let program = SimProgram::new(move |tf| {
            if tf.epc == 0x0040_0000 {
                // Inside the new image now.
                assert_eq!(tf.a0, 2, "argc");
                let argv = tf.a1 as usize;
                assert!((tf.sp as usize) <= argv);
                assert!((argv as u32) < USERSTACK as u32);
                let p0 = UserPtrRO::<u32>::new(argv).get().unwrap();
                let p1 = UserPtrRO::<u32>::new(argv + 4).get().unwrap();
                let p2 = UserPtrRO::<u32>::new(argv + 8).get().unwrap();
                assert_eq!(
                    UserCString::new(p0 as usize).read(64).unwrap(),
                    "Hello"
                );
                assert_eq!(
                    UserCString::new(p1 as usize).read(64).unwrap(),
                    "World"
                );
                assert_eq!(p2, 0);
                assert!((p0 as usize) < USERSTACK && (p1 as usize) < USERSTACK);
                entered2.store(1, Ordering::SeqCst);
            }
            sys_exit(0)
        });

        run_as_process("execer", program, move || {
            crate::fs::rootfs().install("bin-x", &image);
            // Stage path and argv in the caller's user memory.
            let path_addr = 0x0100_0000usize;
            UserU8SliceWO::new(path_addr, 6).write(b"bin-x\0").unwrap();
            let s1 = 0x0100_0100usize;
            let s2 = 0x0100_0110usize;
            UserU8SliceWO::new(s1, 6).write(b"Hello\0").unwrap();
            UserU8SliceWO::new(s2, 6).write(b"World\0").unwrap();
            let argv_addr = 0x0100_0200usize;
            UserPtrWO::<u32>::new(argv_addr).put(s1 as u32).unwrap();
            UserPtrWO::<u32>::new(argv_addr + 4).put(s2 as u32).unwrap();
            UserPtrWO::<u32>::new(argv_addr + 8).put(0).unwrap();

            match sys_execv(path_addr, argv_addr) {
                Err(e) => panic!("execv failed: {e:?}"),
            }
        });
        assert_eq!(entered.load(Ordering::SeqCst), 1, "new image never entered");
    }

    // Failed exec restores the old address space intact.
    #[test]
    fn execv_rolls_back_on_bad_image() {
        let program = SimProgram::new(|_| sys_exit(0));
        run_as_process("rollback", program, move || {
            crate::fs::rootfs().install("bad-image", b"this is not an executable");
            let path_addr = 0x0100_0000usize;
            UserU8SliceWO::new(path_addr, 10).write(b"bad-image\0").unwrap();
            UserPtrWO::<u32>::new(0x0100_0100).put(0).unwrap(); // empty argv
            UserPtrWO::<u32>::new(0x0100_0200).put(0x5151_5151).unwrap();

            let err = match sys_execv(path_addr, 0x0100_0100) {
                Err(e) => e,
            };
            assert_eq!(err, Errno::NotExecutable);
            // The old image is still there and still mapped.
            assert_eq!(
                UserPtrRO::<u32>::new(0x0100_0200).get().unwrap(),
                0x5151_5151
            );

            // A missing binary fails even earlier, same guarantee.
            UserU8SliceWO::new(path_addr, 8).write(b"no-such\0").unwrap();
            let err = match sys_execv(path_addr, 0x0100_0100) {
                Err(e) => e,
            };
            assert_eq!(err, Errno::NoSuchEntry);
        });
    }

    #[test]
    fn fork_without_an_address_space_fails_cleanly() {
        test_support::boot();
        let _gate = test_support::exclusive();
        let proc = Process::new_for_test("no-as");
        let pid = proc::table().insert(&proc).unwrap();
        proc.set_pid(pid);

        ThreadBuilder::new("no-as")
            .attach_process(proc.clone())
            .spawn(move || {
                assert_eq!(
                    sys_fork(&TrapFrame::default()).unwrap_err(),
                    Errno::BadAddress
                );
            })
            .unwrap()
            .join();

        // The failed fork left no child behind: the only process whose
        // parent is us would have to be in the table.
        for candidate in crate::limits::PID_MIN..crate::limits::PID_MAX {
            if let Ok(p) = proc::table().get(candidate) {
                assert_ne!(p.ppid(), pid, "fork rollback leaked a child");
            }
        }
        proc::table().remove(pid).unwrap();
    }
}
