use super::*;
use crate::fs::OpenMode;
use crate::testing::MemFs;
use crate::user::{copy_from_user, copy_to_user};
use kernel_info::memory::{PAGE_SIZE, USER_STACK_TOP};
use kernel_info::scheduler::INIT_PROGRAM;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress, align_down};
use kernel_syscall::{Errno, Sysno, decode_result};
use kernel_vmem::testing::{BumpAlloc, FailAfter, TestPhys};
use kernel_vmem::{KernelDirectory, MapFlags, PageMapper, WalkedTables};

const IDLE_ENTRY: u32 = 0xC010_0000;
const KERNEL_PAGE: VirtualAddress = VirtualAddress::new(0xC800_0000);
/// Scratch space on the user stack page every exec'd task has.
const SCRATCH: u32 = align_down(USER_STACK_TOP, PAGE_SIZE);

type Mem<'a, A = BumpAlloc> = MemoryContext<'a, WalkedTables<'a, TestPhys>, TestPhys, A>;

struct World {
    phys: TestPhys,
    frames: BumpAlloc,
    kernel: KernelDirectory,
    live: PhysicalPage<Size4K>,
}

impl World {
    /// 1024 frames of RAM, a kernel template with one kernel page and a live
    /// directory initialised from it.
    fn new() -> Self {
        let phys = TestPhys::with_frames(1024);
        let mut frames = BumpAlloc::new(1, 1024);

        let kdir = frames.alloc_frame().unwrap();
        phys.zero_frame(kdir);
        let kview = WalkedTables::new(kdir, &phys);
        PageMapper::new(&kview, &mut frames)
            .alloc_page(KERNEL_PAGE, MapFlags::KERNEL_DATA)
            .unwrap();
        let kernel = KernelDirectory::from_frame(kdir);

        let live = frames.alloc_frame().unwrap();
        phys.copy_frame(kdir, live);

        Self {
            phys,
            frames,
            kernel,
            live,
        }
    }

    fn run<R>(&mut self, f: impl FnOnce(&mut Mem<'_>) -> R) -> R {
        let live = WalkedTables::new(self.live, &self.phys);
        let mut mem = MemoryContext::new(&live, &self.phys, &mut self.frames, &self.kernel);
        f(&mut mem)
    }

    /// Run `f` with only `budget` more frames available.
    fn run_starved<R>(
        &mut self,
        budget: usize,
        f: impl FnOnce(&mut Mem<'_, FailAfter<BumpAlloc>>) -> R,
    ) -> R {
        let inner = core::mem::replace(&mut self.frames, BumpAlloc::new(0, 0));
        let mut starved = FailAfter::new(inner, budget);
        let live = WalkedTables::new(self.live, &self.phys);
        let result = {
            let mut mem = MemoryContext::new(&live, &self.phys, &mut starved, &self.kernel);
            f(&mut mem)
        };
        self.frames = starved.into_inner();
        result
    }
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 251) as u8).collect()
}

fn fs_with_init(len: usize) -> MemFs {
    let mut fs = MemFs::with_terminal();
    fs.add_file(INIT_PROGRAM, &image(len));
    fs
}

/// A scheduler whose first task has exec'd `INIT_PROGRAM` and is current.
fn booted(w: &mut World, fs: MemFs) -> (Scheduler<MemFs>, Pid) {
    w.run(|mem| {
        let mut sched = Scheduler::new(fs, mem, IDLE_ENTRY).unwrap();
        let init = sched.spawn(mem, None).unwrap();
        sched.switch_tasks(mem);
        sched.exec(mem, INIT_PROGRAM).unwrap();
        (sched, init)
    })
}

/// Issue a system call from the current task as if it had executed
/// `int 0x80` at `0x100`.
fn syscall(w: &mut World, sched: &mut Scheduler<MemFs>, nr: Sysno, args: [u32; 3]) {
    {
        let frame = sched.current_task_mut().frame_mut();
        frame.eax = nr as u32;
        [frame.ebx, frame.ecx, frame.edx] = args;
        frame.eip = 0x102;
    }
    w.run(|mem| sched.syscall(mem));
}

fn result_of(sched: &Scheduler<MemFs>, pid: Pid) -> Result<u32, Errno> {
    decode_result(sched.task(pid).unwrap().frame().eax)
}

fn poke(w: &mut World, va: u32, data: &[u8]) {
    w.run(|mem| copy_to_user(mem.live, mem.mapper, VirtualAddress::new(va), data)).unwrap();
}

fn peek(w: &mut World, va: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    w.run(|mem| copy_from_user(mem.live, mem.mapper, VirtualAddress::new(va), &mut buf))
        .unwrap();
    buf
}

/// Every task is in exactly the queue its status names, once.
fn assert_queues_consistent(sched: &Scheduler<MemFs>) {
    let mut seen = Vec::new();
    for (status, queue) in [
        (TaskStatus::Running, sched.running().collect::<Vec<_>>()),
        (TaskStatus::Blocked, sched.blocked().collect()),
        (TaskStatus::Finished, sched.zombies().collect()),
    ] {
        for pid in queue {
            assert_ne!(pid, Pid::IDLE, "idle task queued");
            assert!(!seen.contains(&pid), "{pid} queued twice");
            assert_eq!(sched.task(pid).unwrap().status(), status, "{pid} in wrong queue");
            seen.push(pid);
        }
    }
    assert_eq!(seen.len(), sched.task_count());
}

#[test]
fn idle_runs_when_nothing_else_can() {
    let mut w = World::new();
    let mut sched = w.run(|mem| Scheduler::new(MemFs::with_terminal(), mem, IDLE_ENTRY).unwrap());
    assert_eq!(sched.current(), Pid::IDLE);
    assert_eq!(sched.current_task().frame().eip, IDLE_ENTRY);
    assert!(!sched.current_task().frame().from_user());

    w.run(|mem| {
        sched.switch_tasks(mem);
        sched.sleep(mem);
    });
    assert_eq!(sched.current(), Pid::IDLE);
    assert_eq!(sched.blocked().count(), 0);
}

#[test]
fn spawned_tasks_get_the_standard_descriptors() {
    let mut w = World::new();
    let (sched, init) = booted(&mut w, fs_with_init(16));
    assert_eq!(init, Pid(1));
    assert_eq!(sched.current(), init);
    assert_eq!(sched.current_task().files().open_count(), 3);
    assert_eq!(sched.filesystem().open_handles(), 3);
}

#[test]
fn exec_loads_the_image_and_enters_ring3() {
    let mut w = World::new();
    let data = image(5000);
    let (sched, _) = booted(&mut w, fs_with_init(5000));

    let task = sched.current_task();
    assert_eq!(task.address_space().brk(), VirtualAddress::new(2 * PAGE_SIZE));
    assert_eq!(peek(&mut w, 0, data.len()), data);
    assert_eq!(peek(&mut w, 5000, 16), [0; 16]);

    let frame = task.frame();
    assert_eq!(frame.eip, 0);
    assert_eq!(frame.useresp, USER_STACK_TOP);
    assert!(frame.from_user());
}

#[test]
fn failed_exec_leaves_the_task_untouched() {
    let mut w = World::new();
    let mut fs = fs_with_init(100);
    fs.add_file("/bin/short", &image(9000));
    fs.add_dir("/bin");
    let (mut sched, _) = booted(&mut w, fs);
    let before = w.frames.in_use();
    let directory = sched.current_task().address_space().directory();
    let frame = *sched.current_task().frame();

    w.run(|mem| {
        assert_eq!(sched.exec(mem, "/bin/none"), Err(TaskError::NotFound));
        assert_eq!(sched.exec(mem, "/bin"), Err(TaskError::IsADirectory));
    });
    sched.fs.read_limit = Some(4096);
    assert_eq!(w.run(|mem| sched.exec(mem, "/bin/short")), Err(TaskError::Io));
    sched.fs.read_limit = None;
    assert_eq!(
        w.run_starved(2, |mem| sched.exec(mem, "/bin/short")),
        Err(TaskError::OutOfMemory)
    );

    assert_eq!(w.frames.in_use(), before);
    assert_eq!(sched.current_task().address_space().directory(), directory);
    assert_eq!(*sched.current_task().frame(), frame);
    assert_eq!(peek(&mut w, 0, 100), image(100));
    assert_eq!(sched.filesystem().open_handles(), 3);
}

#[test]
fn fork_exit_wait_round_trip() {
    let mut w = World::new();
    let (mut sched, parent) = booted(&mut w, fs_with_init(64));
    let baseline = w.frames.in_use();

    syscall(&mut w, &mut sched, Sysno::Fork, [0; 3]);
    let child = Pid(result_of(&sched, parent).unwrap());
    assert_ne!(child, parent);
    assert_eq!(sched.task(child).unwrap().frame().eax, 0);
    assert_eq!(sched.task(child).unwrap().parent(), Some(parent));
    assert_eq!(sched.current_task().children(), [child]);
    assert_queues_consistent(&sched);

    // Parent waits before the child has run: it blocks and will retry.
    syscall(&mut w, &mut sched, Sysno::WaitPid, [child.0, SCRATCH, 0]);
    assert_eq!(sched.current(), child);
    assert_eq!(sched.blocked().collect::<Vec<_>>(), [parent]);
    assert_eq!(sched.task(parent).unwrap().frame().eip, 0x100);
    assert_queues_consistent(&sched);

    // The child sees the parent's memory as it was at fork time.
    assert_eq!(peek(&mut w, 0, 64), image(64));

    syscall(&mut w, &mut sched, Sysno::Exit, [7, 0, 0]);
    assert_eq!(sched.current(), parent);
    assert_eq!(sched.zombies().collect::<Vec<_>>(), [child]);
    assert_queues_consistent(&sched);

    // Retried waitpid reaps the zombie.
    w.run(|mem| sched.syscall(mem));
    assert_eq!(result_of(&sched, parent), Ok(child.0));
    assert_eq!(peek(&mut w, SCRATCH, 4), 7i32.to_le_bytes());
    assert!(sched.task(child).is_none());
    assert!(sched.current_task().children().is_empty());
    assert_eq!(w.frames.in_use(), baseline);
    assert_eq!(sched.filesystem().open_handles(), 3);
    assert_queues_consistent(&sched);
}

#[test]
fn waiting_for_a_finished_child_returns_at_once() {
    let mut w = World::new();
    let (mut sched, parent) = booted(&mut w, fs_with_init(64));
    let child = w.run(|mem| sched.fork(mem)).unwrap();

    w.run(|mem| sched.switch_tasks(mem));
    assert_eq!(sched.current(), child);
    w.run(|mem| sched.exit(mem, -3));
    assert_eq!(sched.current(), parent);

    let status = w.run(|mem| sched.wait(mem, child));
    assert_eq!(status, Ok(WaitStatus::Exited(-3)));
    assert_eq!(
        w.run(|mem| sched.wait(mem, child)),
        Err(TaskError::NoSuchChild)
    );
}

#[test]
fn waiting_for_a_stranger_is_echild() {
    let mut w = World::new();
    let (mut sched, parent) = booted(&mut w, fs_with_init(64));
    syscall(&mut w, &mut sched, Sysno::WaitPid, [parent.0, 0, 0]);
    assert_eq!(result_of(&sched, parent), Err(Errno::ECHILD));
    syscall(&mut w, &mut sched, Sysno::WaitPid, [42, 0, 0]);
    assert_eq!(result_of(&sched, parent), Err(Errno::ECHILD));
}

#[test]
fn fork_without_memory_leaves_no_trace() {
    let mut w = World::new();
    let (mut sched, _) = booted(&mut w, fs_with_init(8000));
    let before = w.frames.in_use();

    for budget in 0..4 {
        let result = w.run_starved(budget, |mem| sched.fork(mem));
        assert_eq!(result, Err(TaskError::OutOfMemory), "budget {budget}");
    }
    assert_eq!(w.frames.in_use(), before);
    assert_eq!(sched.task_count(), 1);
    assert!(sched.current_task().children().is_empty());
    assert_eq!(sched.filesystem().open_handles(), 3);
}

#[test]
fn exit_kills_every_descendant() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    let baseline = w.frames.in_use();

    let child = w.run(|mem| sched.fork(mem)).unwrap();
    w.run(|mem| sched.switch_tasks(mem));
    assert_eq!(sched.current(), child);
    let grandchild = w.run(|mem| sched.fork(mem)).unwrap();
    w.run(|mem| sched.switch_tasks(mem));
    assert_eq!(sched.current(), init);

    w.run(|mem| sched.exit(mem, 0));
    assert!(sched.task(child).is_none());
    assert!(sched.task(grandchild).is_none());
    // Init had no parent, so it was reaped as soon as it stopped running.
    assert!(sched.task(init).is_none());
    assert_eq!(sched.current(), Pid::IDLE);
    assert_eq!(sched.task_count(), 0);
    assert!(w.frames.in_use() < baseline);
    assert_eq!(sched.filesystem().open_handles(), 0);
    assert_queues_consistent(&sched);
}

#[test]
fn exit_wakes_only_the_parent() {
    let mut w = World::new();
    let (mut sched, parent) = booted(&mut w, fs_with_init(64));
    let a = w.run(|mem| sched.fork(mem)).unwrap();
    let b = w.run(|mem| sched.fork(mem)).unwrap();

    assert_eq!(w.run(|mem| sched.wait(mem, a)), Ok(WaitStatus::Blocked));
    assert_eq!(sched.current(), a);
    w.run(|mem| sched.sleep(mem));
    assert_eq!(sched.current(), b);
    assert_eq!(sched.blocked().collect::<Vec<_>>(), [parent, a]);

    w.run(|mem| sched.exit(mem, 1));
    assert_eq!(sched.blocked().collect::<Vec<_>>(), [a]);
    assert_eq!(sched.current(), parent);
    assert_queues_consistent(&sched);
}

#[test]
fn wake_only_moves_blocked_tasks() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    let other = w.run(|mem| sched.fork(mem)).unwrap();

    assert!(!sched.wake(init));
    assert!(!sched.wake(Pid(99)));
    assert!(!sched.wake(Pid::IDLE));
    assert_eq!(sched.running().collect::<Vec<_>>(), [init, other]);

    w.run(|mem| sched.sleep(mem));
    assert_eq!(sched.current(), other);
    assert!(sched.wake(init));
    assert!(!sched.wake(init));
    assert_eq!(sched.running().collect::<Vec<_>>(), [other, init]);
    assert_queues_consistent(&sched);
}

#[test]
fn timer_preempts_every_slice() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    let other = w.run(|mem| sched.fork(mem)).unwrap();

    for _ in 1..TICKS_PER_SLICE {
        assert!(!w.run(|mem| sched.tick(mem)));
        assert_eq!(sched.current(), init);
    }
    assert!(w.run(|mem| sched.tick(mem)));
    assert_eq!(sched.current(), other);

    for _ in 0..TICKS_PER_SLICE {
        w.run(|mem| sched.tick(mem));
    }
    assert_eq!(sched.current(), init);
}

#[test]
fn a_lone_task_keeps_the_cpu() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    for _ in 0..TICKS_PER_SLICE {
        assert!(!w.run(|mem| sched.tick(mem)));
    }
    assert_eq!(sched.current(), init);
}

#[test]
fn switching_swaps_the_live_user_mappings() {
    let mut w = World::new();
    let (mut sched, parent) = booted(&mut w, fs_with_init(64));
    let child = w.run(|mem| sched.fork(mem)).unwrap();

    poke(&mut w, 0, b"parent");
    w.run(|mem| sched.switch_tasks(mem));
    assert_eq!(sched.current(), child);
    assert_eq!(peek(&mut w, 0, 6), image(6));

    poke(&mut w, 0, b"child!");
    w.run(|mem| sched.switch_tasks(mem));
    assert_eq!(sched.current(), parent);
    assert_eq!(peek(&mut w, 0, 6), b"parent");
}

#[test]
fn unknown_system_calls_are_enosys() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    {
        let frame = sched.current_task_mut().frame_mut();
        frame.eax = 99;
    }
    w.run(|mem| sched.syscall(mem));
    assert_eq!(result_of(&sched, init), Err(Errno::ENOSYS));

    syscall(&mut w, &mut sched, Sysno::Setup, [0; 3]);
    assert_eq!(result_of(&sched, init), Ok(0));
}

#[test]
fn bad_user_pointers_are_efault() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));

    syscall(&mut w, &mut sched, Sysno::Write, [1, 0xC000_0000, 4]);
    assert_eq!(result_of(&sched, init), Err(Errno::EFAULT));
    syscall(&mut w, &mut sched, Sysno::Read, [0, 0x4000_0000, 4]);
    assert_eq!(result_of(&sched, init), Err(Errno::EFAULT));
    syscall(&mut w, &mut sched, Sysno::Open, [0x4000_0000, 4, 1]);
    assert_eq!(result_of(&sched, init), Err(Errno::EFAULT));
    assert!(sched.filesystem().tty.is_empty());
}

#[test]
fn files_through_system_calls() {
    let mut w = World::new();
    let mut fs = fs_with_init(64);
    fs.add_file("/etc/motd", b"hello from the initrd");
    let (mut sched, init) = booted(&mut w, fs);

    let path = b"/etc/motd";
    poke(&mut w, SCRATCH, path);
    syscall(&mut w, &mut sched, Sysno::Open, [SCRATCH, path.len() as u32, 1]);
    assert_eq!(result_of(&sched, init), Ok(3));

    let buf = SCRATCH + 0x100;
    syscall(&mut w, &mut sched, Sysno::Read, [3, buf, 300]);
    assert_eq!(result_of(&sched, init), Ok(21));
    assert_eq!(peek(&mut w, buf, 21), b"hello from the initrd");
    syscall(&mut w, &mut sched, Sysno::Read, [3, buf, 300]);
    assert_eq!(result_of(&sched, init), Ok(0));

    syscall(&mut w, &mut sched, Sysno::Write, [1, buf, 5]);
    assert_eq!(result_of(&sched, init), Ok(5));
    assert_eq!(sched.filesystem().tty, b"hello");

    syscall(&mut w, &mut sched, Sysno::Write, [3, buf, 5]);
    assert_eq!(result_of(&sched, init), Err(Errno::EBADF));

    syscall(&mut w, &mut sched, Sysno::Close, [3, 0, 0]);
    assert_eq!(result_of(&sched, init), Ok(0));
    syscall(&mut w, &mut sched, Sysno::Close, [3, 0, 0]);
    assert_eq!(result_of(&sched, init), Err(Errno::EBADF));
    assert_eq!(sched.filesystem().open_handles(), 3);
}

#[test]
fn failures_after_a_partial_transfer_report_the_bytes_moved() {
    let mut w = World::new();
    let mut fs = fs_with_init(64);
    fs.add_file("/etc/big", &[0x5A; 600]);
    let (mut sched, init) = booted(&mut w, fs);
    let fd = sched.open("/etc/big", OpenMode::Read).unwrap();
    sched.fs.io_error_from = Some(256);

    let buf = SCRATCH + 0x100;
    syscall(&mut w, &mut sched, Sysno::Read, [fd, buf, 600]);
    assert_eq!(result_of(&sched, init), Ok(256));
    assert_eq!(peek(&mut w, buf, 256), vec![0x5A; 256]);
    syscall(&mut w, &mut sched, Sysno::Read, [fd, buf, 600]);
    assert_eq!(result_of(&sched, init), Err(Errno::EIO));

    syscall(&mut w, &mut sched, Sysno::Write, [1, buf, 600]);
    assert_eq!(result_of(&sched, init), Ok(256));
    assert_eq!(sched.filesystem().tty.len(), 256);
    syscall(&mut w, &mut sched, Sysno::Write, [1, buf, 8]);
    assert_eq!(result_of(&sched, init), Err(Errno::EIO));
}

#[test]
fn open_rejects_bad_arguments() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    poke(&mut w, SCRATCH, b"/dev/tty\xFF");

    syscall(&mut w, &mut sched, Sysno::Open, [SCRATCH, 8, 3]);
    assert_eq!(result_of(&sched, init), Err(Errno::EINVAL));
    syscall(&mut w, &mut sched, Sysno::Open, [SCRATCH, 9, 1]);
    assert_eq!(result_of(&sched, init), Err(Errno::EINVAL));
    syscall(&mut w, &mut sched, Sysno::Open, [SCRATCH, PATH_MAX as u32 + 1, 1]);
    assert_eq!(result_of(&sched, init), Err(Errno::EINVAL));
    syscall(&mut w, &mut sched, Sysno::Open, [SCRATCH, 5, 1]);
    assert_eq!(result_of(&sched, init), Err(Errno::ENOENT));
}

#[test]
fn a_full_descriptor_table_is_enfile() {
    let mut w = World::new();
    let (mut sched, _) = booted(&mut w, fs_with_init(64));

    let mut fds = Vec::new();
    loop {
        match sched.open(INIT_PROGRAM, OpenMode::Read) {
            Ok(fd) => fds.push(fd),
            Err(e) => {
                assert_eq!(e, TaskError::TooManyFiles);
                break;
            }
        }
    }
    assert_eq!(fds.len(), kernel_info::scheduler::TASK_MAX_FILES - 3);
    assert_eq!(fds[0], 3);
    assert_eq!(
        sched.filesystem().open_handles(),
        kernel_info::scheduler::TASK_MAX_FILES
    );
    assert_eq!(Errno::from(TaskError::TooManyFiles), Errno::ENFILE);
}

#[test]
fn execve_replaces_the_image_through_a_system_call() {
    let mut w = World::new();
    let mut fs = fs_with_init(64);
    fs.add_file("/bin/echo", b"\x90\x90\xCD\x80");
    let (mut sched, init) = booted(&mut w, fs);

    let path = b"/bin/echo";
    poke(&mut w, SCRATCH, path);
    syscall(&mut w, &mut sched, Sysno::Execve, [SCRATCH, path.len() as u32, 0]);
    let frame = *sched.task(init).unwrap().frame();
    assert_eq!(frame.eip, 0);
    assert_eq!(frame.eax, 0);
    assert_eq!(peek(&mut w, 0, 4), b"\x90\x90\xCD\x80");

    poke(&mut w, SCRATCH, b"/bin/none");
    syscall(&mut w, &mut sched, Sysno::Execve, [SCRATCH, 9, 0]);
    assert_eq!(result_of(&sched, init), Err(Errno::ENOENT));
}

#[test]
fn yield_hands_the_cpu_over() {
    let mut w = World::new();
    let (mut sched, init) = booted(&mut w, fs_with_init(64));
    let other = w.run(|mem| sched.fork(mem)).unwrap();

    syscall(&mut w, &mut sched, Sysno::Yield, [0; 3]);
    assert_eq!(result_of(&sched, init), Ok(0));
    assert_eq!(sched.current(), other);
}

#[test]
fn the_frame_pointer_follows_the_current_task() {
    let mut w = World::new();
    let (mut sched, _) = booted(&mut w, fs_with_init(64));
    let frame = sched.current_frame_ptr();
    let top = sched.current_stack_top();
    assert_eq!(frame.addr() + size_of::<Registers>(), top);

    w.run(|mem| sched.fork(mem)).unwrap();
    w.run(|mem| sched.switch_tasks(mem));
    assert_ne!(sched.current_stack_top(), top);
}
