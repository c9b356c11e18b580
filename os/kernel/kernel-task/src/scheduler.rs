//! # Round-robin scheduler
//!
//! Every task except the idle task is in exactly one of three queues:
//!
//! | Queue     | Status                   | Leaves by                    |
//! |-----------|--------------------------|------------------------------|
//! | `running` | [`TaskStatus::Running`]  | `sleep`, `exit`, kill        |
//! | `blocked` | [`TaskStatus::Blocked`]  | `wake`, kill                 |
//! | `zombies` | [`TaskStatus::Finished`] | reaped by `wait` or orphaned |
//!
//! The current task is the head of `running`, or the idle task (pid 0) when
//! `running` is empty. The idle task is never queued.
//!
//! The scheduler only does bookkeeping. The kernel's entry stubs resume
//! whatever task is [`current`](Scheduler::current) after each interrupt by
//! loading `esp` from [`current_frame_ptr`](Scheduler::current_frame_ptr)
//! and `esp0` from [`current_stack_top`](Scheduler::current_stack_top).

mod files;
mod lifecycle;
mod syscalls;
#[cfg(test)]
mod tests;

use crate::file_table::FileTable;
use crate::fs::FileSystem;
use crate::memory::MemoryContext;
use crate::registers::Registers;
use crate::task::{KernelStack, Pid, Task, TaskStatus};
use crate::TaskError;
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use kernel_info::scheduler::TICKS_PER_SLICE;
use kernel_vmem::{AddressSpace, FrameAlloc, PageTableView, PhysMapper};
use log::{debug, trace};

pub use lifecycle::WaitStatus;
pub use syscalls::PATH_MAX;

pub struct Scheduler<F: FileSystem> {
    fs: F,
    tasks: BTreeMap<Pid, Box<Task<F::Handle>>>,
    idle: Box<Task<F::Handle>>,
    running: VecDeque<Pid>,
    blocked: VecDeque<Pid>,
    zombies: VecDeque<Pid>,
    current: Pid,
    next_pid: u32,
    ticks: u32,
}

impl<F: FileSystem> Scheduler<F> {
    /// Create the scheduler with its idle task and make the idle task's
    /// address space live.
    ///
    /// The idle task resumes at `idle_entry` in ring 0 with interrupts
    /// enabled; it should loop on `sti; hlt`.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`] if the idle task cannot be allocated.
    pub fn new<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        fs: F,
        mem: &mut MemoryContext<'_, V, M, A>,
        idle_entry: u32,
    ) -> Result<Self, TaskError> {
        let space = mem.alloc_space()?;
        let Some(mut kstack) = KernelStack::try_new() else {
            mem.free_space(space);
            return Err(TaskError::OutOfMemory);
        };
        kstack.frame = Registers::kernel(idle_entry);
        mem.switch(None, &space);

        let idle = Box::new(Task {
            pid: Pid::IDLE,
            parent: None,
            children: Vec::new(),
            status: TaskStatus::Running,
            exit_code: 0,
            space,
            kstack,
            files: FileTable::new(),
        });
        debug!("created idle task");

        Ok(Self {
            fs,
            tasks: BTreeMap::new(),
            idle,
            running: VecDeque::new(),
            blocked: VecDeque::new(),
            zombies: VecDeque::new(),
            current: Pid::IDLE,
            next_pid: 1,
            ticks: 0,
        })
    }

    #[must_use]
    pub const fn current(&self) -> Pid {
        self.current
    }

    #[must_use]
    pub fn current_task(&self) -> &Task<F::Handle> {
        self.task(self.current)
            .unwrap_or_else(|| unreachable!("current task {} vanished", self.current))
    }

    fn current_task_mut(&mut self) -> &mut Task<F::Handle> {
        let pid = self.current;
        self.task_mut(pid)
            .unwrap_or_else(|| unreachable!("current task {pid} vanished"))
    }

    /// The frame the entry stubs return into.
    pub fn current_frame_ptr(&mut self) -> *mut Registers {
        core::ptr::from_mut(self.current_task_mut().frame_mut())
    }

    /// Kernel stack top of the current task, for the TSS.
    #[must_use]
    pub fn current_stack_top(&self) -> usize {
        self.current_task().kernel_stack().top()
    }

    /// Look up any task, including the idle task.
    #[must_use]
    pub fn task(&self, pid: Pid) -> Option<&Task<F::Handle>> {
        if pid == Pid::IDLE {
            Some(&self.idle)
        } else {
            self.tasks.get(&pid).map(|t| &**t)
        }
    }

    fn task_mut(&mut self, pid: Pid) -> Option<&mut Task<F::Handle>> {
        if pid == Pid::IDLE {
            Some(&mut self.idle)
        } else {
            self.tasks.get_mut(&pid).map(|t| &mut **t)
        }
    }

    pub const fn filesystem(&self) -> &F {
        &self.fs
    }

    /// Number of tasks, not counting the idle task.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn running(&self) -> impl Iterator<Item = Pid> + '_ {
        self.running.iter().copied()
    }

    pub fn blocked(&self) -> impl Iterator<Item = Pid> + '_ {
        self.blocked.iter().copied()
    }

    pub fn zombies(&self) -> impl Iterator<Item = Pid> + '_ {
        self.zombies.iter().copied()
    }

    const fn queue_mut(&mut self, status: TaskStatus) -> &mut VecDeque<Pid> {
        match status {
            TaskStatus::Running => &mut self.running,
            TaskStatus::Blocked => &mut self.blocked,
            TaskStatus::Finished => &mut self.zombies,
        }
    }

    /// Move `pid` from the queue of its current status to the queue of
    /// `status`.
    fn requeue(&mut self, pid: Pid, status: TaskStatus) {
        let Some(task) = self.tasks.get_mut(&pid) else {
            unreachable!("requeue of unknown task {pid}");
        };
        let from = core::mem::replace(&mut task.status, status);
        self.unlink(pid, from);
        self.queue_mut(status).push_back(pid);
        trace!("task {pid}: {from:?} -> {status:?}");
    }

    fn unlink(&mut self, pid: Pid, status: TaskStatus) {
        let queue = self.queue_mut(status);
        if let Some(i) = queue.iter().position(|&p| p == pid) {
            queue.remove(i);
        }
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Add a task with a fresh address space and the standard descriptors to
    /// the run queue.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`].
    pub fn spawn<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        parent: Option<Pid>,
    ) -> Result<Pid, TaskError> {
        let space = mem.alloc_space()?;
        let Some(kstack) = KernelStack::try_new() else {
            mem.free_space(space);
            return Err(TaskError::OutOfMemory);
        };
        self.insert(mem, space, kstack, parent)
    }

    /// Register a new task around `space` and `kstack`.
    fn insert<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        space: AddressSpace,
        kstack: Box<KernelStack>,
        parent: Option<Pid>,
    ) -> Result<Pid, TaskError> {
        let reserved = self.running.try_reserve(1).is_ok()
            && parent.is_none_or(|p| {
                self.tasks
                    .get_mut(&p)
                    .is_some_and(|t| t.children.try_reserve(1).is_ok())
            });
        if !reserved {
            mem.free_space(space);
            return Err(TaskError::OutOfMemory);
        }

        let pid = self.alloc_pid();
        let mut files = FileTable::new();
        files.open_standard(&mut self.fs);
        let task = Box::new(Task {
            pid,
            parent,
            children: Vec::new(),
            status: TaskStatus::Running,
            exit_code: 0,
            space,
            kstack,
            files,
        });

        if let Some(parent) = parent.and_then(|p| self.tasks.get_mut(&p)) {
            parent.children.push(pid);
        }
        self.tasks.insert(pid, task);
        self.running.push_back(pid);
        debug!("task {pid} created");
        Ok(pid)
    }

    /// Round robin: requeue the current task at the tail if it is still
    /// running and make the head of the run queue (or the idle task)
    /// current.
    pub fn switch_tasks<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) {
        let old = self.current;
        if let Some(i) = self.running.iter().position(|&p| p == old) {
            self.running.remove(i);
            self.running.push_back(old);
        }
        let next = self.running.front().copied().unwrap_or(Pid::IDLE);

        if next != old {
            let (Some(from), Some(to)) = (self.task(old), self.task(next)) else {
                unreachable!("switch between unknown tasks {old} -> {next}");
            };
            let stats = mem.switch(Some(&from.space), &to.space);
            self.current = next;
            debug!(
                "switched task {old} -> {next} ({} slot(s) reloaded)",
                stats.reloaded
            );
        }

        self.reap_orphans(mem);
    }

    /// Count a timer tick; every [`TICKS_PER_SLICE`] ticks the current task
    /// is preempted. Returns `true` if another task became current.
    pub fn tick<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) -> bool {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % TICKS_PER_SLICE != 0 {
            return false;
        }
        let before = self.current;
        self.switch_tasks(mem);
        before != self.current
    }

    /// Block the current task and switch away from it.
    ///
    /// The idle task cannot sleep; the call is ignored for it.
    pub fn sleep<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) {
        let pid = self.current;
        if pid == Pid::IDLE {
            return;
        }
        self.requeue(pid, TaskStatus::Blocked);
        debug!("task {pid} sleeping");
        self.switch_tasks(mem);
    }

    /// Move `pid` from the blocked queue back to the run queue.
    ///
    /// Waking a task that is not blocked does nothing. Returns whether the
    /// task was woken.
    pub fn wake(&mut self, pid: Pid) -> bool {
        if !self.blocked.contains(&pid) {
            return false;
        }
        self.requeue(pid, TaskStatus::Running);
        debug!("task {pid} woken");
        true
    }

    /// Free a task that is neither current nor live.
    fn free_task<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        mut task: Box<Task<F::Handle>>,
    ) {
        debug_assert_ne!(task.pid, self.current);
        task.files.close_all(&mut self.fs);
        let Task { pid, space, .. } = *task;
        mem.free_space(space);
        trace!("task {pid} freed");
    }

    /// Free finished tasks nobody will wait for.
    fn reap_orphans<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) {
        let orphans: Vec<Pid> = self
            .zombies
            .iter()
            .copied()
            .filter(|&p| p != self.current)
            .filter(|p| self.tasks.get(p).is_some_and(|t| t.parent.is_none()))
            .collect();
        for pid in orphans {
            self.unlink(pid, TaskStatus::Finished);
            if let Some(task) = self.tasks.remove(&pid) {
                debug!("reaping orphan {pid}");
                self.free_task(mem, task);
            }
        }
    }
}
