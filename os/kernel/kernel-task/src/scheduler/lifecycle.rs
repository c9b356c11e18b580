//! `fork`, `exec`, `exit` and `wait`.

use super::Scheduler;
use crate::TaskError;
use crate::fs::{FileSystem, OpenMode};
use crate::memory::MemoryContext;
use crate::registers::Registers;
use crate::task::{Pid, TaskStatus};
use alloc::vec::Vec;
use kernel_info::memory::{USER_ENTRY, USER_STACK_TOP};
use kernel_vmem::{FrameAlloc, PageTableView, PhysMapper};
use log::{debug, error, info};

/// Outcome of [`Scheduler::wait`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitStatus {
    /// The child had finished and was reaped.
    Exited(i32),
    /// The child is still alive; the caller was put to sleep.
    Blocked,
}

impl<F: FileSystem> Scheduler<F> {
    /// Duplicate the current task.
    ///
    /// The child gets an eager copy of the caller's address space and a
    /// verbatim copy of its kernel stack, so it resumes from the same trap
    /// frame with `eax` cleared. Returns the child's pid.
    ///
    /// # Errors
    /// [`TaskError::OutOfMemory`]; nothing of the child remains.
    /// [`TaskError::InvalidArgument`] when called from the idle task.
    pub fn fork<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) -> Result<Pid, TaskError> {
        let parent = self.current;
        let Some(task) = self.tasks.get(&parent) else {
            return Err(TaskError::InvalidArgument);
        };

        mem.save(&task.space);
        let space = mem.clone_space(&task.space)?;
        let Some(mut kstack) = task.kstack.try_clone() else {
            mem.free_space(space);
            return Err(TaskError::OutOfMemory);
        };
        kstack.frame.eax = 0;

        let child = self.insert(mem, space, kstack, Some(parent))?;
        debug!("forked task {parent} into {child}");
        Ok(child)
    }

    /// Replace the current task's program with the flat binary at `path`.
    ///
    /// On success the task's old address space is gone and its trap frame
    /// enters the new image at [`USER_ENTRY`] in ring 3; returning from the
    /// interrupt starts it. On failure nothing changed.
    ///
    /// # Errors
    /// Filesystem errors, [`TaskError::Io`] for a short read,
    /// [`TaskError::OutOfMemory`].
    pub fn exec<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        path: &str,
    ) -> Result<(), TaskError> {
        let pid = self.current;
        if pid == Pid::IDLE {
            return Err(TaskError::InvalidArgument);
        }

        let image = self.read_file(path)?;

        let mut space = mem.alloc_space()?;
        let mapped = space
            .map_as_data(mem.mapper, mem.frames, &image)
            .and_then(|()| space.map_as_stack(mem.mapper, mem.frames));
        if let Err(e) = mapped {
            debug!("exec {path} in task {pid} failed: {e}");
            mem.free_space(space);
            return Err(e.into());
        }

        let task = self.current_task_mut();
        let old = core::mem::replace(&mut task.space, space);
        mem.switch(Some(&old), &task.space);
        *task.frame_mut() = Registers::user(USER_ENTRY, USER_STACK_TOP);
        let brk = task.space.brk();
        mem.free_space(old);

        info!("task {pid} exec {path} ({} bytes, brk {brk})", image.len());
        Ok(())
    }

    /// Read a whole file into memory.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, TaskError> {
        let handle = self.fs.open_path(path, OpenMode::Read)?;
        let result = read_all(&mut self.fs, &handle);
        self.fs.close(handle);
        result
    }

    /// Finish the current task with `code` and switch away from it.
    ///
    /// Children are killed along with it. Its descriptors are closed now;
    /// its memory is released when the parent reaps it (or at the next
    /// switch if it has no parent). A parent blocked in `wait` is woken.
    ///
    /// # Panics
    /// If the idle task exits.
    pub fn exit<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        code: i32,
    ) {
        let pid = self.current;
        let Some(task) = self.tasks.get_mut(&pid) else {
            error!("idle task tried to exit with code {code}");
            panic!("idle task exited");
        };

        task.exit_code = code;
        task.files.close_all(&mut self.fs);
        let children = core::mem::take(&mut task.children);
        let parent = task.parent;
        self.requeue(pid, TaskStatus::Finished);
        info!("task {pid} exited with code {code}");

        for child in children {
            self.kill(mem, child);
        }
        if let Some(parent) = parent {
            self.wake(parent);
        }

        self.switch_tasks(mem);
    }

    /// Remove `pid` and all of its descendants immediately.
    fn kill<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        pid: Pid,
    ) {
        let mut doomed = alloc::vec![pid];
        while let Some(pid) = doomed.pop() {
            let Some(mut task) = self.tasks.remove(&pid) else {
                continue;
            };
            self.unlink(pid, task.status);
            doomed.append(&mut task.children);
            debug!("killing task {pid}");
            self.free_task(mem, task);
        }
    }

    /// Reap the child `pid` of the current task if it has finished;
    /// otherwise put the caller to sleep.
    ///
    /// A blocked caller must retry once woken (the child's exit wakes it).
    ///
    /// # Errors
    /// [`TaskError::NoSuchChild`] if `pid` is not a child of the caller.
    pub fn wait<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        pid: Pid,
    ) -> Result<WaitStatus, TaskError> {
        let me = self.current;
        if !self.current_task().children.contains(&pid) {
            return Err(TaskError::NoSuchChild);
        }

        match self.tasks.get(&pid).map(|t| t.status) {
            Some(TaskStatus::Finished) => {
                self.current_task_mut().children.retain(|&c| c != pid);
                self.unlink(pid, TaskStatus::Finished);
                let Some(child) = self.tasks.remove(&pid) else {
                    unreachable!("finished child {pid} vanished");
                };
                let code = child.exit_code;
                self.free_task(mem, child);
                debug!("task {me} reaped {pid} (code {code})");
                Ok(WaitStatus::Exited(code))
            }
            Some(_) => {
                debug!("task {me} waiting for {pid}");
                self.sleep(mem);
                Ok(WaitStatus::Blocked)
            }
            None => Err(TaskError::NoSuchChild),
        }
    }
}

fn read_all<F: FileSystem>(fs: &mut F, handle: &F::Handle) -> Result<Vec<u8>, TaskError> {
    let len = fs.length(handle) as usize;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| TaskError::OutOfMemory)?;
    data.resize(len, 0);

    let mut offset = 0u32;
    let mut done = 0usize;
    while done < len {
        let n = fs.read(handle, &mut offset, &mut data[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }

    if done < len {
        return Err(TaskError::Io);
    }
    Ok(data)
}
