//! `int 0x80` dispatch.

use super::{Scheduler, WaitStatus};
use crate::TaskError;
use crate::fs::{FileSystem, OpenMode};
use crate::memory::MemoryContext;
use crate::task::Pid;
use crate::user::{check_user_range, copy_from_user, copy_to_user};
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{Errno, SysResult, Sysno, encode_result};
use kernel_vmem::{FrameAlloc, PageTableView, PhysMapper};
use log::{trace, warn};

/// Longest path a task may pass to `open` or `execve`.
pub const PATH_MAX: usize = 256;

impl<F: FileSystem> Scheduler<F> {
    /// Handle the system call described by the current task's trap frame.
    ///
    /// The result is written into the caller's `eax` unless the call does
    /// not return to it: `exit`, a successful `execve`, or a `waitpid` that
    /// blocked (that one is re-issued when the caller is woken).
    pub fn syscall<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
    ) {
        let caller = self.current;
        if caller == Pid::IDLE {
            warn!("system call from the idle task ignored");
            return;
        }

        let frame = *self.current_task().frame();
        let (a, b, c) = (frame.ebx, frame.ecx, frame.edx);

        let sysno = match Sysno::try_from(frame.eax) {
            Ok(sysno) => sysno,
            Err(errno) => {
                warn!("task {caller}: unknown system call {}", frame.eax);
                self.set_result(caller, Err(errno));
                return;
            }
        };
        trace!("task {caller}: {sysno:?}({a:#x}, {b:#x}, {c:#x})");

        let result: SysResult = match sysno {
            Sysno::Setup => Ok(0),
            Sysno::Exit => {
                self.exit(mem, a.cast_signed());
                return;
            }
            Sysno::Fork => self.fork(mem).map(|pid| pid.0).map_err(Errno::from),
            Sysno::Read => self
                .read(mem, a, VirtualAddress::new(b), c as usize)
                .map_err(Errno::from),
            Sysno::Write => self
                .write(mem, a, VirtualAddress::new(b), c as usize)
                .map_err(Errno::from),
            Sysno::Open => self.sys_open(mem, a, b, c).map_err(Errno::from),
            Sysno::Close => self.close(a).map(|()| 0).map_err(Errno::from),
            Sysno::WaitPid => match self.sys_waitpid(mem, Pid(a), b) {
                Ok(Some(pid)) => Ok(pid),
                Ok(None) => {
                    if let Some(task) = self.task_mut(caller) {
                        task.frame_mut().restart_syscall();
                    }
                    return;
                }
                Err(e) => Err(e.into()),
            },
            Sysno::Execve => match self.sys_execve(mem, a, b) {
                Ok(()) => return,
                Err(e) => Err(e.into()),
            },
            Sysno::Yield => {
                self.set_result(caller, Ok(0));
                self.switch_tasks(mem);
                return;
            }
        };

        self.set_result(caller, result);
    }

    fn set_result(&mut self, pid: Pid, result: SysResult) {
        if let Err(errno) = result {
            trace!("task {pid}: {errno}");
        }
        if let Some(task) = self.task_mut(pid) {
            task.frame_mut().eax = encode_result(result);
        }
    }

    fn sys_open<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &MemoryContext<'_, V, M, A>,
        path: u32,
        len: u32,
        mode: u32,
    ) -> Result<u32, TaskError> {
        let mode = OpenMode::from_raw(mode).ok_or(TaskError::InvalidArgument)?;
        let mut buf = [0u8; PATH_MAX];
        let path = user_path(mem, path, len, &mut buf)?;
        self.open(path, mode)
    }

    /// `Ok(None)` if the caller was put to sleep.
    fn sys_waitpid<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        pid: Pid,
        status: u32,
    ) -> Result<Option<u32>, TaskError> {
        let status = VirtualAddress::new(status);
        let report = status.as_u32() != 0;
        if report {
            check_user_range(mem.live, status, size_of::<i32>(), true)?;
        }

        match self.wait(mem, pid)? {
            WaitStatus::Exited(code) => {
                if report {
                    copy_to_user(mem.live, mem.mapper, status, &code.to_le_bytes())?;
                }
                Ok(Some(pid.0))
            }
            WaitStatus::Blocked => Ok(None),
        }
    }

    fn sys_execve<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &mut MemoryContext<'_, V, M, A>,
        path: u32,
        len: u32,
    ) -> Result<(), TaskError> {
        let mut buf = [0u8; PATH_MAX];
        let path = user_path(mem, path, len, &mut buf)?;
        self.exec(mem, path)
    }
}

/// Copy a path of `len` bytes out of user memory.
fn user_path<'b, V: PageTableView, M: PhysMapper, A: FrameAlloc>(
    mem: &MemoryContext<'_, V, M, A>,
    va: u32,
    len: u32,
    buf: &'b mut [u8; PATH_MAX],
) -> Result<&'b str, TaskError> {
    let len = len as usize;
    if len == 0 || len > PATH_MAX {
        return Err(TaskError::InvalidArgument);
    }
    let buf = &mut buf[..len];
    copy_from_user(mem.live, mem.mapper, VirtualAddress::new(va), buf)?;
    core::str::from_utf8(buf).map_err(|_| TaskError::InvalidArgument)
}
