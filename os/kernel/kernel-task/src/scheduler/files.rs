use super::Scheduler;
use crate::TaskError;
use crate::fs::{FileSystem, OpenFile, OpenMode};
use crate::memory::MemoryContext;
use crate::user::{copy_from_user, copy_to_user};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{FrameAlloc, PageTableView, PhysMapper};
use log::trace;

/// Bytes moved between user memory and a file per filesystem call.
const CHUNK: usize = 256;

impl<F: FileSystem> Scheduler<F> {
    /// Open `path` on the lowest free descriptor of the current task.
    ///
    /// # Errors
    /// Filesystem errors, or [`TaskError::TooManyFiles`] (the file is
    /// closed again).
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<u32, TaskError> {
        let handle = self.fs.open_path(path, mode)?;
        let pid = self.current;
        let Some(task) = self.tasks.get_mut(&pid) else {
            self.fs.close(handle);
            return Err(TaskError::InvalidArgument);
        };
        match task.files.install(OpenFile::new(handle)) {
            Ok(fd) => {
                trace!("task {pid} opened {path} as {fd}");
                u32::try_from(fd).map_err(|_| TaskError::TooManyFiles)
            }
            Err((e, file)) => {
                self.fs.close(file.handle);
                Err(e)
            }
        }
    }

    /// # Errors
    /// [`TaskError::BadFileDescriptor`] if `fd` is not open.
    pub fn close(&mut self, fd: u32) -> Result<(), TaskError> {
        let file = self.current_task_mut().files.take(fd)?;
        self.fs.close(file.handle);
        Ok(())
    }

    /// Read up to `len` bytes from `fd` into user memory at `buf`.
    ///
    /// # Errors
    /// [`TaskError::Fault`] if the buffer is not user-writable,
    /// [`TaskError::BadFileDescriptor`], or the filesystem's error when it
    /// fails before any byte was read.
    pub fn read<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &MemoryContext<'_, V, M, A>,
        fd: u32,
        buf: VirtualAddress,
        len: usize,
    ) -> Result<u32, TaskError> {
        crate::user::check_user_range(mem.live, buf, len, true)?;
        let pid = self.current;
        let Some(task) = self.tasks.get_mut(&pid) else {
            return Err(TaskError::BadFileDescriptor);
        };
        let file = task.files.get_mut(fd)?;

        let mut chunk = [0u8; CHUNK];
        let mut done = 0usize;
        let failure = loop {
            if done >= len {
                break None;
            }
            let want = CHUNK.min(len - done);
            let n = match self.fs.read(&file.handle, &mut file.offset, &mut chunk[..want]) {
                Ok(n) => n,
                Err(e) => break Some(e.into()),
            };
            if let Err(e) = offset(buf, done)
                .and_then(|at| copy_to_user(mem.live, mem.mapper, at, &chunk[..n]))
            {
                break Some(e);
            }
            done += n;
            if n < want {
                break None;
            }
        };
        transferred(done, failure)
    }

    /// Write `len` bytes of user memory at `buf` to `fd`.
    ///
    /// # Errors
    /// [`TaskError::Fault`] if the buffer is not user-readable,
    /// [`TaskError::BadFileDescriptor`], or the filesystem's error when it
    /// fails before any byte was written.
    pub fn write<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mem: &MemoryContext<'_, V, M, A>,
        fd: u32,
        buf: VirtualAddress,
        len: usize,
    ) -> Result<u32, TaskError> {
        crate::user::check_user_range(mem.live, buf, len, false)?;
        let pid = self.current;
        let Some(task) = self.tasks.get_mut(&pid) else {
            return Err(TaskError::BadFileDescriptor);
        };
        let file = task.files.get_mut(fd)?;

        let mut chunk = [0u8; CHUNK];
        let mut done = 0usize;
        let failure = loop {
            if done >= len {
                break None;
            }
            let want = CHUNK.min(len - done);
            if let Err(e) = offset(buf, done)
                .and_then(|at| copy_from_user(mem.live, mem.mapper, at, &mut chunk[..want]))
            {
                break Some(e);
            }
            let n = match self.fs.write(&file.handle, &mut file.offset, &chunk[..want]) {
                Ok(n) => n,
                Err(e) => break Some(e.into()),
            };
            done += n;
            if n < want {
                break None;
            }
        };
        transferred(done, failure)
    }
}

/// Bytes moved so far win over a failure that cut the transfer short.
fn transferred(done: usize, failure: Option<TaskError>) -> Result<u32, TaskError> {
    match failure {
        Some(e) if done == 0 => Err(e),
        Some(e) => {
            trace!("short transfer of {done} bytes: {e}");
            u32::try_from(done).map_err(|_| TaskError::InvalidArgument)
        }
        None => u32::try_from(done).map_err(|_| TaskError::InvalidArgument),
    }
}

fn offset(va: VirtualAddress, by: usize) -> Result<VirtualAddress, TaskError> {
    u32::try_from(by)
        .ok()
        .and_then(|by| va.checked_add(by))
        .ok_or(TaskError::Fault)
}
