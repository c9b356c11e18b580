use crate::fs::FsError;
use kernel_syscall::Errno;
use kernel_vmem::MapError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("is a directory")]
    IsADirectory,
    #[error("input/output error")]
    Io,
    #[error("no such child process")]
    NoSuchChild,
    #[error("bad user address")]
    Fault,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many open files")]
    TooManyFiles,
}

impl From<MapError> for TaskError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory => Self::OutOfMemory,
            MapError::AlreadyMapped => Self::InvalidArgument,
            MapError::NotMapped => Self::Fault,
        }
    }
}

impl From<FsError> for TaskError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => Self::NotFound,
            FsError::IsADirectory => Self::IsADirectory,
            FsError::NotADirectory => Self::NotADirectory,
            FsError::BadMode => Self::BadFileDescriptor,
            FsError::Io => Self::Io,
        }
    }
}

impl From<TaskError> for Errno {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::OutOfMemory => Self::ENOMEM,
            TaskError::NotFound => Self::ENOENT,
            TaskError::NotADirectory => Self::ENOTDIR,
            TaskError::BadFileDescriptor => Self::EBADF,
            TaskError::IsADirectory => Self::EISDIR,
            TaskError::Io => Self::EIO,
            TaskError::NoSuchChild => Self::ECHILD,
            TaskError::Fault => Self::EFAULT,
            TaskError::InvalidArgument => Self::EINVAL,
            TaskError::TooManyFiles => Self::ENFILE,
        }
    }
}
