use crate::Errno;

/// System call numbers, passed in `eax`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Sysno {
    /// Reserved; returns 0.
    Setup = 0,
    /// `exit(code) -> !`
    Exit = 1,
    /// `fork() -> pid` (0 in the child)
    Fork = 2,
    /// `read(fd, buf, len) -> bytes`
    Read = 3,
    /// `write(fd, buf, len) -> bytes`
    Write = 4,
    /// `open(path, len, mode) -> fd`
    Open = 5,
    /// `close(fd) -> 0`
    Close = 6,
    /// `waitpid(pid, status_ptr) -> pid`
    WaitPid = 7,
    /// `execve(path, len) -> !`
    Execve = 11,
    /// `yield() -> 0`
    Yield = 12,
}

impl TryFrom<u32> for Sysno {
    type Error = Errno;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Setup,
            1 => Self::Exit,
            2 => Self::Fork,
            3 => Self::Read,
            4 => Self::Write,
            5 => Self::Open,
            6 => Self::Close,
            7 => Self::WaitPid,
            11 => Self::Execve,
            12 => Self::Yield,
            _ => return Err(Errno::ENOSYS),
        })
    }
}

impl From<Sysno> for u32 {
    fn from(value: Sysno) -> Self {
        value as Self
    }
}
