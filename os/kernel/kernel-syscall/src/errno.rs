use kernel_vmem::MapError;

/// Error codes returned to user space, negated.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum Errno {
    #[error("no such file or directory")]
    ENOENT = 2,
    #[error("input/output error")]
    EIO = 5,
    #[error("bad file descriptor")]
    EBADF = 9,
    #[error("no child processes")]
    ECHILD = 10,
    #[error("out of memory")]
    ENOMEM = 12,
    #[error("bad address")]
    EFAULT = 14,
    #[error("not a directory")]
    ENOTDIR = 20,
    #[error("is a directory")]
    EISDIR = 21,
    #[error("invalid argument")]
    EINVAL = 22,
    #[error("too many open files")]
    ENFILE = 23,
    #[error("function not implemented")]
    ENOSYS = 38,
}

impl Errno {
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// The value a failing system call leaves in `eax`.
    #[must_use]
    pub const fn as_negative(self) -> i32 {
        -self.code()
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            2 => Self::ENOENT,
            5 => Self::EIO,
            9 => Self::EBADF,
            10 => Self::ECHILD,
            12 => Self::ENOMEM,
            14 => Self::EFAULT,
            20 => Self::ENOTDIR,
            21 => Self::EISDIR,
            22 => Self::EINVAL,
            23 => Self::ENFILE,
            38 => Self::ENOSYS,
            _ => return None,
        })
    }
}

impl From<MapError> for Errno {
    fn from(e: MapError) -> Self {
        match e {
            MapError::OutOfMemory => Self::ENOMEM,
            MapError::AlreadyMapped => Self::EINVAL,
            MapError::NotMapped => Self::EFAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_abi() {
        assert_eq!(Errno::ENOENT.as_negative(), -2);
        assert_eq!(Errno::EBADF.as_negative(), -9);
        assert_eq!(Errno::ENOMEM.as_negative(), -12);
        assert_eq!(Errno::ENFILE.as_negative(), -23);
        assert_eq!(Errno::ENOSYS.as_negative(), -38);
    }

    #[test]
    fn from_code_inverts_code() {
        for errno in [Errno::EIO, Errno::ECHILD, Errno::EFAULT, Errno::EISDIR] {
            assert_eq!(Errno::from_code(errno.code()), Some(errno));
        }
        assert_eq!(Errno::from_code(1), None);
    }

    #[test]
    fn map_errors_translate() {
        assert_eq!(Errno::from(MapError::OutOfMemory), Errno::ENOMEM);
        assert_eq!(Errno::from(MapError::NotMapped), Errno::EFAULT);
    }
}
