//! # Filesystem collaborator
//!
//! The scheduler does not implement a filesystem. It opens program images
//! and the standard descriptors through a [`FileSystem`] supplied by the
//! kernel (an initrd in practice, an in-memory map in tests).

/// Access mode requested by `open`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum OpenMode {
    Read = 1 << 0,
    Write = 1 << 1,
}

impl OpenMode {
    /// Decode the `mode` argument of the `open` system call.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("operation not permitted by the open mode")]
    BadMode,
    #[error("input/output error")]
    Io,
}

/// An open file: the filesystem's handle plus the descriptor's position.
#[derive(Debug)]
pub struct OpenFile<H> {
    pub handle: H,
    pub offset: u32,
}

impl<H> OpenFile<H> {
    #[must_use]
    pub const fn new(handle: H) -> Self {
        Self { handle, offset: 0 }
    }
}

pub trait FileSystem {
    type Handle;

    /// Resolve `path` and open it.
    ///
    /// # Errors
    /// [`FsError::NotFound`] if nothing lives at `path`, or whatever the
    /// filesystem refuses.
    fn open_path(&mut self, path: &str, mode: OpenMode) -> Result<Self::Handle, FsError>;

    /// Size of the file in bytes.
    fn length(&self, handle: &Self::Handle) -> u32;

    /// Read at `*offset`, advancing it by the number of bytes transferred.
    ///
    /// # Errors
    /// Device or mode errors.
    fn read(
        &mut self,
        handle: &Self::Handle,
        offset: &mut u32,
        buf: &mut [u8],
    ) -> Result<usize, FsError>;

    /// Write at `*offset`, advancing it by the number of bytes transferred.
    ///
    /// # Errors
    /// Device or mode errors.
    fn write(&mut self, handle: &Self::Handle, offset: &mut u32, buf: &[u8])
    -> Result<usize, FsError>;

    fn close(&mut self, handle: Self::Handle);
}
