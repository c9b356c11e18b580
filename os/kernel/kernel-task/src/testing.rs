//! An in-memory [`FileSystem`] for tests.

use crate::fs::{FileSystem, FsError, OpenMode};
use kernel_info::scheduler::TERMINAL_DEVICE;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    open: Vec<Option<(String, OpenMode)>>,
    /// Everything written to the terminal.
    pub tty: Vec<u8>,
    /// Files appear to end at this offset even though `length` reports
    /// their full size.
    pub read_limit: Option<usize>,
    /// Reads and writes starting at or past this offset fail with
    /// [`FsError::Io`].
    pub io_error_from: Option<u32>,
}

impl MemFs {
    pub fn with_terminal() -> Self {
        let mut fs = Self::default();
        fs.files.insert(TERMINAL_DEVICE.into(), Vec::new());
        fs
    }

    pub fn add_file(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.into(), data.to_vec());
    }

    pub fn add_dir(&mut self, path: &str) {
        self.dirs.insert(path.into());
    }

    pub fn contents(&self, path: &str) -> &[u8] {
        &self.files[path]
    }

    pub fn open_handles(&self) -> usize {
        self.open.iter().flatten().count()
    }

    fn entry(&self, handle: usize) -> &(String, OpenMode) {
        self.open[handle].as_ref().expect("handle is open")
    }
}

impl FileSystem for MemFs {
    type Handle = usize;

    fn open_path(&mut self, path: &str, mode: OpenMode) -> Result<usize, FsError> {
        if self.dirs.contains(path) {
            return Err(FsError::IsADirectory);
        }
        if !self.files.contains_key(path) {
            return Err(FsError::NotFound);
        }
        self.open.push(Some((path.into(), mode)));
        Ok(self.open.len() - 1)
    }

    fn length(&self, handle: &usize) -> u32 {
        let (path, _) = self.entry(*handle);
        u32::try_from(self.files[path].len()).unwrap()
    }

    fn read(&mut self, handle: &usize, offset: &mut u32, buf: &mut [u8]) -> Result<usize, FsError> {
        let (path, mode) = self.entry(*handle);
        if *mode != OpenMode::Read {
            return Err(FsError::BadMode);
        }
        if self.io_error_from.is_some_and(|at| *offset >= at) {
            return Err(FsError::Io);
        }
        let data = &self.files[path];
        let end = self.read_limit.map_or(data.len(), |l| l.min(data.len()));
        let start = (*offset as usize).min(end);
        let n = buf.len().min(end - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *offset += u32::try_from(n).unwrap();
        Ok(n)
    }

    fn write(&mut self, handle: &usize, offset: &mut u32, buf: &[u8]) -> Result<usize, FsError> {
        let (path, mode) = self.entry(*handle).clone();
        if mode != OpenMode::Write {
            return Err(FsError::BadMode);
        }
        if self.io_error_from.is_some_and(|at| *offset >= at) {
            return Err(FsError::Io);
        }
        if path == TERMINAL_DEVICE {
            self.tty.extend_from_slice(buf);
        } else {
            let data = self.files.get_mut(&path).unwrap();
            let start = *offset as usize;
            if data.len() < start + buf.len() {
                data.resize(start + buf.len(), 0);
            }
            data[start..start + buf.len()].copy_from_slice(buf);
        }
        *offset += u32::try_from(buf.len()).unwrap();
        Ok(buf.len())
    }

    fn close(&mut self, handle: usize) {
        assert!(self.open[handle].take().is_some(), "handle closed twice");
    }
}
