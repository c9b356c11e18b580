use crate::TaskError;
use crate::fs::{FileSystem, OpenFile, OpenMode};
use kernel_info::scheduler::{TASK_MAX_FILES, TERMINAL_DEVICE};
use log::{debug, trace};

/// Per-task descriptor table.
pub struct FileTable<H> {
    slots: [Option<OpenFile<H>>; TASK_MAX_FILES],
}

impl<H> Default for FileTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> FileTable<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    /// Open the terminal on descriptors 0 (read), 1 and 2 (write).
    ///
    /// Missing descriptors are left empty if the terminal does not exist.
    pub fn open_standard<F: FileSystem<Handle = H>>(&mut self, fs: &mut F) {
        let modes = [OpenMode::Read, OpenMode::Write, OpenMode::Write];
        for (fd, mode) in modes.into_iter().enumerate() {
            match fs.open_path(TERMINAL_DEVICE, mode) {
                Ok(handle) => self.slots[fd] = Some(OpenFile::new(handle)),
                Err(e) => debug!("descriptor {fd}: {TERMINAL_DEVICE}: {e}"),
            }
        }
    }

    /// Put `file` in the lowest free slot.
    ///
    /// # Errors
    /// [`TaskError::TooManyFiles`] when every slot is taken; `file` is
    /// handed back so the caller can close it.
    pub fn install(&mut self, file: OpenFile<H>) -> Result<usize, (TaskError, OpenFile<H>)> {
        match self.slots.iter().position(Option::is_none) {
            Some(fd) => {
                self.slots[fd] = Some(file);
                trace!("installed descriptor {fd}");
                Ok(fd)
            }
            None => Err((TaskError::TooManyFiles, file)),
        }
    }

    /// # Errors
    /// [`TaskError::BadFileDescriptor`] for an empty or out-of-range slot.
    pub fn get_mut(&mut self, fd: u32) -> Result<&mut OpenFile<H>, TaskError> {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.slots.get_mut(fd))
            .and_then(Option::as_mut)
            .ok_or(TaskError::BadFileDescriptor)
    }

    /// Remove the file in slot `fd`.
    ///
    /// # Errors
    /// [`TaskError::BadFileDescriptor`] for an empty or out-of-range slot.
    pub fn take(&mut self, fd: u32) -> Result<OpenFile<H>, TaskError> {
        usize::try_from(fd)
            .ok()
            .and_then(|fd| self.slots.get_mut(fd))
            .and_then(Option::take)
            .ok_or(TaskError::BadFileDescriptor)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Close every open descriptor.
    pub fn close_all<F: FileSystem<Handle = H>>(&mut self, fs: &mut F) {
        for (fd, slot) in self.slots.iter_mut().enumerate() {
            if let Some(file) = slot.take() {
                trace!("closing descriptor {fd}");
                fs.close(file.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemFs;

    #[test]
    fn standard_descriptors_open_on_the_terminal() {
        let mut fs = MemFs::with_terminal();
        let mut table = FileTable::new();
        table.open_standard(&mut fs);
        assert_eq!(table.open_count(), 3);
        assert_eq!(fs.open_handles(), 3);
    }

    #[test]
    fn no_terminal_leaves_standard_descriptors_empty() {
        let mut fs = MemFs::default();
        let mut table = FileTable::new();
        table.open_standard(&mut fs);
        assert_eq!(table.open_count(), 0);
        assert!(matches!(table.get_mut(0), Err(TaskError::BadFileDescriptor)));
    }

    #[test]
    fn install_takes_the_lowest_free_slot() {
        let mut fs = MemFs::with_terminal();
        fs.add_file("/a", b"a");
        let mut table = FileTable::new();
        table.open_standard(&mut fs);
        table.take(1).map(|f| fs.close(f.handle)).unwrap();

        let h = fs.open_path("/a", OpenMode::Read).unwrap();
        assert_eq!(table.install(OpenFile::new(h)).ok(), Some(1));
        let h = fs.open_path("/a", OpenMode::Read).unwrap();
        assert_eq!(table.install(OpenFile::new(h)).ok(), Some(3));
    }

    #[test]
    fn full_table_hands_the_file_back() {
        let mut fs = MemFs::default();
        fs.add_file("/a", b"a");
        let mut table = FileTable::new();
        for _ in 0..TASK_MAX_FILES {
            let h = fs.open_path("/a", OpenMode::Read).unwrap();
            assert!(table.install(OpenFile::new(h)).is_ok());
        }
        let h = fs.open_path("/a", OpenMode::Read).unwrap();
        let Err((e, file)) = table.install(OpenFile::new(h)) else {
            panic!("table should be full");
        };
        assert_eq!(e, TaskError::TooManyFiles);
        fs.close(file.handle);

        table.close_all(&mut fs);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn out_of_range_descriptors_are_bad() {
        let mut table = FileTable::<u32>::new();
        assert!(matches!(table.take(u32::MAX), Err(TaskError::BadFileDescriptor)));
        assert!(matches!(table.get_mut(128), Err(TaskError::BadFileDescriptor)));
    }
}
