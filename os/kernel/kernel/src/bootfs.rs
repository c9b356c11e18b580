//! # Boot filesystem
//!
//! A read-only view of the initrd module the boot loader left in physical
//! memory, mounted at `/init`, plus the terminal device at `/dev/tty`.
//!
//! The image is never mapped as a whole. Every access copies bytes out one
//! frame at a time through a [`PhysMapper`], so the kernel only ever needs
//! the temporary window to read it.
//!
//! ## Image layout
//!
//! All integers are little-endian `u32`; offsets are relative to the start
//! of the image.
//!
//! ```text
//! +-------+---------------------------------+-------------------------+
//! | count | count x {offset, length, flags} | file and directory data |
//! +-------+---------------------------------+-------------------------+
//! ```
//!
//! Inode `0` is the root directory. A directory's data is a sequence of
//! entries `{ino: u32, name: NUL-terminated bytes}`, each entry starting on
//! a 4-byte boundary.

use crate::phys::read_physical;
use kernel_info::scheduler::TERMINAL_DEVICE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_task::{FileSystem, FsError, OpenMode};
use kernel_vmem::PhysMapper;

/// Where the image's root directory appears in the path namespace.
pub const MOUNT_POINT: &str = "/init";

const ROOT_INODE: u32 = 0;
const HEADER_SIZE: u32 = 4;
const INODE_SIZE: u32 = 12;
const FLAG_DIRECTORY: u32 = 1 << 1;

/// Longest directory entry name, including its terminator.
const NAME_MAX: u32 = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Inode {
    offset: u32,
    length: u32,
    flags: u32,
}

impl Inode {
    const fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }
}

/// An open file on the boot filesystem.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootHandle {
    /// A regular file inside the image.
    File { data: u32, length: u32 },
    /// The terminal: writes go to the debug console, reads see nothing.
    Terminal,
}

pub struct BootFs<M> {
    mapper: M,
    start: PhysicalAddress,
    len: u32,
    count: u32,
}

impl<M: PhysMapper> BootFs<M> {
    /// Mount the image of `len` bytes at physical address `start`.
    ///
    /// # Errors
    /// [`FsError::Io`] if the image is too short for its own inode table.
    pub fn new(mapper: M, start: PhysicalAddress, len: u32) -> Result<Self, FsError> {
        let mut fs = Self {
            mapper,
            start,
            len,
            count: 0,
        };
        let count = fs.read_u32(0)?;
        let table_end = count
            .checked_mul(INODE_SIZE)
            .and_then(|t| t.checked_add(HEADER_SIZE))
            .ok_or(FsError::Io)?;
        if table_end > len {
            log::error!("initrd at {start} claims {count} inodes but is only {len} bytes");
            return Err(FsError::Io);
        }
        fs.count = count;
        log::info!("initrd at {start}: {count} inodes, {len} bytes, mounted on {MOUNT_POINT}");
        Ok(fs)
    }

    /// Copy `buf.len()` bytes starting `at` bytes into the image.
    fn copy_out(&self, at: u32, buf: &mut [u8]) -> Result<(), FsError> {
        let want = u32::try_from(buf.len()).map_err(|_| FsError::Io)?;
        match at.checked_add(want) {
            Some(end) if end <= self.len => {}
            _ => return Err(FsError::Io),
        }
        let pa = self.start.checked_add(at).ok_or(FsError::Io)?;
        read_physical(&self.mapper, pa, buf).ok_or(FsError::Io)
    }

    fn read_u32(&self, at: u32) -> Result<u32, FsError> {
        let mut raw = [0u8; 4];
        self.copy_out(at, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    fn inode(&self, ino: u32) -> Result<Inode, FsError> {
        if ino >= self.count {
            return Err(FsError::NotFound);
        }
        let at = HEADER_SIZE + ino * INODE_SIZE;
        let inode = Inode {
            offset: self.read_u32(at)?,
            length: self.read_u32(at + 4)?,
            flags: self.read_u32(at + 8)?,
        };
        match inode.offset.checked_add(inode.length) {
            Some(end) if end <= self.len => Ok(inode),
            _ => {
                log::error!("initrd inode {ino} points outside the image: {inode:?}");
                Err(FsError::Io)
            }
        }
    }

    /// Find `name` in directory `dir`. Names must match exactly.
    fn lookup(&self, dir: u32, name: &str) -> Result<u32, FsError> {
        let dir = self.inode(dir)?;
        if !dir.is_directory() {
            return Err(FsError::NotADirectory);
        }

        let end = dir.offset + dir.length;
        let mut pos = dir.offset;
        while pos.saturating_add(HEADER_SIZE) < end {
            let ino = self.read_u32(pos)?;
            let name_at = pos + 4;

            let mut raw = [0u8; NAME_MAX as usize];
            let window = (end - name_at).min(NAME_MAX) as usize;
            self.copy_out(name_at, &mut raw[..window])?;
            let name_len = raw[..window]
                .iter()
                .position(|&b| b == 0)
                .ok_or(FsError::Io)?;

            if &raw[..name_len] == name.as_bytes() {
                return Ok(ino);
            }

            #[allow(clippy::cast_possible_truncation)]
            let next = name_at + name_len as u32 + 1;
            pos = next.next_multiple_of(4);
        }
        Err(FsError::NotFound)
    }

    /// Walk an absolute path below [`MOUNT_POINT`] to its inode number.
    fn resolve(&self, path: &str) -> Result<u32, FsError> {
        let rest = path.strip_prefix(MOUNT_POINT).ok_or(FsError::NotFound)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(FsError::NotFound);
        }

        // The root has to exist even for `/init` itself.
        self.inode(ROOT_INODE)?;
        rest.split('/')
            .filter(|c| !c.is_empty())
            .try_fold(ROOT_INODE, |ino, name| self.lookup(ino, name))
    }
}

impl<M: PhysMapper> FileSystem for BootFs<M> {
    type Handle = BootHandle;

    fn open_path(&mut self, path: &str, mode: OpenMode) -> Result<BootHandle, FsError> {
        if path == TERMINAL_DEVICE {
            return Ok(BootHandle::Terminal);
        }

        let inode = self.inode(self.resolve(path)?)?;
        if inode.is_directory() {
            return Err(FsError::IsADirectory);
        }
        if mode != OpenMode::Read {
            return Err(FsError::BadMode);
        }
        Ok(BootHandle::File {
            data: inode.offset,
            length: inode.length,
        })
    }

    fn length(&self, handle: &BootHandle) -> u32 {
        match handle {
            BootHandle::File { length, .. } => *length,
            BootHandle::Terminal => 0,
        }
    }

    fn read(
        &mut self,
        handle: &BootHandle,
        offset: &mut u32,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        let BootHandle::File { data, length } = *handle else {
            return Ok(0);
        };
        if *offset >= length {
            return Ok(0);
        }

        let n = buf.len().min((length - *offset) as usize);
        self.copy_out(data + *offset, &mut buf[..n])?;
        #[allow(clippy::cast_possible_truncation)]
        {
            *offset += n as u32;
        }
        Ok(n)
    }

    fn write(&mut self, handle: &BootHandle, offset: &mut u32, buf: &[u8]) -> Result<usize, FsError> {
        match handle {
            BootHandle::File { .. } => Err(FsError::BadMode),
            BootHandle::Terminal => {
                for chunk in buf.utf8_chunks() {
                    kernel_qemu::qemu_trace!("{}", chunk.valid());
                }
                let n = u32::try_from(buf.len()).unwrap_or(u32::MAX);
                *offset = offset.saturating_add(n);
                Ok(buf.len())
            }
        }
    }

    fn close(&mut self, _handle: BootHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::testing::TestPhys;

    const FILE: u32 = 1;
    const DIR: u32 = 2;

    /// Placed so the header, the inode table and the big file all straddle
    /// frame boundaries.
    const IMAGE_AT: u32 = 0x0FF0;

    fn directory(entries: &[(u32, &str)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (ino, name) in entries {
            out.extend_from_slice(&ino.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            while out.len() % 4 != 0 {
                out.push(0);
            }
        }
        out
    }

    fn image(inodes: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let count = u32::try_from(inodes.len()).unwrap();
        let mut data_at = HEADER_SIZE + count * INODE_SIZE;
        let mut out = count.to_le_bytes().to_vec();
        for (flags, data) in inodes {
            let len = u32::try_from(data.len()).unwrap();
            out.extend_from_slice(&data_at.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            data_at += len;
        }
        for (_, data) in inodes {
            out.extend_from_slice(data);
        }
        out
    }

    fn program() -> Vec<u8> {
        (0..5000u32).map(|i| u8::try_from(i % 251).unwrap()).collect()
    }

    fn sample() -> Vec<u8> {
        image(&[
            (DIR, directory(&[(1, "bin"), (3, "readme")])),
            (DIR, directory(&[(2, "trash")])),
            (FILE, program()),
            (FILE, b"hello".to_vec()),
        ])
    }

    fn mount(bytes: &[u8]) -> Result<BootFs<TestPhys>, FsError> {
        let ram = TestPhys::with_frames(8);
        ram.write(PhysicalAddress::new(IMAGE_AT), bytes);
        let len = u32::try_from(bytes.len()).unwrap();
        BootFs::new(ram, PhysicalAddress::new(IMAGE_AT), len)
    }

    #[test]
    fn reads_a_nested_file_across_frames() {
        let mut fs = mount(&sample()).unwrap();
        let h = fs.open_path("/init/bin/trash", OpenMode::Read).unwrap();
        assert_eq!(fs.length(&h), 5000);

        let mut buf = vec![0u8; 6000];
        let mut offset = 0;
        assert_eq!(fs.read(&h, &mut offset, &mut buf), Ok(5000));
        assert_eq!(offset, 5000);
        assert_eq!(&buf[..5000], program().as_slice());

        assert_eq!(fs.read(&h, &mut offset, &mut buf), Ok(0));
    }

    #[test]
    fn reads_advance_and_clamp_to_the_file_length() {
        let mut fs = mount(&sample()).unwrap();
        let h = fs.open_path("/init/readme", OpenMode::Read).unwrap();

        let mut buf = [0u8; 3];
        let mut offset = 0;
        assert_eq!(fs.read(&h, &mut offset, &mut buf), Ok(3));
        assert_eq!(&buf, b"hel");
        assert_eq!(fs.read(&h, &mut offset, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(offset, 5);
    }

    #[test]
    fn path_errors() {
        let mut fs = mount(&sample()).unwrap();
        assert_eq!(fs.open_path("/init", OpenMode::Read), Err(FsError::IsADirectory));
        assert_eq!(fs.open_path("/init/bin", OpenMode::Read), Err(FsError::IsADirectory));
        assert_eq!(
            fs.open_path("/init/readme/x", OpenMode::Read),
            Err(FsError::NotADirectory)
        );
        assert_eq!(fs.open_path("/init/bin/missing", OpenMode::Read), Err(FsError::NotFound));
        assert_eq!(fs.open_path("/init/bin/tra", OpenMode::Read), Err(FsError::NotFound));
        assert_eq!(fs.open_path("/initrd/bin", OpenMode::Read), Err(FsError::NotFound));
        assert_eq!(fs.open_path("/boot/readme", OpenMode::Read), Err(FsError::NotFound));
    }

    #[test]
    fn image_files_are_read_only() {
        let mut fs = mount(&sample()).unwrap();
        assert_eq!(fs.open_path("/init/readme", OpenMode::Write), Err(FsError::BadMode));

        let h = fs.open_path("/init/readme", OpenMode::Read).unwrap();
        let mut offset = 0;
        assert_eq!(fs.write(&h, &mut offset, b"x"), Err(FsError::BadMode));
    }

    #[test]
    fn terminal_accepts_writes_and_reads_nothing() {
        let mut fs = mount(&sample()).unwrap();
        let h = fs.open_path(TERMINAL_DEVICE, OpenMode::Write).unwrap();
        assert_eq!(h, BootHandle::Terminal);

        let mut offset = 0;
        assert_eq!(fs.write(&h, &mut offset, b"hi\n"), Ok(3));
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(&h, &mut offset, &mut buf), Ok(0));
        fs.close(h);
    }

    #[test]
    fn rejects_a_truncated_inode_table() {
        let mut bytes = sample();
        bytes[..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(mount(&bytes), Err(FsError::Io)));
    }

    #[test]
    fn inode_outside_the_image_is_an_io_error() {
        let mut bytes = sample();
        // Inode 3's length.
        let at = (HEADER_SIZE + 3 * INODE_SIZE + 4) as usize;
        bytes[at..at + 4].copy_from_slice(&0x10_0000u32.to_le_bytes());
        let mut fs = mount(&bytes).unwrap();
        assert_eq!(fs.open_path("/init/readme", OpenMode::Read), Err(FsError::Io));
    }

    #[test]
    fn empty_image_has_no_root() {
        let mut fs = mount(&0u32.to_le_bytes()).unwrap();
        assert_eq!(fs.open_path("/init/bin/trash", OpenMode::Read), Err(FsError::NotFound));
    }
}
