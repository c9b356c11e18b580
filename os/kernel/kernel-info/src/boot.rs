//! # Kernel Boot Information
//!
//! The kernel is loaded by a Multiboot (version 1) compliant loader. It
//! relies on two parts of the information block: the memory map, which seeds
//! the physical frame allocator, and the first boot module, which holds the
//! initial ramdisk.

/// Magic value of the header the loader scans the kernel image for.
pub const MULTIBOOT_HEADER_MAGIC: u32 = 0x1BAD_B002;

/// Header flags: page-align modules (bit 0), provide memory info (bit 1).
pub const MULTIBOOT_HEADER_FLAGS: u32 = 0b11;

/// Header checksum; magic, flags and checksum sum to zero.
pub const MULTIBOOT_HEADER_CHECKSUM: u32 =
    0u32.wrapping_sub(MULTIBOOT_HEADER_MAGIC.wrapping_add(MULTIBOOT_HEADER_FLAGS));

/// Value found in `eax` when a Multiboot loader transfers control.
pub const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// `flags` bit signalling that `mods_count`/`mods_addr` are valid.
pub const MULTIBOOT_INFO_MODS: u32 = 1 << 3;

/// `flags` bit signalling that `mmap_length`/`mmap_addr` are valid.
pub const MULTIBOOT_INFO_MEM_MAP: u32 = 1 << 6;

/// Prefix of the Multiboot information block, up to the memory map fields.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MultibootInfo {
    pub flags: u32,
    pub mem_lower: u32,
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    pub syms: [u32; 4],
    /// Length of the memory map buffer in **bytes**.
    pub mmap_length: u32,
    /// Physical address of the memory map buffer.
    pub mmap_addr: u32,
}

impl MultibootInfo {
    /// `true` if the loader provided a memory map.
    #[must_use]
    pub const fn has_memory_map(&self) -> bool {
        self.flags & MULTIBOOT_INFO_MEM_MAP != 0
    }

    /// `true` if the loader passed at least one boot module.
    #[must_use]
    pub const fn has_modules(&self) -> bool {
        self.flags & MULTIBOOT_INFO_MODS != 0 && self.mods_count > 0
    }
}

/// One entry of the boot module list at `mods_addr`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MultibootModule {
    /// Physical address of the first byte.
    pub mod_start: u32,
    /// Physical address one past the last byte.
    pub mod_end: u32,
    /// Physical address of the NUL-terminated command line.
    pub string: u32,
    pub reserved: u32,
}

impl MultibootModule {
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.mod_end.saturating_sub(self.mod_start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kind of a memory map region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    /// Usable RAM.
    Available,
    /// Reserved by firmware or hardware.
    Reserved,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// Any type this kernel does not know.
    Other(u32),
}

impl From<u32> for RegionKind {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Other(other),
        }
    }
}

/// One entry of the firmware memory map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    /// Exclusive end address, saturating at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.kind == RegionKind::Available
    }
}

/// Iterator over the raw Multiboot memory map.
///
/// Each entry is `size: u32` followed by `size` bytes holding
/// `base: u64, length: u64, type: u32`. The `size` field does not count
/// itself, which lets loaders append fields.
#[derive(Clone)]
pub struct MemoryMap<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    /// Minimum `size` value of a well-formed entry.
    const ENTRY_PAYLOAD: usize = 20;

    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
        let raw = bytes.get(at..at + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
        let lo = Self::read_u32(bytes, at)?;
        let hi = Self::read_u32(bytes, at + 4)?;
        Some(u64::from(lo) | (u64::from(hi) << 32))
    }
}

impl Iterator for MemoryMap<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        let size = Self::read_u32(self.bytes, 0)? as usize;
        if size < Self::ENTRY_PAYLOAD || self.bytes.len() < 4 + size {
            self.bytes = &[];
            return None;
        }

        let region = MemoryRegion {
            base: Self::read_u64(self.bytes, 4)?,
            length: Self::read_u64(self.bytes, 12)?,
            kind: RegionKind::from(Self::read_u32(self.bytes, 20)?),
        };
        self.bytes = &self.bytes[4 + size..];
        Some(region)
    }
}
