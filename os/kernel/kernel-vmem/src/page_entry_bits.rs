use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// This models the **common superset** of the fields found in page
/// directory entries (PDE) and page table entries (PTE).
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page in a PDE; PAT in a PTE |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS avail        | Ignored by hardware |
/// | 12–31  | frame           | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert!(e.present());
/// assert_eq!(e.physical_address().as_u32(), 0x0012_3000);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear means "no table" in a PDE and "reserved but unmapped" in a PTE.
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow ring-3 access. Effective access is the intersection of
    /// the PDE and PTE bits.
    pub user: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a PDE this selects a 4 MiB page (with CR4.PSE); the kernel never
    /// creates such entries.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_number(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(self.frame_number())
    }

    /// Permission bits for a leaf or table entry.
    #[inline]
    #[must_use]
    pub const fn with_access(readonly: bool, kernel_only: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(!readonly)
            .with_user(!kernel_only)
    }

    /// Flags every newly created page table gets in its directory slot.
    ///
    /// Tables are always user-accessible and writable; the leaf entries
    /// decide the effective permissions.
    #[inline]
    #[must_use]
    pub const fn table_flags() -> Self {
        Self::with_access(false, false)
    }
}
