//! # Page Directory (top level)
//!
//! - [`PdEntry`]: a page directory entry (PDE) pointing at a [`PageTable`](super::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.
//!
//! The kernel only builds 4 KiB mappings; `PS` stays clear in every entry it
//! creates.

use crate::PageEntryBits;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalPage, Size4K};

/// A single page directory entry.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The page directory: 1024 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Point at the page table in `frame`, forcing `present=1` and `PS=0`.
    #[inline]
    #[must_use]
    pub const fn table(frame: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(frame.base());
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// Frame of the referenced page table (meaningless if not present).
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage<Size4K> {
        self.0.frame()
    }

    /// If present, the page table frame.
    #[inline]
    #[must_use]
    pub const fn table_frame(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(self.frame())
        } else {
            None
        }
    }

    /// `true` if both entries reference the same table, or neither is present.
    ///
    /// Ignores the accessed bit the CPU sets behind our back.
    #[inline]
    #[must_use]
    pub fn same_table(self, other: Self) -> bool {
        match (self.table_frame(), other.table_frame()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl core::fmt::Debug for PdEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PdEntry({:#010x})", self.raw())
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, slot: usize) -> PdEntry {
        self.entries[slot]
    }

    #[inline]
    pub const fn set(&mut self, slot: usize, e: PdEntry) {
        self.entries[slot] = e;
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    /// Iterate `(slot, entry)` over present entries.
    pub fn present(&self) -> impl Iterator<Item = (usize, PdEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_present())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn table_entry_points_at_frame() {
        let frame = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0040_2000));
        let e = PdEntry::table(frame, PageEntryBits::table_flags().with_large_page(true));
        assert!(e.is_present());
        assert!(!e.flags().large_page());
        assert_eq!(e.table_frame(), Some(frame));
        assert_eq!(e.raw(), 0x0040_2007);
    }

    #[test]
    fn same_table_ignores_accessed_bit() {
        let frame = PhysicalPage::<Size4K>::from_number(7);
        let a = PdEntry::table(frame, PageEntryBits::table_flags());
        let b = PdEntry::from_raw(a.raw() | (1 << 5));
        assert!(a.same_table(b));
        assert!(PdEntry::zero().same_table(PdEntry::from_raw(0x1000)));
        assert!(!a.same_table(PdEntry::zero()));
    }

    #[test]
    fn directory_is_one_frame() {
        assert_eq!(size_of::<PageDirectory>(), 4096);
        assert_eq!(align_of::<PageDirectory>(), 4096);
    }
}
