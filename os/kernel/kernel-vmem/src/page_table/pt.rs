//! # Page Table (leaf level)
//!
//! - [`PtEntry`]: a page table entry (PTE) mapping one 4 KiB frame.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! After modifying live mappings, the caller must perform any required TLB
//! maintenance.

use crate::PageEntryBits;
use kernel_memory_addresses::{ENTRIES_PER_TABLE, PhysicalPage, Size4K};

/// A single page table entry.
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PtEntry(PageEntryBits);

/// A page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES_PER_TABLE],
}

impl PtEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Map the 4 KiB `frame` with `flags`, forcing `present=1`.
    #[inline]
    #[must_use]
    pub const fn page(frame: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_present(true);
        flags.set_physical_address(frame.base());
        Self(flags)
    }

    /// Same permissions as `self`, pointing at another frame.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage<Size4K>) -> Self {
        let mut flags = self.0;
        flags.set_physical_address(frame.base());
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn is_user(self) -> bool {
        self.0.user()
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0.writable()
    }

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage<Size4K> {
        self.0.frame()
    }

    /// If present, the mapped frame.
    #[inline]
    #[must_use]
    pub const fn mapped_frame(self) -> Option<PhysicalPage<Size4K>> {
        if self.is_present() {
            Some(self.frame())
        } else {
            None
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

impl core::fmt::Debug for PtEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PtEntry({:#010x})", self.raw())
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PtEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, e: PtEntry) {
        self.entries[index] = e;
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    /// Iterate `(index, entry)` over present entries.
    pub fn present(&self) -> impl Iterator<Item = (usize, PtEntry)> + '_ {
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
    fn pte_user_ro_leaf() {
        let frame = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x5555_0000));
        let e = PtEntry::page(frame, PageEntryBits::with_access(true, false));
        assert_eq!(e.mapped_frame(), Some(frame));
        assert!(e.is_user());
        assert!(!e.is_writable());
    }

    #[test]
    fn with_frame_keeps_permissions() {
        let a = PhysicalPage::<Size4K>::from_number(1);
        let b = PhysicalPage::<Size4K>::from_number(2);
        let e = PtEntry::page(a, PageEntryBits::with_access(false, true)).with_frame(b);
        assert_eq!(e.frame(), b);
        assert!(e.is_writable());
        assert!(!e.is_user());
    }

    #[test]
    fn present_skips_holes() {
        let mut t = PageTable::zeroed();
        let f = PhysicalPage::<Size4K>::from_number(3);
        t.set(5, PtEntry::page(f, PageEntryBits::table_flags()));
        t.set(1000, PtEntry::page(f, PageEntryBits::table_flags()));
        let idx: Vec<usize> = t.present().map(|(i, _)| i).collect();
        assert_eq!(idx, [5, 1000]);
    }
}
