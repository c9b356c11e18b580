use crate::info::{RECURSIVE_DIRECTORY, RECURSIVE_TABLES};
use kernel_memory_addresses::{ENTRIES_PER_TABLE, VirtualAddress};

/// The live page directory, reached through its recursive slot.
///
/// With slot 1023 pointing at the directory itself:
///
/// ```text
/// 0xFFFF_F000 + 4 * dir                  → directory entry
/// 0xFFC0_0000 + 4096 * dir               → page table base
/// 0xFFC0_0000 + 4096 * dir + 4 * table   → page entry
/// ```
#[derive(Debug)]
pub struct RecursiveMapping {
    _private: (),
}

impl RecursiveMapping {
    /// # Safety
    /// Paging must be enabled and the live directory's last slot must map
    /// the directory itself.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    /// Virtual address of the directory entry covering `va`.
    #[must_use]
    pub const fn directory_entry_address(va: VirtualAddress) -> VirtualAddress {
        Self::slot_entry_address(va.directory_index())
    }

    /// Virtual base of the page table covering `va`.
    #[must_use]
    pub const fn page_table_address(va: VirtualAddress) -> VirtualAddress {
        Self::slot_table_address(va.directory_index())
    }

    /// Virtual address of the page entry for `va`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page_address(va: VirtualAddress) -> VirtualAddress {
        VirtualAddress::new(
            Self::page_table_address(va).as_u32() + 4 * va.table_index() as u32,
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot_entry_address(slot: usize) -> VirtualAddress {
        debug_assert!(slot < ENTRIES_PER_TABLE);
        VirtualAddress::new(RECURSIVE_DIRECTORY + 4 * slot as u32)
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot_table_address(slot: usize) -> VirtualAddress {
        debug_assert!(slot < ENTRIES_PER_TABLE);
        VirtualAddress::new(RECURSIVE_TABLES + 4096 * slot as u32)
    }
}

#[cfg(target_arch = "x86")]
mod live {
    use super::RecursiveMapping;
    use crate::{HardwareTlb, PageTableView, PdEntry, PtEntry, Tlb};
    use core::ptr;
    use kernel_memory_addresses::{ENTRIES_PER_TABLE, VirtualAddress};

    impl RecursiveMapping {
        #[inline]
        fn table_ptr(slot: usize) -> *mut u32 {
            Self::slot_table_address(slot).as_usize() as *mut u32
        }
    }

    impl PageTableView for RecursiveMapping {
        fn directory_entry(&self, slot: usize) -> PdEntry {
            let p = Self::slot_entry_address(slot).as_usize() as *const u32;
            // SAFETY: the recursive slot maps the directory at this address.
            PdEntry::from_raw(unsafe { ptr::read_volatile(p) })
        }

        fn set_directory_entry(&self, slot: usize, entry: PdEntry) {
            let p = Self::slot_entry_address(slot).as_usize() as *mut u32;
            // SAFETY: see above.
            unsafe { ptr::write_volatile(p, entry.raw()) };
            HardwareTlb.flush_page(Self::slot_table_address(slot));
        }

        fn table_entry(&self, slot: usize, index: usize) -> PtEntry {
            assert!(
                self.directory_entry(slot).is_present(),
                "no page table in slot {slot}"
            );
            debug_assert!(index < ENTRIES_PER_TABLE);
            // SAFETY: the table is present and therefore mapped recursively.
            PtEntry::from_raw(unsafe { ptr::read_volatile(Self::table_ptr(slot).add(index)) })
        }

        fn set_table_entry(&self, slot: usize, index: usize, entry: PtEntry) {
            assert!(
                self.directory_entry(slot).is_present(),
                "no page table in slot {slot}"
            );
            debug_assert!(index < ENTRIES_PER_TABLE);
            // SAFETY: see `table_entry`.
            unsafe { ptr::write_volatile(Self::table_ptr(slot).add(index), entry.raw()) };
        }

        fn zero_table(&self, slot: usize) {
            // SAFETY: see `table_entry`.
            unsafe { ptr::write_bytes(Self::table_ptr(slot), 0, ENTRIES_PER_TABLE) };
        }

        fn flush_page(&self, va: VirtualAddress) {
            HardwareTlb.flush_page(va);
        }

        fn flush_slot(&self, slot: usize) {
            HardwareTlb.flush_slot(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_addresses() {
        let va = VirtualAddress::new(0xD000_3000);
        assert_eq!(va.directory_index(), 832);
        assert_eq!(va.table_index(), 3);

        assert_eq!(
            RecursiveMapping::directory_entry_address(va).as_u32(),
            0xFFFF_F000 + 832 * 4
        );
        assert_eq!(
            RecursiveMapping::page_table_address(va).as_u32(),
            0xFFC0_0000 + 832 * 4096
        );
        assert_eq!(
            RecursiveMapping::page_address(va).as_u32(),
            0xFFC0_0000 + 832 * 4096 + 3 * 4
        );
    }

    #[test]
    fn directory_appears_as_last_table() {
        // the table of the recursive slot is the directory itself
        let top = VirtualAddress::new(0xFFFF_F000);
        assert_eq!(
            RecursiveMapping::page_table_address(top).as_u32(),
            0xFFFF_F000
        );
        assert_eq!(
            RecursiveMapping::directory_entry_address(VirtualAddress::zero()).as_u32(),
            0xFFFF_F000
        );
    }
}
