//! # Page table views
//!
//! A [`PageTableView`] reads and writes the entries of one directory and the
//! page tables it references, without exposing how they are reached:
//!
//! - [`RecursiveMapping`]: the live directory, through its recursive slot.
//! - [`WalkedTables`]: any directory frame, through a [`PhysMapper`](crate::PhysMapper).
//!
//! Entries are passed by value so implementations can use volatile accesses
//! or temporary windows.

mod recursive;
mod walked;

pub use recursive::RecursiveMapping;
pub use walked::WalkedTables;

use crate::{PdEntry, PtEntry};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

pub trait PageTableView {
    /// Read directory slot `slot`.
    fn directory_entry(&self, slot: usize) -> PdEntry;

    /// Write directory slot `slot`. Invalidates whatever translation the
    /// view itself relies on to reach the table.
    fn set_directory_entry(&self, slot: usize, entry: PdEntry);

    /// Read entry `index` of the table in `slot`.
    ///
    /// # Panics
    /// If `slot` has no page table.
    fn table_entry(&self, slot: usize, index: usize) -> PtEntry;

    /// Write entry `index` of the table in `slot`. No TLB maintenance.
    ///
    /// # Panics
    /// If `slot` has no page table.
    fn set_table_entry(&self, slot: usize, index: usize, entry: PtEntry);

    /// Clear every entry of the table in `slot`.
    fn zero_table(&self, slot: usize);

    /// Invalidate the translation of `va` if this view is live.
    fn flush_page(&self, va: VirtualAddress);

    /// Invalidate every translation of directory `slot` if this view is live.
    fn flush_slot(&self, slot: usize);

    /// Directory entry covering `va`.
    #[inline]
    fn directory_entry_for(&self, va: VirtualAddress) -> PdEntry {
        self.directory_entry(va.directory_index())
    }

    /// The page entry for `va`, or `None` when no table covers it.
    #[inline]
    fn page(&self, va: VirtualAddress) -> Option<PtEntry> {
        let slot = va.directory_index();
        if self.directory_entry(slot).is_present() {
            Some(self.table_entry(slot, va.table_index()))
        } else {
            None
        }
    }

    /// Write the page entry for `va` and flush it.
    ///
    /// # Panics
    /// If no table covers `va`.
    #[inline]
    fn set_page(&self, va: VirtualAddress, entry: PtEntry) {
        self.set_table_entry(va.directory_index(), va.table_index(), entry);
        self.flush_page(va);
    }

    /// Physical address `va` translates to, offset preserved.
    #[inline]
    fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.page(va)?.mapped_frame()?;
        Some(frame.join(va.offset()))
    }
}
