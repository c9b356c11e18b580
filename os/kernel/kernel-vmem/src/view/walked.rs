use crate::{NoFlush, PageTableView, PdEntry, PhysMapper, PtEntry, Tlb};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// A directory reached by walking physical frames through a [`PhysMapper`].
///
/// Used for saved address-space directories that are not live (with
/// [`NoFlush`]), and in tests as a stand-in for the live directory.
pub struct WalkedTables<'a, M: PhysMapper, T: Tlb = NoFlush> {
    directory: PhysicalPage<Size4K>,
    mapper: &'a M,
    tlb: T,
}

impl<'a, M: PhysMapper> WalkedTables<'a, M, NoFlush> {
    #[must_use]
    pub const fn new(directory: PhysicalPage<Size4K>, mapper: &'a M) -> Self {
        Self::with_tlb(directory, mapper, NoFlush)
    }
}

impl<'a, M: PhysMapper, T: Tlb> WalkedTables<'a, M, T> {
    #[must_use]
    pub const fn with_tlb(directory: PhysicalPage<Size4K>, mapper: &'a M, tlb: T) -> Self {
        Self {
            directory,
            mapper,
            tlb,
        }
    }

    #[must_use]
    pub const fn directory(&self) -> PhysicalPage<Size4K> {
        self.directory
    }

    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }

    fn table_frame(&self, slot: usize) -> PhysicalPage<Size4K> {
        match self.directory_entry(slot).table_frame() {
            Some(frame) => frame,
            None => panic!("no page table in slot {slot}"),
        }
    }
}

impl<M: PhysMapper, T: Tlb> PageTableView for WalkedTables<'_, M, T> {
    fn directory_entry(&self, slot: usize) -> PdEntry {
        self.mapper.with_directory(self.directory, |d| d.get(slot))
    }

    fn set_directory_entry(&self, slot: usize, entry: PdEntry) {
        self.mapper
            .with_directory(self.directory, |d| d.set(slot, entry));
    }

    fn table_entry(&self, slot: usize, index: usize) -> PtEntry {
        let frame = self.table_frame(slot);
        self.mapper.with_table(frame, |t| t.get(index))
    }

    fn set_table_entry(&self, slot: usize, index: usize, entry: PtEntry) {
        let frame = self.table_frame(slot);
        self.mapper.with_table(frame, |t| t.set(index, entry));
    }

    fn zero_table(&self, slot: usize) {
        let frame = self.table_frame(slot);
        self.mapper.zero_frame(frame);
    }

    fn flush_page(&self, va: VirtualAddress) {
        self.tlb.flush_page(va);
    }

    fn flush_slot(&self, slot: usize) {
        self.tlb.flush_slot(slot);
    }
}
