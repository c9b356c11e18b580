//! # Page table manager
//!
//! [`PageMapper`] installs and removes 4 KiB mappings in one directory,
//! creating page tables on demand from a [`FrameAlloc`].
//!
//! ## Rules
//!
//! - A mapping is never silently overwritten: mapping a present page fails
//!   with [`MapError::AlreadyMapped`].
//! - Multi-page requests are all-or-nothing; on failure every page mapped by
//!   the call is freed again.
//! - Unmapping a page that is not present is a logic error and panics.
//! - Page tables are not reclaimed when their last page goes away; they are
//!   freed with the owning [`AddressSpace`](crate::AddressSpace).

use crate::info::KERNEL_VIRTUAL_OFFSET;
use crate::{DmaFrameAlloc, FrameAlloc, PageEntryBits, PageTableView, PdEntry, PtEntry};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::{debug, trace};

/// Why a mapping could not be installed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("page is already mapped")]
    AlreadyMapped,
    #[error("page is not mapped")]
    NotMapped,
}

/// Permissions of a leaf mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MapFlags {
    /// Clear the writable bit.
    pub readonly: bool,
    /// Clear the user bit.
    pub kernel_only: bool,
}

impl MapFlags {
    pub const KERNEL_DATA: Self = Self {
        readonly: false,
        kernel_only: true,
    };

    pub const USER_DATA: Self = Self {
        readonly: false,
        kernel_only: false,
    };

    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        PageEntryBits::with_access(self.readonly, self.kernel_only)
    }
}

/// The page table manager for one directory.
pub struct PageMapper<'a, V: PageTableView, A> {
    view: &'a V,
    frames: &'a mut A,
}

impl<'a, V: PageTableView, A: FrameAlloc> PageMapper<'a, V, A> {
    pub const fn new(view: &'a V, frames: &'a mut A) -> Self {
        Self { view, frames }
    }

    #[must_use]
    pub const fn view(&self) -> &V {
        self.view
    }

    /// Map `va` to the frame containing `pa`.
    ///
    /// Creates and clears the covering page table if the directory slot is
    /// empty, then writes the leaf entry and flushes that one page.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a new page table was needed and no
    ///   frame was available.
    /// - [`MapError::AlreadyMapped`] if `va` is already present.
    pub fn map_page(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        let slot = va.directory_index();
        if !self.view.directory_entry(slot).is_present() {
            let table = self.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
            self.view
                .set_directory_entry(slot, PdEntry::table(table, PageEntryBits::table_flags()));
            self.view.zero_table(slot);
            debug!("page table for slot {slot} at {table}");
        }

        if self.view.table_entry(slot, va.table_index()).is_present() {
            return Err(MapError::AlreadyMapped);
        }

        self.view
            .set_page(va, PtEntry::page(pa.page(), flags.bits()));
        trace!("mapped {va} -> {pa}");
        Ok(())
    }

    /// Allocate a fresh frame and map it at `va`.
    ///
    /// The frame is not cleared; callers that need zeroed memory write it.
    ///
    /// # Errors
    /// As [`map_page`](Self::map_page), plus [`MapError::OutOfMemory`] if no
    /// frame is available. The frame is returned to the pool on failure.
    pub fn alloc_page(
        &mut self,
        va: VirtualAddress,
        flags: MapFlags,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        let frame = self.frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        if let Err(e) = self.map_page(va, frame.base(), flags) {
            self.frames.free_frame(frame);
            return Err(e);
        }
        Ok(frame)
    }

    /// Allocate and map `count` consecutive pages starting at `va`.
    ///
    /// # Errors
    /// On any failure, every page mapped by this call is freed and the error
    /// of the failing step is returned.
    pub fn alloc_pages(
        &mut self,
        va: VirtualAddress,
        count: usize,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        for i in 0..count {
            let Some(page) = nth_page(va, i) else {
                self.free_pages(va, i);
                return Err(MapError::OutOfMemory);
            };
            if let Err(e) = self.alloc_page(page, flags) {
                debug!("alloc_pages({va}, {count}) failed at page {i}: {e}; rolling back");
                self.free_pages(va, i);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Return the frame mapped at `va` to the allocator and clear the mapping.
    ///
    /// # Panics
    /// If `va` is not mapped.
    pub fn free_page(&mut self, va: VirtualAddress) {
        let Some(frame) = self.view.page(va).and_then(PtEntry::mapped_frame) else {
            panic!("attempted to free unmapped page {va}");
        };
        self.unmap_page(va);
        self.frames.free_frame(frame);
    }

    fn free_pages(&mut self, va: VirtualAddress, count: usize) {
        for i in (0..count).rev() {
            if let Some(page) = nth_page(va, i) {
                self.free_page(page);
            }
        }
    }

    /// Clear the mapping at `va` without freeing the frame.
    ///
    /// # Panics
    /// If no page table covers `va` or the page is not present.
    pub fn unmap_page(&mut self, va: VirtualAddress) {
        let Some(entry) = self.view.page(va) else {
            panic!("attempted to unmap {va} with no associated page table");
        };
        assert!(entry.is_present(), "attempted to unmap {va}, which wasn't there");
        self.view.set_page(va, PtEntry::zero());
    }

    /// [`unmap_page`](Self::unmap_page) for `count` consecutive pages.
    pub fn unmap_pages(&mut self, va: VirtualAddress, count: usize) {
        for i in 0..count {
            if let Some(page) = nth_page(va, i) {
                self.unmap_page(page);
            }
        }
    }

    /// Physical address `va` translates to, offset preserved.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.view.translate(va)
    }
}

/// `true` if `[va, va + len)` lies below the kernel split and every page in
/// it is present and user-accessible, and writable too when `write` is set.
/// A zero length checks the page containing `va`.
#[must_use]
pub fn check_user_ptr<V: PageTableView>(
    view: &V,
    va: VirtualAddress,
    len: usize,
    write: bool,
) -> bool {
    let Ok(len) = u32::try_from(len.max(1)) else {
        return false;
    };
    let Some(last) = va.checked_add(len - 1) else {
        return false;
    };
    if last.as_u32() >= KERNEL_VIRTUAL_OFFSET {
        return false;
    }

    let mut page = va.page::<Size4K>();
    loop {
        let ok = view
            .page(page.base())
            .is_some_and(|e| e.is_present() && e.is_user() && (!write || e.is_writable()));
        if !ok {
            return false;
        }
        if page == last.page::<Size4K>() {
            return true;
        }
        match page.checked_next() {
            Some(next) => page = next,
            None => return false,
        }
    }
}

impl<V: PageTableView, A: FrameAlloc + DmaFrameAlloc> PageMapper<'_, V, A> {
    /// Map `count` physically contiguous DMA frames at `va`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no contiguous run is available, or the
    /// error of the first failing mapping. Nothing stays mapped on failure.
    pub fn dma_alloc_pages(
        &mut self,
        va: VirtualAddress,
        count: usize,
        flags: MapFlags,
    ) -> Result<PhysicalAddress, MapError> {
        let first = self.frames.alloc_dma(count).ok_or(MapError::OutOfMemory)?;

        for i in 0..count {
            let mapped = nth_page(va, i)
                .zip(u32::try_from(i).ok().and_then(|n| first.checked_add(n)))
                .ok_or(MapError::OutOfMemory)
                .and_then(|(page, frame)| self.map_page(page, frame.base(), flags));
            if let Err(e) = mapped {
                self.unmap_pages(va, i);
                self.frames.free_dma(first, count);
                return Err(e);
            }
        }

        debug!("dma: {count} frame(s) at {} mapped to {va}", first.base());
        Ok(first.base())
    }

    /// Unmap a DMA run and return its frames to the DMA pool.
    ///
    /// The kernel heap keeps its DMA runs; this is for runs mapped directly
    /// with [`dma_alloc_pages`](Self::dma_alloc_pages).
    ///
    /// # Panics
    /// If `va` is not mapped.
    pub fn dma_free_pages(&mut self, va: VirtualAddress, count: usize) {
        let Some(pa) = self.translate(va) else {
            panic!("attempted to free unmapped DMA pages at {va}");
        };
        self.unmap_pages(va, count);
        self.frames.free_dma(pa.page(), count);
    }
}

/// Base of the `n`-th page after `va`, if it does not wrap.
fn nth_page(va: VirtualAddress, n: usize) -> Option<VirtualAddress> {
    let n = u32::try_from(n).ok()?;
    va.checked_add(n.checked_mul(4096)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BumpAlloc, FailAfter, Flush, RecordingTlb, TestPhys};
    use crate::{PhysMapper, WalkedTables};

    fn setup(frames: usize) -> (TestPhys, BumpAlloc, PhysicalPage<Size4K>) {
        let phys = TestPhys::with_frames(frames);
        let mut alloc = BumpAlloc::new(1, frames);
        let dir = alloc.alloc_frame().unwrap();
        phys.zero_frame(dir);
        (phys, alloc, dir)
    }

    #[test]
    fn map_then_get_page_round_trips() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::with_tlb(dir, &phys, RecordingTlb::default());
        let mut m = PageMapper::new(&view, &mut alloc);

        let va = VirtualAddress::new(0x0040_3000);
        let pa = PhysicalAddress::new(0x0000_9000);
        m.map_page(va, pa, MapFlags { readonly: true, kernel_only: false })
            .unwrap();

        let e = view.page(va).unwrap();
        assert_eq!(e.mapped_frame(), Some(pa.page()));
        assert!(!e.is_writable());
        assert!(e.is_user());

        let pde = view.directory_entry_for(va);
        assert!(pde.flags().user() && pde.flags().writable());
        assert!(view.tlb().flushes().contains(&Flush::Page(va)));
    }

    #[test]
    fn map_page_refuses_to_overwrite() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);

        let va = VirtualAddress::new(0x1000);
        m.map_page(va, PhysicalAddress::new(0x5000), MapFlags::USER_DATA)
            .unwrap();
        assert_eq!(
            m.map_page(va, PhysicalAddress::new(0x6000), MapFlags::USER_DATA),
            Err(MapError::AlreadyMapped)
        );
        assert_eq!(m.translate(va), Some(PhysicalAddress::new(0x5000)));
    }

    #[test]
    fn new_tables_are_cleared() {
        let (phys, mut alloc, dir) = setup(16);
        // frame 2 backs the page, frame 3 becomes the table
        let next = PhysicalPage::<Size4K>::from_number(3);
        phys.with_frame(next, |b| b.0.fill(0xFF));

        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);
        m.alloc_page(VirtualAddress::new(0x0080_0000), MapFlags::KERNEL_DATA)
            .unwrap();

        assert_eq!(view.directory_entry(2).frame(), next);
        let present = phys.with_table(next, |t| t.present().count());
        assert_eq!(present, 1);
    }

    #[test]
    fn translate_preserves_offset() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);
        m.map_page(
            VirtualAddress::new(0x0020_0000),
            PhysicalAddress::new(0x0000_7000),
            MapFlags::KERNEL_DATA,
        )
        .unwrap();
        assert_eq!(
            m.translate(VirtualAddress::new(0x0020_0abc)),
            Some(PhysicalAddress::new(0x0000_7abc))
        );
        assert_eq!(m.translate(VirtualAddress::new(0x0020_1000)), None);
        assert_eq!(m.translate(VirtualAddress::new(0x4000_0000)), None);
    }

    #[test]
    fn alloc_pages_rolls_back_on_oom() {
        let phys = TestPhys::with_frames(32);
        let mut bump = BumpAlloc::new(1, 32);
        let dir = bump.alloc_frame().unwrap();
        phys.zero_frame(dir);
        let before = bump.in_use();

        // page table + two data frames succeed, the third data frame fails
        let mut alloc = FailAfter::new(bump, 3);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);

        let va = VirtualAddress::new(0x0100_0000);
        assert_eq!(
            m.alloc_pages(va, 4, MapFlags::USER_DATA),
            Err(MapError::OutOfMemory)
        );
        for i in 0..4 {
            assert_eq!(m.translate(va + i * 4096), None, "page {i} still mapped");
        }
        // only the page table remains allocated
        assert_eq!(alloc.into_inner().in_use(), before + 1);
    }

    #[test]
    fn free_page_returns_frame() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let va = VirtualAddress::new(0x0000_3000);
        let frame = {
            let mut m = PageMapper::new(&view, &mut alloc);
            let f = m.alloc_page(va, MapFlags::USER_DATA).unwrap();
            m.free_page(va);
            assert_eq!(m.translate(va), None);
            f
        };
        assert!(alloc.freed().contains(&frame));
    }

    #[test]
    #[should_panic(expected = "wasn't there")]
    fn unmapping_absent_page_panics() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);
        m.alloc_page(VirtualAddress::new(0x1000), MapFlags::USER_DATA)
            .unwrap();
        m.unmap_page(VirtualAddress::new(0x2000));
    }

    #[test]
    #[should_panic(expected = "no associated page table")]
    fn unmapping_without_table_panics() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);
        m.unmap_page(VirtualAddress::new(0x1000));
    }

    #[test]
    fn user_pointer_checks() {
        let (phys, mut alloc, dir) = setup(16);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);
        m.alloc_pages(VirtualAddress::new(0x1000), 2, MapFlags::USER_DATA)
            .unwrap();
        m.alloc_page(VirtualAddress::new(0x3000), MapFlags::KERNEL_DATA)
            .unwrap();

        m.alloc_page(
            VirtualAddress::new(0x4000),
            MapFlags {
                readonly: true,
                kernel_only: false,
            },
        )
        .unwrap();

        assert!(check_user_ptr(&view, VirtualAddress::new(0x1ff0), 0x20, true));
        assert!(check_user_ptr(&view, VirtualAddress::new(0x2fff), 1, false));
        assert!(check_user_ptr(&view, VirtualAddress::new(0x1000), 0, false));
        // crosses into a kernel-only page
        assert!(!check_user_ptr(&view, VirtualAddress::new(0x2ff0), 0x20, false));
        assert!(!check_user_ptr(&view, VirtualAddress::new(0x0000), 4, false));
        assert!(!check_user_ptr(&view, VirtualAddress::new(0x0040_0000), 4, false));
        assert!(!check_user_ptr(&view, VirtualAddress::new(0xFFFF_FFF0), 0x20, false));
        // read-only pages pass only for reads
        assert!(check_user_ptr(&view, VirtualAddress::new(0x4000), 8, false));
        assert!(!check_user_ptr(&view, VirtualAddress::new(0x4000), 8, true));
        assert!(!check_user_ptr(&view, VirtualAddress::new(0xBFFF_FFFC), 8, false));
    }

    #[test]
    fn dma_pages_are_contiguous_and_released() {
        let (phys, mut alloc, dir) = setup(32);
        let view = WalkedTables::new(dir, &phys);
        let mut m = PageMapper::new(&view, &mut alloc);

        let va = VirtualAddress::new(0x0800_0000);
        let pa = m.dma_alloc_pages(va, 3, MapFlags::KERNEL_DATA).unwrap();
        for i in 0..3 {
            assert_eq!(m.translate(va + i * 4096), Some(pa + i * 4096));
        }
        m.dma_free_pages(va, 3);
        assert_eq!(m.translate(va), None);
        assert_eq!(alloc.dma_freed(), &[(pa.page::<Size4K>(), 3)]);
    }
}
