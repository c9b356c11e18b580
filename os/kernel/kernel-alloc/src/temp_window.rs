//! # Temporary window mapper
//!
//! A handful of kernel pages at [`TEMP_WINDOW_START`] are reserved for
//! short-lived mappings of arbitrary physical frames. They are the only way
//! the kernel touches memory it has no permanent mapping for: free frames
//! (to follow the free stack) and the page tables of address spaces that are
//! not live.
//!
//! The page table covering the window is part of the boot page tables, so
//! installing a window never allocates.
//!
//! Prefer [`TempWindow::with_physical_window`]; it releases the slot on
//! every exit path.

use crate::info::{PAGE_SIZE, TEMP_WINDOW_PAGES, TEMP_WINDOW_START};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_sync::IrqGuard;
use kernel_vmem::{MapFlags, PageTableView, PtEntry};
use log::{error, trace};

/// The temporary window region of the directory seen through `V`.
pub struct TempWindow<'v, V> {
    view: &'v V,
}

impl<V> Clone for TempWindow<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for TempWindow<'_, V> {}

impl<'v, V: PageTableView> TempWindow<'v, V> {
    #[must_use]
    pub const fn new(view: &'v V) -> Self {
        Self { view }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn slot_address(slot: usize) -> VirtualAddress {
        VirtualAddress::new(TEMP_WINDOW_START + slot as u32 * PAGE_SIZE)
    }

    /// `true` if `va` lies inside the window region.
    #[must_use]
    pub const fn contains(va: VirtualAddress) -> bool {
        let end = Self::slot_address(TEMP_WINDOW_PAGES).as_u32();
        va.as_u32() >= TEMP_WINDOW_START && va.as_u32() < end
    }

    fn entry(&self, slot: usize) -> PtEntry {
        let va = Self::slot_address(slot);
        let Some(entry) = self.view.page(va) else {
            panic!("temporary window at {va} has no page table");
        };
        entry
    }

    /// Number of window slots currently mapped.
    #[must_use]
    pub fn in_use(&self) -> usize {
        (0..TEMP_WINDOW_PAGES)
            .filter(|&slot| self.entry(slot).is_present())
            .count()
    }

    /// Map the frame containing `pa` into the first free window slot.
    ///
    /// The returned address carries the page offset of `pa`. Returns `None`
    /// when every slot is taken.
    #[must_use]
    pub fn map_physical(&self, pa: PhysicalAddress) -> Option<VirtualAddress> {
        let _irq = IrqGuard::new();

        let slot = (0..TEMP_WINDOW_PAGES).find(|&slot| !self.entry(slot).is_present())?;
        let va = Self::slot_address(slot);
        self.view
            .set_page(va, PtEntry::page(pa.page(), MapFlags::KERNEL_DATA.bits()));
        trace!("window {slot}: {va} -> {pa}");
        Some(va + pa.offset::<Size4K>().as_u32())
    }

    /// Release the window slot containing `va` and flush it.
    ///
    /// # Panics
    /// If `va` is outside the window or its slot is not mapped.
    pub fn unmap_page(&self, va: VirtualAddress) {
        assert!(Self::contains(va), "{va} is not a temporary window address");
        let page = va.page::<Size4K>().base();
        let _irq = IrqGuard::new();
        assert!(
            self.view.page(page).is_some_and(PtEntry::is_present),
            "attempted to release unmapped window {page}"
        );
        self.view.set_page(page, PtEntry::zero());
    }

    /// Map `pa` for as long as the returned guard lives.
    #[must_use]
    pub fn acquire(&self, pa: PhysicalAddress) -> Option<WindowGuard<'_, 'v, V>> {
        let address = self.map_physical(pa)?;
        Some(WindowGuard {
            window: self,
            address,
        })
    }

    /// Run `f` with `pa` mapped at the address it is given.
    ///
    /// # Panics
    /// If every window slot is in use.
    pub fn with_physical_window<R>(&self, pa: PhysicalAddress, f: impl FnOnce(VirtualAddress) -> R) -> R {
        let Some(guard) = self.acquire(pa) else {
            error!("temporary window exhausted while mapping {pa}");
            panic!("no free temporary window slot");
        };
        f(guard.address())
    }
}

/// A mapped window slot, released on drop.
pub struct WindowGuard<'w, 'v, V: PageTableView> {
    window: &'w TempWindow<'v, V>,
    address: VirtualAddress,
}

impl<V: PageTableView> WindowGuard<'_, '_, V> {
    #[must_use]
    pub const fn address(&self) -> VirtualAddress {
        self.address
    }
}

impl<V: PageTableView> Drop for WindowGuard<'_, '_, V> {
    fn drop(&mut self) {
        self.window.unmap_page(self.address);
    }
}

#[cfg(target_arch = "x86")]
mod live {
    use super::TempWindow;
    use kernel_memory_addresses::{PhysicalPage, Size4K};
    use kernel_vmem::{FrameBytes, PhysMapper, RecursiveMapping};

    impl PhysMapper for TempWindow<'_, RecursiveMapping> {
        fn with_frame<R>(
            &self,
            frame: PhysicalPage<Size4K>,
            f: impl FnOnce(&mut FrameBytes) -> R,
        ) -> R {
            self.with_physical_window(frame.base(), |va| {
                // SAFETY: the window maps `frame` in the live directory until the
                // guard drops; no other window maps the same frame meanwhile.
                let bytes = unsafe { &mut *(va.as_usize() as *mut FrameBytes) };
                f(bytes)
            })
        }
    }
}
