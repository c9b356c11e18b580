//! # Kernel memory bring-up
//!
//! Owns the kernel's memory singletons and brings them up in order:
//!
//! 1. read the Multiboot information and the initrd module descriptor
//!    through the temporary window,
//! 2. drop the identity mapping of the first 4 MiB the boot code needed,
//! 3. seed the [`FrameAllocator`] from the memory map,
//! 4. map the first heap page at [`HEAP_START`],
//! 5. snapshot the live directory as the template for every address space.
//!
//! The page directory loaded by the boot code stays in CR3 for the lifetime
//! of the kernel and is always reached through [`RECURSIVE`].

use crate::phys::read_physical;
use core::ptr::NonNull;
use kernel_alloc::{FrameAllocator, HeapPages, LockedHeap, SeedError, TempWindow};
use kernel_info::boot::{MemoryMap, MultibootInfo, MultibootModule};
use kernel_info::memory::{HEAP_START, KERNEL_VIRTUAL_OFFSET, PAGE_SIZE, TEMP_WINDOW_START};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::SpinLock;
use kernel_vmem::{
    DmaFrameAlloc, FrameAlloc, KernelDirectory, MapError, MapFlags, PageMapper, PageTableView,
    PdEntry, RecursiveMapping,
};
use log::{debug, info, warn};

/// The live page directory.
// SAFETY: the boot code points the last directory slot at the directory.
pub static RECURSIVE: RecursiveMapping = unsafe { RecursiveMapping::new() };

/// The kernel's way into physical memory it has no mapping for.
pub static WINDOW: TempWindow<'static, RecursiveMapping> = TempWindow::new(&RECURSIVE);

static FRAMES: SpinLock<Option<FrameAllocator<TempWindow<'static, RecursiveMapping>>>> =
    SpinLock::new(None);

#[global_allocator]
static HEAP: LockedHeap<KernelHeapPages> = LockedHeap::new(KernelHeapPages {
    top: VirtualAddress::new(HEAP_START),
});

/// Largest memory map copied out of the boot information.
const MEMORY_MAP_MAX: usize = 2048;

unsafe extern "C" {
    static __kernel_end: u8;
}

#[derive(Debug, thiserror::Error)]
pub enum BootMemoryError {
    #[error("the boot loader passed no initrd module")]
    NoInitrd,
    #[error("boot information at {0} is unreadable")]
    BadBootInfo(PhysicalAddress),
    #[error(transparent)]
    Seed(#[from] SeedError),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Where the initrd module sits in physical memory.
#[derive(Debug, Copy, Clone)]
pub struct Initrd {
    pub start: PhysicalAddress,
    pub len: u32,
}

/// What the rest of the boot sequence needs from memory bring-up.
pub struct BootMemory {
    pub initrd: Initrd,
    pub directory: KernelDirectory,
}

/// The kernel frame allocator, reached through its lock.
///
/// Every call takes the lock with interrupts disabled, so it is usable from
/// interrupt context and from inside the heap lock alike.
#[derive(Debug, Default, Copy, Clone)]
pub struct GlobalFrames;

impl GlobalFrames {
    fn with<R>(f: impl FnOnce(&mut FrameAllocator<TempWindow<'static, RecursiveMapping>>) -> R) -> Option<R> {
        FRAMES.with_lock_irq(|frames| frames.as_mut().map(f))
    }
}

impl FrameAlloc for GlobalFrames {
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        Self::with(FrameAllocator::alloc_frame).flatten()
    }

    fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        if Self::with(|frames| frames.free_frame(frame)).is_none() {
            warn!("frame {frame} released before the frame allocator exists");
        }
    }
}

impl DmaFrameAlloc for GlobalFrames {
    fn alloc_dma(&mut self, count: usize) -> Option<PhysicalPage<Size4K>> {
        Self::with(|frames| frames.alloc_dma(count)).flatten()
    }

    fn free_dma(&mut self, first: PhysicalPage<Size4K>, count: usize) {
        if Self::with(|frames| frames.free_dma(first, count)).is_none() {
            warn!("DMA run at {first} released before the frame allocator exists");
        }
    }
}

/// Heap pages come from the top of the heap region, which only grows.
pub struct KernelHeapPages {
    top: VirtualAddress,
}

impl KernelHeapPages {
    fn claim(&mut self, count: usize) -> Result<VirtualAddress, MapError> {
        let bytes = u32::try_from(count)
            .ok()
            .and_then(|n| n.checked_mul(PAGE_SIZE))
            .ok_or(MapError::OutOfMemory)?;
        let start = self.top;
        let end = start.checked_add(bytes).ok_or(MapError::OutOfMemory)?;
        if end.as_u32() > TEMP_WINDOW_START {
            return Err(MapError::OutOfMemory);
        }
        Ok(start)
    }

    fn advance(&mut self, count: usize) {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.top += count as u32 * PAGE_SIZE;
        }
    }

    fn pointer(va: VirtualAddress) -> Result<NonNull<u8>, MapError> {
        NonNull::new(va.as_usize() as *mut u8).ok_or(MapError::OutOfMemory)
    }
}

// SAFETY: every page handed out is freshly mapped above the previous top
// and never returned twice.
unsafe impl HeapPages for KernelHeapPages {
    fn grow(&mut self, count: usize) -> Result<NonNull<u8>, MapError> {
        let va = self.claim(count)?;
        PageMapper::new(&RECURSIVE, &mut GlobalFrames).alloc_pages(va, count, MapFlags::KERNEL_DATA)?;
        self.advance(count);
        debug!("heap: {count} page(s) at {va}");
        Self::pointer(va)
    }

    fn grow_dma(&mut self, count: usize) -> Result<(NonNull<u8>, PhysicalAddress), MapError> {
        let va = self.claim(count)?;
        let pa = PageMapper::new(&RECURSIVE, &mut GlobalFrames).dma_alloc_pages(
            va,
            count,
            MapFlags::KERNEL_DATA,
        )?;
        self.advance(count);
        Ok((Self::pointer(va)?, pa))
    }
}

/// Physical address one past the kernel image.
fn kernel_image_end() -> PhysicalAddress {
    #[allow(clippy::cast_possible_truncation)]
    let end = (&raw const __kernel_end) as usize as u32;
    PhysicalAddress::new(end - KERNEL_VIRTUAL_OFFSET)
}

/// Multiboot records: `repr(C)` and made of `u32` fields only.
trait BootRecord: Copy {}
impl BootRecord for MultibootInfo {}
impl BootRecord for MultibootModule {}

fn read_record<T: BootRecord>(pa: PhysicalAddress) -> Result<T, BootMemoryError> {
    let mut raw = [0u8; 64];
    let buf = raw
        .get_mut(..size_of::<T>())
        .ok_or(BootMemoryError::BadBootInfo(pa))?;
    read_physical(&WINDOW, pa, buf).ok_or(BootMemoryError::BadBootInfo(pa))?;
    // SAFETY: any bit pattern is a valid `BootRecord`.
    Ok(unsafe { raw.as_ptr().cast::<T>().read_unaligned() })
}

/// Bring up the frame allocator and the heap.
///
/// `info` is the physical address of the Multiboot information block.
///
/// # Errors
/// If the boot information is incomplete or memory runs out before the
/// kernel directory template exists. Nothing can be recovered at that point.
pub fn init(info: PhysicalAddress) -> Result<BootMemory, BootMemoryError> {
    let boot: MultibootInfo = read_record(info)?;
    if !boot.has_modules() {
        return Err(BootMemoryError::NoInitrd);
    }
    let module: MultibootModule = read_record(PhysicalAddress::new(boot.mods_addr))?;
    let initrd = Initrd {
        start: PhysicalAddress::new(module.mod_start),
        len: module.len(),
    };
    info!("initrd module: {} bytes at {}", initrd.len, initrd.start);

    let mut map_bytes = [0u8; MEMORY_MAP_MAX];
    let map = if boot.has_memory_map() {
        let len = (boot.mmap_length as usize).min(MEMORY_MAP_MAX);
        if len < boot.mmap_length as usize {
            warn!(
                "memory map of {} bytes truncated to {MEMORY_MAP_MAX}",
                boot.mmap_length
            );
        }
        let pa = PhysicalAddress::new(boot.mmap_addr);
        read_physical(&WINDOW, pa, &mut map_bytes[..len]).ok_or(BootMemoryError::BadBootInfo(pa))?;
        Some(MemoryMap::new(&map_bytes[..len]))
    } else {
        None
    };

    // The boot code's identity map of the first 4 MiB is not needed past
    // this point; user space starts out empty.
    RECURSIVE.set_directory_entry(0, PdEntry::zero());
    RECURSIVE.flush_slot(0);

    let reserved = kernel_image_end().as_u32().max(module.mod_end);
    let mut frames = FrameAllocator::new(WINDOW, PhysicalAddress::new(reserved));
    let stats = frames.seed(map)?;
    info!(
        "frame allocator: {} general and {} DMA frames above {:#010X}",
        stats.general, stats.dma, reserved
    );
    FRAMES.with_lock_irq(|slot| *slot = Some(frames));

    HEAP.init()?;

    let directory = KernelDirectory::snapshot(&RECURSIVE, &WINDOW, &mut GlobalFrames)?;
    Ok(BootMemory { initrd, directory })
}
