//! # Kernel heap
//!
//! `kmalloc`-style allocator on top of pages mapped on demand.
//!
//! ## General chunks
//!
//! Every chunk starts with a one-word size header. Free chunks reuse the
//! first two payload words as list links:
//!
//! ```text
//! allocated:  | size | payload …                    |
//! free:       | size | prev | next | …              |
//!             ^ chunk ^ payload (returned to callers)
//! ```
//!
//! - Request sizes are rounded up to a multiple of two words.
//! - The free list is sorted by address and searched first-fit.
//! - A chunk is split when it exceeds the request by more than a full
//!   header (size plus both links).
//! - On a miss the heap grows by as many pages as the request needs; the new
//!   region joins the free list like any freed chunk.
//! - `kfree` inserts the chunk in address order and merges it with both
//!   neighbours when they touch.
//!
//! ## DMA chunks
//!
//! DMA buffers are page-granular and physically contiguous. They never
//! cross a [`DMA_BOUNDARY`] and are tracked in a small fixed table so the
//! heap never allocates to describe its own memory. Freed DMA chunks are
//! kept for reuse; their runs are never returned to the frame allocator.

use crate::info::{DMA_BOUNDARY, PAGE_SIZE};
use core::ptr::{self, NonNull, null_mut};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::MapError;
use log::{debug, info, warn};

const WORD: usize = size_of::<usize>();

/// Granularity of general chunk sizes.
const CHUNK_ALIGN: usize = 2 * WORD;

/// Size of a full free-chunk header.
const HEADER: usize = size_of::<Chunk>();

const PAGE: usize = PAGE_SIZE as usize;

/// Capacity of the DMA chunk table.
pub const DMA_CHUNKS: usize = 32;

/// Which pool an allocation comes from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AllocKind {
    General,
    /// Physically contiguous, page-aligned, device-addressable.
    Dma,
}

/// Page supply of a [`KernelHeap`].
///
/// # Safety
/// Returned pages must be mapped, writable, exclusively owned by the heap
/// and never handed out twice.
pub unsafe trait HeapPages {
    /// Map `count` fresh pages, ideally directly after the previous run.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] when no frames are left.
    fn grow(&mut self, count: usize) -> Result<NonNull<u8>, MapError>;

    /// Map `count` physically contiguous DMA pages.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] when no contiguous run is free.
    fn grow_dma(&mut self, count: usize) -> Result<(NonNull<u8>, PhysicalAddress), MapError>;
}

#[repr(C)]
struct Chunk {
    size: usize,
    prev: *mut Chunk,
    next: *mut Chunk,
}

impl Chunk {
    /// # Safety
    /// `chunk` must point at a chunk header inside the heap.
    unsafe fn payload(chunk: *mut Self) -> *mut u8 {
        unsafe { chunk.cast::<u8>().add(WORD) }
    }

    /// # Safety
    /// `payload` must have been returned by [`Chunk::payload`].
    unsafe fn from_payload(payload: *mut u8) -> *mut Self {
        unsafe { payload.sub(WORD).cast() }
    }

    /// Address one past the chunk.
    ///
    /// # Safety
    /// `chunk` must point at a valid header.
    unsafe fn end(chunk: *mut Self) -> usize {
        chunk.addr() + WORD + unsafe { (*chunk).size }
    }
}

#[derive(Debug, Copy, Clone)]
struct DmaChunk {
    virt: NonNull<u8>,
    phys: PhysicalAddress,
    size: usize,
    used: bool,
}

impl DmaChunk {
    /// The first `size` bytes of the chunk stay inside one DMA segment.
    const fn fits(&self, size: usize) -> bool {
        let offset = self.phys.as_u32() as usize & (DMA_BOUNDARY as usize - 1);
        !self.used && self.size >= size && offset + size <= DMA_BOUNDARY as usize
    }
}

/// The kernel heap over the page supply `B`.
pub struct KernelHeap<B> {
    pages: B,
    /// Lowest free chunk; the list is sorted by address.
    free: *mut Chunk,
    /// Every DMA run the heap ever mapped. Runs stay mapped for the life of
    /// the heap.
    dma: [Option<DmaChunk>; DMA_CHUNKS],
}

// Safety: the heap exclusively owns every chunk its pointers reach.
unsafe impl<B: Send> Send for KernelHeap<B> {}

impl<B: HeapPages> KernelHeap<B> {
    #[must_use]
    pub const fn new(pages: B) -> Self {
        Self {
            pages,
            free: null_mut(),
            dma: [None; DMA_CHUNKS],
        }
    }

    /// Map the first heap page.
    ///
    /// # Errors
    /// If the page supply is exhausted.
    pub fn init(&mut self) -> Result<(), MapError> {
        let page = self.pages.grow(1)?;
        // SAFETY: a fresh, exclusively owned page.
        unsafe { self.add_region(page, PAGE) };
        info!("kernel heap: first page at {page:p}");
        Ok(())
    }

    #[must_use]
    pub const fn pages(&self) -> &B {
        &self.pages
    }

    /// Allocate `size` bytes of `kind`.
    ///
    /// Returns `None` for zero-sized requests and when memory is exhausted.
    #[must_use]
    pub fn kmalloc(&mut self, kind: AllocKind, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        match kind {
            AllocKind::General => self.kmalloc_general(size),
            AllocKind::Dma => self.kmalloc_dma(size),
        }
    }

    /// [`kmalloc`](Self::kmalloc), zeroed.
    #[must_use]
    pub fn kzalloc(&mut self, kind: AllocKind, size: usize) -> Option<NonNull<u8>> {
        self.kcalloc(kind, 1, size)
    }

    /// Zeroed array of `num` elements of `size` bytes. `None` on overflow.
    #[must_use]
    pub fn kcalloc(&mut self, kind: AllocKind, num: usize, size: usize) -> Option<NonNull<u8>> {
        let total = num.checked_mul(size)?;
        let ptr = self.kmalloc(kind, total)?;
        // SAFETY: the allocation is at least `total` bytes long.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Return an allocation to its pool. Null is ignored.
    ///
    /// # Safety
    /// `ptr` must be null or returned by this heap and not freed since.
    ///
    /// # Panics
    /// If the chunk overlaps a free chunk (double free).
    pub unsafe fn kfree(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        if let Some(chunk) = self
            .dma
            .iter_mut()
            .flatten()
            .find(|c| c.used && c.virt == ptr)
        {
            chunk.used = false;
            debug!("kfree: DMA chunk {ptr:p} ({} bytes) kept for reuse", chunk.size);
            return;
        }

        // SAFETY: caller guarantees `ptr` came from `kmalloc_general`.
        unsafe { self.insert(Chunk::from_payload(ptr.as_ptr())) };
    }

    /// Physical address of the DMA allocation at `ptr`.
    #[must_use]
    pub fn dma_physical(&self, ptr: NonNull<u8>) -> Option<PhysicalAddress> {
        self.dma
            .iter()
            .flatten()
            .find(|c| c.used && c.virt == ptr)
            .map(|c| c.phys)
    }

    /// Free chunks as `(address, payload size)`, lowest address first.
    pub fn free_chunks(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut curr = self.free;
        core::iter::from_fn(move || {
            if curr.is_null() {
                return None;
            }
            // SAFETY: list nodes are valid headers.
            let (addr, size, next) = unsafe { (curr.addr(), (*curr).size, (*curr).next) };
            curr = next;
            Some((addr, size))
        })
    }

    fn kmalloc_general(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = size.checked_next_multiple_of(CHUNK_ALIGN)?;

        let chunk = match self.find(size) {
            Some(chunk) => chunk,
            None => {
                self.grow(size)?;
                self.find(size)?
            }
        };

        // SAFETY: `chunk` is a free list node large enough for `size`.
        unsafe {
            self.unlink(chunk);
            if (*chunk).size > size + HEADER {
                let rest = Self::split(chunk, size);
                self.insert(rest);
            }
            NonNull::new(Chunk::payload(chunk))
        }
    }

    /// Map enough pages for a `size` byte chunk and add them to the list.
    fn grow(&mut self, size: usize) -> Option<()> {
        let count = size.checked_add(WORD)?.div_ceil(PAGE);
        match self.pages.grow(count) {
            Ok(start) => {
                debug!("kernel heap: grew by {count} page(s) at {start:p}");
                // SAFETY: fresh pages from the supply.
                unsafe { self.add_region(start, count * PAGE) };
                Some(())
            }
            Err(e) => {
                warn!("kernel heap: cannot grow by {count} page(s): {e}");
                None
            }
        }
    }

    /// First free chunk with at least `size` payload bytes.
    fn find(&self, size: usize) -> Option<*mut Chunk> {
        let mut curr = self.free;
        while !curr.is_null() {
            // SAFETY: list nodes are valid headers.
            unsafe {
                if (*curr).size >= size {
                    return Some(curr);
                }
                curr = (*curr).next;
            }
        }
        None
    }

    /// # Safety
    /// `[start, start + len)` must be unused heap memory.
    unsafe fn add_region(&mut self, start: NonNull<u8>, len: usize) {
        let chunk = start.as_ptr().cast::<Chunk>();
        unsafe {
            (*chunk).size = len - WORD;
            self.insert(chunk);
        }
    }

    /// Cut `chunk` after `size` payload bytes and return the remainder.
    ///
    /// # Safety
    /// `chunk.size` must exceed `size + HEADER`.
    unsafe fn split(chunk: *mut Chunk, size: usize) -> *mut Chunk {
        unsafe {
            assert!(
                (*chunk).size > size + HEADER,
                "split of a {} byte chunk at {size}",
                (*chunk).size
            );
            let rest = Chunk::payload(chunk).add(size).cast::<Chunk>();
            (*rest).size = (*chunk).size - size - WORD;
            (*chunk).size = size;
            rest
        }
    }

    /// # Safety
    /// `chunk` must be on the free list.
    unsafe fn unlink(&mut self, chunk: *mut Chunk) {
        unsafe {
            let (prev, next) = ((*chunk).prev, (*chunk).next);
            if prev.is_null() {
                self.free = next;
            } else {
                (*prev).next = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
        }
    }

    /// Insert in address order and merge with touching neighbours.
    ///
    /// # Safety
    /// `chunk` must be a valid header not on the free list.
    unsafe fn insert(&mut self, chunk: *mut Chunk) {
        unsafe {
            let mut prev: *mut Chunk = null_mut();
            let mut curr = self.free;
            while !curr.is_null() && curr < chunk {
                prev = curr;
                curr = (*curr).next;
            }

            assert!(
                (prev.is_null() || Chunk::end(prev) <= chunk.addr())
                    && (curr.is_null() || Chunk::end(chunk) <= curr.addr()),
                "double free of heap chunk at {chunk:p}"
            );

            (*chunk).prev = prev;
            (*chunk).next = curr;
            if prev.is_null() {
                self.free = chunk;
            } else {
                (*prev).next = chunk;
            }
            if !curr.is_null() {
                (*curr).prev = chunk;
            }

            Self::defrag_after(chunk);
            Self::defrag_before(chunk);
        }
    }

    unsafe fn defrag_after(chunk: *mut Chunk) {
        unsafe {
            while !(*chunk).next.is_null() && Chunk::end(chunk) == (*chunk).next.addr() {
                let next = (*chunk).next;
                (*chunk).size += WORD + (*next).size;
                (*chunk).next = (*next).next;
                if !(*chunk).next.is_null() {
                    (*(*chunk).next).prev = chunk;
                }
            }
        }
    }

    unsafe fn defrag_before(mut chunk: *mut Chunk) {
        unsafe {
            while !(*chunk).prev.is_null() && Chunk::end((*chunk).prev) == chunk.addr() {
                let prev = (*chunk).prev;
                (*prev).size += WORD + (*chunk).size;
                (*prev).next = (*chunk).next;
                if !(*chunk).next.is_null() {
                    (*(*chunk).next).prev = prev;
                }
                chunk = prev;
            }
        }
    }

    fn kmalloc_dma(&mut self, size: usize) -> Option<NonNull<u8>> {
        let size = size.checked_next_multiple_of(PAGE)?;
        if size > DMA_BOUNDARY as usize {
            warn!("kmalloc: {size} byte DMA buffer would cross a DMA boundary");
            return None;
        }

        if let Some(index) = self.dma.iter().position(|c| c.is_some_and(|c| c.fits(size))) {
            return Some(self.reuse_dma(index, size));
        }

        let Some(slot) = self.dma.iter().position(Option::is_none) else {
            warn!("kmalloc: DMA chunk table full");
            return None;
        };
        let (virt, phys) = match self.pages.grow_dma(size / PAGE) {
            Ok(run) => run,
            Err(e) => {
                warn!("kmalloc: no {size} byte DMA run: {e}");
                return None;
            }
        };
        self.dma[slot] = Some(DmaChunk {
            virt,
            phys,
            size,
            used: true,
        });
        debug!("kmalloc: DMA chunk {virt:p} -> {phys} ({size} bytes)");
        Some(virt)
    }

    /// Hand out the free DMA chunk at `index`, splitting off the tail when
    /// the table has room for it.
    fn reuse_dma(&mut self, index: usize, size: usize) -> NonNull<u8> {
        let spare = self.dma.iter().position(Option::is_none);
        let Some(chunk) = self.dma[index].as_mut() else {
            unreachable!("DMA chunk {index} vanished");
        };

        let mut tail = None;
        if chunk.size > size
            && let Some(spare) = spare
        {
            #[allow(clippy::cast_possible_truncation)]
            let phys = chunk.phys + size as u32;
            // SAFETY: `size` is within the chunk.
            let virt = unsafe { chunk.virt.add(size) };
            tail = Some((
                spare,
                DmaChunk {
                    virt,
                    phys,
                    size: chunk.size - size,
                    used: false,
                },
            ));
            chunk.size = size;
        }
        chunk.used = true;
        let virt = chunk.virt;

        if let Some((spare, rest)) = tail {
            self.dma[spare] = Some(rest);
        }
        debug!("kmalloc: reusing DMA chunk {virt:p} ({size} bytes)");
        virt
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec;

    #[repr(C, align(4096))]
    pub struct Page([u8; 4096]);

    /// Contiguous pages handed out front to back; DMA runs get fake
    /// physical addresses starting at `dma_phys`.
    pub struct TestPages {
        arena: Vec<Page>,
        used: usize,
        dma_phys: u32,
    }

    impl TestPages {
        pub fn new(pages: usize) -> Self {
            Self {
                arena: (0..pages).map(|_| Page([0; 4096])).collect(),
                used: 0,
                dma_phys: 0x10_0000,
            }
        }

        pub fn base(&self) -> usize {
            self.arena.as_ptr().addr()
        }

        pub const fn used(&self) -> usize {
            self.used
        }
    }

    unsafe impl HeapPages for TestPages {
        fn grow(&mut self, count: usize) -> Result<NonNull<u8>, MapError> {
            if self.used + count > self.arena.len() {
                return Err(MapError::OutOfMemory);
            }
            // SAFETY: in bounds; the arena buffer never moves.
            let page = unsafe { self.arena.as_mut_ptr().add(self.used) };
            self.used += count;
            NonNull::new(page.cast::<u8>()).ok_or(MapError::OutOfMemory)
        }

        #[allow(clippy::cast_possible_truncation)]
        fn grow_dma(&mut self, count: usize) -> Result<(NonNull<u8>, PhysicalAddress), MapError> {
            let virt = self.grow(count)?;
            let phys = PhysicalAddress::new(self.dma_phys);
            self.dma_phys += count as u32 * PAGE_SIZE;
            Ok((virt, phys))
        }
    }

    fn heap(pages: usize) -> KernelHeap<TestPages> {
        let mut heap = KernelHeap::new(TestPages::new(pages));
        heap.init().unwrap();
        heap
    }

    fn free_list(heap: &KernelHeap<TestPages>) -> Vec<(usize, usize)> {
        heap.free_chunks().collect()
    }

    #[test]
    fn starts_with_one_free_page() {
        let heap = heap(4);
        assert_eq!(free_list(&heap), vec![(heap.pages().base(), PAGE - WORD)]);
    }

    #[test]
    fn zero_sized_requests_return_none() {
        let mut heap = heap(4);
        assert_eq!(heap.kmalloc(AllocKind::General, 0), None);
        assert_eq!(heap.kmalloc(AllocKind::Dma, 0), None);
        assert_eq!(heap.kzalloc(AllocKind::General, 0), None);
    }

    #[test]
    fn allocations_are_disjoint_and_word_aligned() {
        let mut heap = heap(4);
        let sizes = [1, 7, 8, 24, 100, 3];
        let ptrs: Vec<_> = sizes
            .iter()
            .map(|&s| heap.kmalloc(AllocKind::General, s).unwrap())
            .collect();

        for (p, &s) in ptrs.iter().zip(&sizes) {
            assert_eq!(p.as_ptr().addr() % WORD, 0);
            unsafe { ptr::write_bytes(p.as_ptr(), 0xAB, s) };
        }
        let mut spans: Vec<_> = ptrs
            .iter()
            .zip(&sizes)
            .map(|(p, &s)| (p.as_ptr().addr(), p.as_ptr().addr() + s))
            .collect();
        spans.sort_unstable();
        assert!(spans.windows(2).all(|w| w[0].1 <= w[1].0));
    }

    #[test]
    fn freeing_everything_leaves_one_chunk() {
        let mut heap = heap(8);
        let sizes = [16, 40, 8, 200, 1000, 32, 64, 3000, 12, 500];
        let ptrs: Vec<_> = sizes
            .iter()
            .map(|&s| heap.kmalloc(AllocKind::General, s).unwrap())
            .collect();
        assert!(heap.pages().used() > 1);

        for i in [3, 0, 9, 5, 1, 7, 2, 8, 6, 4] {
            unsafe { heap.kfree(ptrs[i].as_ptr()) };
        }

        let pages = heap.pages().used();
        assert_eq!(
            free_list(&heap),
            vec![(heap.pages().base(), pages * PAGE - WORD)]
        );
    }

    #[test]
    fn freed_chunks_are_reused_first_fit() {
        let mut heap = heap(4);
        let a = heap.kmalloc(AllocKind::General, 32).unwrap();
        let _b = heap.kmalloc(AllocKind::General, 32).unwrap();
        unsafe { heap.kfree(a.as_ptr()) };

        let c = heap.kmalloc(AllocKind::General, 16).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn large_requests_take_page_runs() {
        let mut heap = heap(8);
        let big = heap.kmalloc(AllocKind::General, 10_000).unwrap();
        assert_eq!(heap.pages().used(), 4);
        unsafe { ptr::write_bytes(big.as_ptr(), 0x5A, 10_000) };

        unsafe { heap.kfree(big.as_ptr()) };
        assert_eq!(
            free_list(&heap),
            vec![(heap.pages().base(), 4 * PAGE - WORD)]
        );
    }

    #[test]
    fn exhaustion_returns_none_and_keeps_the_heap_usable() {
        let mut heap = heap(1);
        assert_eq!(heap.kmalloc(AllocKind::General, 2 * PAGE), None);
        assert!(heap.kmalloc(AllocKind::General, 64).is_some());
    }

    #[test]
    fn zeroed_allocations() {
        let mut heap = heap(4);
        let p = heap.kmalloc(AllocKind::General, 64).unwrap();
        unsafe {
            ptr::write_bytes(p.as_ptr(), 0xFF, 64);
            heap.kfree(p.as_ptr());
        }

        let q = heap.kcalloc(AllocKind::General, 8, 8).unwrap();
        assert_eq!(q, p);
        let bytes = unsafe { core::slice::from_raw_parts(q.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));

        assert_eq!(heap.kcalloc(AllocKind::General, usize::MAX, 2), None);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut heap = heap(4);
        let p = heap.kmalloc(AllocKind::General, 64).unwrap();
        let _q = heap.kmalloc(AllocKind::General, 64).unwrap();
        unsafe {
            heap.kfree(p.as_ptr());
            heap.kfree(p.as_ptr());
        }
    }

    #[test]
    fn dma_chunks_are_page_granular_and_reused() {
        let mut heap = heap(8);
        let a = heap.kmalloc(AllocKind::Dma, 5000).unwrap();
        assert_eq!(a.as_ptr().addr() % PAGE, 0);
        assert_eq!(heap.dma_physical(a), Some(PhysicalAddress::new(0x10_0000)));
        let used = heap.pages().used();

        unsafe { heap.kfree(a.as_ptr()) };
        assert_eq!(heap.dma_physical(a), None);
        assert_eq!(free_list(&heap).len(), 1);

        let b = heap.kmalloc(AllocKind::Dma, 100).unwrap();
        let c = heap.kmalloc(AllocKind::Dma, 4096).unwrap();
        assert_eq!(b, a);
        assert_eq!(c.as_ptr().addr(), a.as_ptr().addr() + PAGE);
        assert_eq!(heap.dma_physical(c), Some(PhysicalAddress::new(0x10_1000)));
        assert_eq!(heap.pages().used(), used);
    }

    #[test]
    fn oversized_dma_requests_fail() {
        let mut heap = heap(32);
        assert_eq!(
            heap.kmalloc(AllocKind::Dma, DMA_BOUNDARY as usize + 1),
            None
        );
    }
}
