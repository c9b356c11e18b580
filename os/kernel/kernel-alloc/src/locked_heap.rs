//! # Global allocator
//!
//! [`LockedHeap`] puts a [`KernelHeap`] behind a [`SpinLock`] taken with
//! interrupts disabled and implements [`GlobalAlloc`] on top of it, so the
//! kernel's `alloc` collections draw from the same general pool as
//! `kmalloc`.
//!
//! Heap payloads are word-aligned. Layouts with a larger alignment are
//! over-allocated; the word just below the aligned pointer remembers the
//! chunk it was carved from.

use crate::heap::{AllocKind, HeapPages, KernelHeap};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull, null_mut};
use kernel_sync::SpinLock;
use kernel_vmem::MapError;

const WORD: usize = size_of::<usize>();

pub struct LockedHeap<B> {
    heap: SpinLock<KernelHeap<B>>,
}

impl<B: HeapPages> LockedHeap<B> {
    #[must_use]
    pub const fn new(pages: B) -> Self {
        Self {
            heap: SpinLock::new(KernelHeap::new(pages)),
        }
    }

    /// Map the first heap page.
    ///
    /// # Errors
    /// If the page supply is exhausted.
    pub fn init(&self) -> Result<(), MapError> {
        self.heap.with_lock_irq(KernelHeap::init)
    }

    /// Run `f` on the heap with interrupts disabled.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut KernelHeap<B>) -> R) -> R {
        self.heap.with_lock_irq(f)
    }

    #[must_use]
    pub fn kmalloc(&self, kind: AllocKind, size: usize) -> Option<NonNull<u8>> {
        self.with_heap(|heap| heap.kmalloc(kind, size))
    }

    /// # Safety
    /// See [`KernelHeap::kfree`].
    pub unsafe fn kfree(&self, ptr: *mut u8) {
        self.with_heap(|heap| unsafe { heap.kfree(ptr) });
    }
}

unsafe impl<B: HeapPages + Send> GlobalAlloc for LockedHeap<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= WORD {
            return self
                .kmalloc(AllocKind::General, layout.size().max(1))
                .map_or(null_mut(), NonNull::as_ptr);
        }

        let Some(padded) = layout.size().checked_add(layout.align()) else {
            return null_mut();
        };
        let Some(raw) = self.kmalloc(AllocKind::General, padded) else {
            return null_mut();
        };

        let raw = raw.as_ptr();
        let offset = (raw.addr() + WORD).next_multiple_of(layout.align()) - raw.addr();
        // SAFETY: `WORD <= offset <= align`, inside the padded chunk.
        unsafe {
            let aligned = raw.add(offset);
            aligned.cast::<*mut u8>().sub(1).write(raw);
            aligned
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let raw = if layout.align() <= WORD {
            ptr
        } else {
            // SAFETY: written by `alloc` right below the aligned pointer.
            unsafe { ptr.cast::<*mut u8>().sub(1).read() }
        };
        unsafe { self.kfree(raw) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::tests::TestPages;

    fn heap() -> LockedHeap<TestPages> {
        let heap = LockedHeap::new(TestPages::new(8));
        heap.init().unwrap();
        heap
    }

    fn free_chunks(heap: &LockedHeap<TestPages>) -> usize {
        heap.with_heap(|h| h.free_chunks().count())
    }

    #[test]
    fn honours_large_alignments() {
        let heap = heap();
        let layouts = [
            Layout::from_size_align(24, 64).unwrap(),
            Layout::from_size_align(100, 256).unwrap(),
            Layout::from_size_align(8, 4096).unwrap(),
        ];

        let ptrs: Vec<_> = layouts
            .iter()
            .map(|&l| {
                let p = unsafe { heap.alloc(l) };
                assert!(!p.is_null());
                assert_eq!(p.addr() % l.align(), 0);
                unsafe { ptr::write_bytes(p, 0xCD, l.size()) };
                p
            })
            .collect();

        for (p, l) in ptrs.into_iter().zip(layouts) {
            unsafe { heap.dealloc(p, l) };
        }
        assert_eq!(free_chunks(&heap), 1);
    }

    #[test]
    fn zero_sized_layouts_still_get_a_pointer() {
        let heap = heap();
        let layout = Layout::from_size_align(0, 1).unwrap();
        let p = unsafe { heap.alloc(layout) };
        assert!(!p.is_null());
        unsafe { heap.dealloc(p, layout) };
        assert_eq!(free_chunks(&heap), 1);
    }

    #[test]
    fn alloc_zeroed_clears_reused_memory() {
        let heap = heap();
        let layout = Layout::from_size_align(128, 8).unwrap();
        unsafe {
            let p = heap.alloc(layout);
            ptr::write_bytes(p, 0xEE, 128);
            heap.dealloc(p, layout);

            let q = heap.alloc_zeroed(layout);
            assert_eq!(q, p);
            assert!(core::slice::from_raw_parts(q, 128).iter().all(|&b| b == 0));
            heap.dealloc(q, layout);
        }
    }
}
