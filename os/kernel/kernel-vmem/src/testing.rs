//! Test doubles for hardware: simulated RAM, frame allocators and a TLB
//! that records what was flushed.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! the tests of dependent crates.

use crate::{DmaFrameAlloc, FrameAlloc, FrameBytes, PhysMapper, Tlb};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::{RefCell, UnsafeCell};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Simulated physical RAM.
///
/// Physical addresses are byte offsets from 0; frame `n` covers
/// `[n * 4096, (n + 1) * 4096)`.
pub struct TestPhys {
    frames: Vec<Box<UnsafeCell<FrameBytes>>>,
}

impl TestPhys {
    #[must_use]
    pub fn with_frames(n: usize) -> Self {
        let frames = (0..n)
            .map(|_| Box::new(UnsafeCell::new(FrameBytes([0; 4096]))))
            .collect();
        Self { frames }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Copy `buf.len()` bytes starting at `pa` out of RAM.
    pub fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            let at = pa + u32::try_from(i).unwrap_or(u32::MAX);
            let (page, off) = at.split::<Size4K>();
            *b = self.with_frame(page, |f| f.0[off.as_usize()]);
        }
    }

    /// Copy `data` into RAM starting at `pa`.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            let at = pa + u32::try_from(i).unwrap_or(u32::MAX);
            let (page, off) = at.split::<Size4K>();
            self.with_frame(page, |f| f.0[off.as_usize()] = *b);
        }
    }
}

impl PhysMapper for TestPhys {
    fn with_frame<R>(&self, frame: PhysicalPage<Size4K>, f: impl FnOnce(&mut FrameBytes) -> R) -> R {
        let idx = frame.frame_number() as usize;
        let cell = self
            .frames
            .get(idx)
            .unwrap_or_else(|| panic!("frame {frame} outside simulated RAM"));
        // SAFETY: callers never nest accesses to the same frame.
        f(unsafe { &mut *cell.get() })
    }
}

/// A trivial **bump** allocator over frame numbers `[next, end)`.
///
/// Freed frames are reused before the cursor moves on, and every free is
/// recorded so tests can check what came back.
pub struct BumpAlloc {
    next: usize,
    end: usize,
    reuse: Vec<PhysicalPage<Size4K>>,
    freed: Vec<PhysicalPage<Size4K>>,
    dma_freed: Vec<(PhysicalPage<Size4K>, usize)>,
    in_use: usize,
}

impl BumpAlloc {
    #[must_use]
    pub const fn new(first_frame: usize, end_frame: usize) -> Self {
        Self {
            next: first_frame,
            end: end_frame,
            reuse: Vec::new(),
            freed: Vec::new(),
            dma_freed: Vec::new(),
            in_use: 0,
        }
    }

    /// Frames handed out and not yet returned.
    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn freed(&self) -> &[PhysicalPage<Size4K>] {
        &self.freed
    }

    #[must_use]
    pub fn dma_freed(&self) -> &[(PhysicalPage<Size4K>, usize)] {
        &self.dma_freed
    }

    #[allow(clippy::cast_possible_truncation)]
    fn take(&mut self, count: usize) -> Option<PhysicalPage<Size4K>> {
        if self.next + count > self.end {
            return None;
        }
        let first = PhysicalPage::from_number(self.next as u32);
        self.next += count;
        self.in_use += count;
        Some(first)
    }
}

impl FrameAlloc for BumpAlloc {
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        if let Some(frame) = self.reuse.pop() {
            self.in_use += 1;
            return Some(frame);
        }
        self.take(1)
    }

    fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        assert!(!self.reuse.contains(&frame), "double free of {frame}");
        self.in_use -= 1;
        self.reuse.push(frame);
        self.freed.push(frame);
    }
}

impl DmaFrameAlloc for BumpAlloc {
    fn alloc_dma(&mut self, count: usize) -> Option<PhysicalPage<Size4K>> {
        self.take(count)
    }

    fn free_dma(&mut self, first: PhysicalPage<Size4K>, count: usize) {
        self.in_use -= count;
        self.dma_freed.push((first, count));
    }
}

/// Wraps an allocator and fails every allocation after the first `budget`.
pub struct FailAfter<A> {
    inner: A,
    budget: usize,
}

impl<A> FailAfter<A> {
    pub const fn new(inner: A, budget: usize) -> Self {
        Self { inner, budget }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    pub const fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: FrameAlloc> FrameAlloc for FailAfter<A> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        self.inner.alloc_frame()
    }

    fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        self.inner.free_frame(frame);
    }
}

/// One recorded TLB invalidation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Flush {
    Page(VirtualAddress),
    Slot(usize),
}

/// A [`Tlb`] that remembers every flush.
#[derive(Default)]
pub struct RecordingTlb {
    log: RefCell<Vec<Flush>>,
}

impl RecordingTlb {
    #[must_use]
    pub fn flushes(&self) -> Vec<Flush> {
        self.log.borrow().clone()
    }

    /// Directory slots flushed as a whole, in order.
    #[must_use]
    pub fn flushed_slots(&self) -> Vec<usize> {
        self.log
            .borrow()
            .iter()
            .filter_map(|f| match f {
                Flush::Slot(s) => Some(*s),
                Flush::Page(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Tlb for RecordingTlb {
    fn flush_page(&self, va: VirtualAddress) {
        self.log.borrow_mut().push(Flush::Page(va));
    }

    fn flush_slot(&self, slot: usize) {
        self.log.borrow_mut().push(Flush::Slot(slot));
    }
}
