//! # Virtual Memory Support
//!
//! i386 two-level paging (no PAE) for the kernel's memory manager.
//!
//! ## What you get
//! - Typed [`PdEntry`]/[`PtEntry`] over a shared [`PageEntryBits`] bitfield,
//!   and 4 KiB-aligned [`PageDirectory`]/[`PageTable`] frames.
//! - A [`PageTableView`] abstraction hiding *how* the entries of a directory
//!   are reached: through the recursive self-mapping of the live directory
//!   ([`RecursiveMapping`]) or by walking physical frames ([`WalkedTables`]).
//! - The page table manager, [`PageMapper`]: map, allocate (with rollback),
//!   free, unmap, translate and user-pointer checks.
//! - [`AddressSpace`]: per-task directories with eager fork cloning and a
//!   diff-based [`switch_address_space`].
//! - Small collaborator traits: [`FrameAlloc`], [`DmaFrameAlloc`],
//!   [`PhysMapper`] and [`Tlb`].
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12  | 11‒0   |
//! | Directory | Table  | Offset |
//! ```
//!
//! Both levels hold 1024 four-byte entries. A directory entry (PDE) points to
//! a page table; a table entry (PTE) maps one 4 KiB frame.
//!
//! ## Recursive mapping
//!
//! Directory slot 1023 of the live directory points at the directory itself.
//! The CPU then treats the directory as a page table for the top 4 MiB, so
//!
//! - the directory's own entries appear at `0xFFFF_F000`, and
//! - the page table covering slot `d` appears at `0xFFC0_0000 + d * 4096`.
//!
//! ## The live directory
//!
//! The CPU's CR3 never changes after boot. Every [`AddressSpace`] owns a
//! *saved copy* of its user-range directory slots; switching copies only the
//! slots that differ into the live directory and flushes their translations.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod address_space;
mod mapper;
mod page_entry_bits;
pub mod page_table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod view;

pub use crate::address_space::{AddressSpace, KernelDirectory, SwitchStats, switch_address_space};
pub use crate::mapper::{MapError, MapFlags, PageMapper, check_user_ptr};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageDirectory, PageTable, PdEntry, PtEntry};
pub use crate::view::{PageTableView, RecursiveMapping, WalkedTables};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Raw contents of one physical frame.
#[repr(C, align(4096))]
pub struct FrameBytes(pub [u8; 4096]);

impl FrameBytes {
    /// Reinterpret the frame as a page table.
    #[inline]
    pub fn as_table_mut(&mut self) -> &mut PageTable {
        // SAFETY: same size and alignment; every bit pattern is a valid entry.
        unsafe { &mut *core::ptr::from_mut(self).cast::<PageTable>() }
    }

    /// Reinterpret the frame as a page directory.
    #[inline]
    pub fn as_directory_mut(&mut self) -> &mut PageDirectory {
        // SAFETY: same size and alignment; every bit pattern is a valid entry.
        unsafe { &mut *core::ptr::from_mut(self).cast::<PageDirectory>() }
    }

    /// Read the little-endian word at byte `offset`.
    #[inline]
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut w = [0u8; 4];
        w.copy_from_slice(&self.0[offset..offset + 4]);
        u32::from_le_bytes(w)
    }

    /// Write the little-endian word at byte `offset`.
    #[inline]
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Source of **physical** 4 KiB frames.
///
/// Returned frames **must** be 4 KiB aligned and exclusively owned by the
/// caller until handed back through [`free_frame`](Self::free_frame).
pub trait FrameAlloc {
    /// Allocate one frame. Returns `None` on out-of-memory.
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame to the pool. Freeing a frame twice is a caller bug.
    fn free_frame(&mut self, frame: PhysicalPage<Size4K>);
}

/// Source of physically **contiguous**, device-addressable frame runs.
pub trait DmaFrameAlloc {
    /// Allocate `count` contiguous frames; returns the first one.
    fn alloc_dma(&mut self, count: usize) -> Option<PhysicalPage<Size4K>>;

    /// Release a run previously returned by [`alloc_dma`](Self::alloc_dma).
    fn free_dma(&mut self, first: PhysicalPage<Size4K>, count: usize);
}

/// Grants temporary access to a physical frame that may not be mapped in
/// the current address space.
///
/// - **Kernel**: maps the frame into a temporary window slot for the duration
///   of the closure.
/// - **Tests**: indexes into simulated RAM.
///
/// Implementations may allow nested calls on *different* frames. Nesting on
/// the same frame aliases `&mut` and is a caller bug.
pub trait PhysMapper {
    fn with_frame<R>(&self, frame: PhysicalPage<Size4K>, f: impl FnOnce(&mut FrameBytes) -> R)
    -> R;

    #[inline]
    fn with_table<R>(&self, frame: PhysicalPage<Size4K>, f: impl FnOnce(&mut PageTable) -> R) -> R {
        self.with_frame(frame, |bytes| f(bytes.as_table_mut()))
    }

    #[inline]
    fn with_directory<R>(
        &self,
        frame: PhysicalPage<Size4K>,
        f: impl FnOnce(&mut PageDirectory) -> R,
    ) -> R {
        self.with_frame(frame, |bytes| f(bytes.as_directory_mut()))
    }

    #[inline]
    fn zero_frame(&self, frame: PhysicalPage<Size4K>) {
        self.with_frame(frame, |bytes| bytes.0.fill(0));
    }

    /// Copy the full contents of `src` into `dst`.
    #[inline]
    fn copy_frame(&self, src: PhysicalPage<Size4K>, dst: PhysicalPage<Size4K>) {
        debug_assert_ne!(src, dst);
        self.with_frame(src, |s| self.with_frame(dst, |d| d.0.copy_from_slice(&s.0)));
    }
}

/// TLB maintenance after an entry of the *live* directory changed.
pub trait Tlb {
    /// Invalidate the translation of the page containing `va`.
    fn flush_page(&self, va: VirtualAddress);

    /// Invalidate every translation in the 4 MiB region of directory `slot`.
    fn flush_slot(&self, slot: usize) {
        for index in 0..kernel_memory_addresses::ENTRIES_PER_TABLE {
            self.flush_page(VirtualAddress::from_indices(slot, index));
        }
    }
}

/// TLB stand-in for tables that are not live (saved directory copies).
#[derive(Debug, Default, Copy, Clone)]
pub struct NoFlush;

impl Tlb for NoFlush {
    #[inline]
    fn flush_page(&self, _va: VirtualAddress) {}

    #[inline]
    fn flush_slot(&self, _slot: usize) {}
}

/// `invlpg`-backed TLB maintenance.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct HardwareTlb;

#[cfg(target_arch = "x86")]
impl Tlb for HardwareTlb {
    #[inline]
    fn flush_page(&self, va: VirtualAddress) {
        // SAFETY: the kernel runs in ring 0.
        unsafe { kernel_registers::tlb::flush_page(va) }
    }
}
