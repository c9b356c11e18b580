//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit memory addresses and page bases used by
//! the paging, frame allocation and address-space code.
//!
//! ## Overview
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory or MMIO regions. |
//!
//! ## Page Sizes
//!
//! Two-level i386 paging knows two granularities, both modelled as marker
//! types implementing [`PageSize`]:
//!
//! - [`Size4K`] — 4 KiB pages, mapped by a page table entry
//! - [`Size4M`] — the 4 MiB region covered by one page directory entry
//!
//! ## Directory and table indices
//!
//! A virtual address splits into a 10-bit directory index, a 10-bit table
//! index and a 12-bit page offset:
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_2345);
//! assert_eq!(va.directory_index(), 0x300);
//! assert_eq!(va.table_index(), 0x102);
//! assert_eq!(va.offset::<Size4K>().as_u32(), 0x345);
//!
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.join(off), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Align `x` down to the nearest multiple of `a` (`a` must be a power of two).
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (`a` must be a power of two).
///
/// Returns `None` if the aligned value does not fit into 32 bits.
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
