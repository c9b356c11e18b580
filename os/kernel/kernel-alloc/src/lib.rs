//! # Kernel Memory Allocation
//!
//! Physical frame management and the kernel heap, layered on the paging
//! primitives of `kernel-vmem`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │             Kernel Heap (kmalloc / kfree)           │
//! │    • sorted free list, split + coalesce             │
//! │    • page-granular DMA chunks                       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ pages on demand
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Page Table Manager (kernel-vmem)       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • intrusive free stack (general frames)          │
//! │    • bitmap over the DMA window                     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ link words of free frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Temporary Window Mapper                   │
//! │    • 16 scratch pages below the recursive tables    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! - [`FrameAllocator`]: seeded once from the Multiboot memory map; hands
//!   out general frames from a [`FreeFrameStack`] and contiguous DMA runs
//!   from a [`DmaBitmap`]. Implements `kernel_vmem::FrameAlloc` and
//!   `kernel_vmem::DmaFrameAlloc`.
//! - [`TempWindow`]: maps arbitrary physical frames into scratch slots;
//!   on the live directory it is the kernel's `PhysMapper`.
//! - [`KernelHeap`]: `kmalloc`/`kzalloc`/`kcalloc`/`kfree` over a
//!   [`HeapPages`] supply; [`LockedHeap`] makes it the global allocator.
//!
//! None of these types lock internally except [`LockedHeap`]. The kernel
//! keeps the frame allocator behind a `kernel_sync::SpinLock` taken with
//! interrupts disabled.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod dma_bitmap;
mod frame_alloc;
mod frame_stack;
pub mod heap;
mod locked_heap;
mod temp_window;

pub use crate::dma_bitmap::DmaBitmap;
pub use crate::frame_alloc::{FrameAllocator, SeedError, SeedStats};
pub use crate::frame_stack::FreeFrameStack;
pub use crate::heap::{AllocKind, HeapPages, KernelHeap};
pub use crate::locked_heap::LockedHeap;
pub use crate::temp_window::{TempWindow, WindowGuard};

/// Re-export constants as info module.
pub use kernel_info::memory as info;
