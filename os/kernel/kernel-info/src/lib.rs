//! # Kernel Configuration and Boot Interface
//!
//! Layout constants, CPU-level constants, scheduler tuning and the Multiboot
//! handoff structures shared by every kernel crate. Everything here is
//! compile-time configuration; the kernel has no runtime configuration layer.
//!
//! ## Modules
//!
//! - [`memory`]: virtual address space layout (higher-half kernel at
//!   [`KERNEL_VIRTUAL_OFFSET`](memory::KERNEL_VIRTUAL_OFFSET), recursive
//!   directory slot, temporary window, heap, user stack, DMA pool).
//! - [`cpu`]: segment selectors, EFLAGS bits and interrupt vectors.
//! - [`scheduler`]: timer frequency, time slice, per-task limits.
//! - [`boot`]: the Multiboot information block and memory map parser used to
//!   seed the frame allocator.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐ USER_ENTRY
//!             │   User program image (brk ↑)    │
//!             │                                 │
//!             │   User stack page               │
//! 0xC000_0000 ├─────────────────────────────────┤ KERNEL_VIRTUAL_OFFSET (slot 768)
//!             │   Kernel image                  │
//! 0xD000_0000 ├─────────────────────────────────┤ HEAP_START
//!             │   Kernel heap (grows ↑)         │
//! 0xFFBF_0000 ├─────────────────────────────────┤ TEMP_WINDOW_START
//!             │   Temporary window slots        │
//! 0xFFC0_0000 ├─────────────────────────────────┤ RECURSIVE_TABLES (slot 1023)
//!             │   Page tables, self-mapped      │
//! 0xFFFF_F000 ├─────────────────────────────────┤ RECURSIVE_DIRECTORY
//!             │   Page directory, self-mapped   │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod cpu;
pub mod memory;
pub mod scheduler;
