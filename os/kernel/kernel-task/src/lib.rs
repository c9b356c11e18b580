//! # Tasks and Scheduling
//!
//! Process bookkeeping for the kernel: task records, per-task descriptor
//! tables, the round-robin [`Scheduler`] and its system call dispatch.
//!
//! ```text
//!   timer IRQ ──► Scheduler::tick ─┐
//!   int 0x80  ──► Scheduler::syscall ─► fork / exec / exit / wait / files
//!                                  │
//!                                  ▼
//!                       switch_tasks ──► kernel_vmem::switch_address_space
//! ```
//!
//! Nothing here touches the CPU. The kernel's entry stubs save a
//! [`Registers`] frame on the current task's [`KernelStack`], call into the
//! scheduler, then resume whichever task is current afterwards. All
//! memory is reached through a [`MemoryContext`], so the whole crate runs
//! against simulated RAM in tests.
//!
//! Program images and the terminal come from a [`FileSystem`] the kernel
//! provides.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod error;
mod file_table;
pub mod fs;
mod memory;
mod registers;
mod scheduler;
mod task;
#[cfg(test)]
mod testing;
pub mod user;

pub use crate::error::TaskError;
pub use crate::file_table::FileTable;
pub use crate::fs::{FileSystem, FsError, OpenFile, OpenMode};
pub use crate::memory::MemoryContext;
pub use crate::registers::Registers;
pub use crate::scheduler::{PATH_MAX, Scheduler, WaitStatus};
pub use crate::task::{KernelStack, Pid, Task, TaskStatus};
