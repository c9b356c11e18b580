//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core; the only source of concurrency is
//! interrupts. Shared state (frame stack, heap free list, scheduler queues)
//! is therefore protected by a [`SpinLock`] taken with interrupts disabled
//! via [`SpinLock::lock_irq`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, without_interrupts};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
