//! # Typed i386 Control Registers
//!
//! Bitfield views of the control registers the memory manager and the
//! interrupt glue touch: CR0 (paging enable), CR2 (faulting address),
//! CR3 (page directory base) and EFLAGS. Register access instructions are
//! only emitted with the `asm` feature on a 32-bit x86 target; on any other
//! target the types remain usable as plain values.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

#[cfg(all(feature = "tlb", target_arch = "x86"))]
pub mod tlb;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
