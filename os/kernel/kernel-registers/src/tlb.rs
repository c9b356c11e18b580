//! TLB maintenance instructions.

use crate::cr3::Cr3;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_memory_addresses::VirtualAddress;

/// Invalidate the translation of the page containing `va`.
///
/// # Safety
/// Ring 0 only.
#[inline]
pub unsafe fn flush_page(va: VirtualAddress) {
    let addr = va.as_u32();
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) addr, options(nostack, preserves_flags));
    }
}

/// Invalidate every non-global translation by reloading CR3.
///
/// # Safety
/// Ring 0 only.
#[inline]
pub unsafe fn flush_all() {
    unsafe {
        let cr3 = Cr3::load_unsafe();
        cr3.store_unsafe();
    }
}
