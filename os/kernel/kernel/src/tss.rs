//! # 32-bit Task State Segment
//!
//! The kernel never uses hardware task switching. The TSS only supplies
//! `ss0:esp0`, the stack the CPU switches to when an interrupt arrives in
//! ring 3. `esp0` is the top of the current task's kernel stack and is
//! rewritten on every return to a task.

use crate::gdt::KERNEL_DS;
use core::mem::size_of;

#[repr(C)]
pub struct Tss32 {
    pub link: u32,
    /// Ring-0 stack pointer loaded on a ring 3 → ring 0 transition.
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldt: u32,
    pub trap: u16,
    /// Offset of the I/O permission bitmap. Pointing it past the limit
    /// means there is no bitmap; user port I/O faults.
    pub iopb_offset: u16,
}

#[allow(clippy::cast_possible_truncation)]
pub const TSS_LIMIT: u32 = (size_of::<Tss32>() - 1) as u32;

const _: () = assert!(size_of::<Tss32>() == 104);

impl Default for Tss32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tss32 {
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: KERNEL_DS as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }
}

static mut TSS: Tss32 = Tss32::new();

/// Linear address of the TSS, for its GDT descriptor.
pub fn tss_base() -> u32 {
    (&raw const TSS) as u32
}

/// Update the ring-0 stack used on the next user → kernel transition.
///
/// Only called with interrupts disabled.
pub fn set_esp0(top: usize) {
    #[allow(clippy::cast_possible_truncation)]
    // SAFETY: single CPU; the CPU only reads `esp0` while delivering an
    // interrupt, which cannot happen while this runs.
    unsafe {
        (&raw mut TSS.esp0).write_volatile(top as u32);
    }
}
