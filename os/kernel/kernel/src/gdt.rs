//! # Global Descriptor Table (GDT) and TSS wiring
//!
//! Segmentation is flat: every code and data segment spans the full 4 GiB
//! and paging does the protection. The selectors still matter:
//!
//! - `iretd` into a user task needs ring-3 code and data descriptors and
//!   selectors carrying `RPL = 3`.
//! - An interrupt from ring 3 switches to `esp0` of the loaded TSS, so the
//!   TSS must be installed (`ltr`) before the first task runs.
//!
//! ## Layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code ([`KERNEL_CS_SEL`])
//! 2     | 0x10     | Kernel data ([`KERNEL_DS_SEL`])
//! 3     | 0x18     | User code, with RPL 3: **0x1b** ([`USER_CS_SEL`])
//! 4     | 0x20     | User data, with RPL 3: **0x23** ([`USER_DS_SEL`])
//! 5     | 0x28     | TSS ([`TSS_SYS_SEL`])

pub mod descriptors;
pub mod selectors;

use crate::gdt::descriptors::Desc32;
use crate::gdt::selectors::{CodeSel, DataSel, SegmentSelector, TssSel};
use crate::privilege::{Dpl, Rpl};
#[cfg(target_arch = "x86")]
use crate::tss::{TSS_LIMIT, tss_base};
use core::mem::size_of;
use kernel_info::cpu;

pub const KERNEL_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(1, Rpl::Ring0);
pub const KERNEL_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(2, Rpl::Ring0);
pub const USER_CS_SEL: SegmentSelector<CodeSel> = SegmentSelector::<CodeSel>::new(3, Rpl::Ring3);
pub const USER_DS_SEL: SegmentSelector<DataSel> = SegmentSelector::<DataSel>::new(4, Rpl::Ring3);
pub const TSS_SYS_SEL: SegmentSelector<TssSel> = SegmentSelector::<TssSel>::new(5);

pub const KERNEL_CS: u16 = KERNEL_CS_SEL.encode();
pub const KERNEL_DS: u16 = KERNEL_DS_SEL.encode();
pub const USER_CS: u16 = USER_CS_SEL.encode();
pub const USER_DS: u16 = USER_DS_SEL.encode();
pub const TSS_SEL: u16 = TSS_SYS_SEL.encode();

// Trap frames are built from the constants in `kernel_info::cpu`; the table
// must agree with them.
#[allow(clippy::cast_possible_truncation)]
const _: () = {
    assert!(KERNEL_CS as u32 == cpu::KERNEL_CODE_SELECTOR);
    assert!(KERNEL_DS as u32 == cpu::KERNEL_DATA_SELECTOR);
    assert!(USER_CS as u32 == cpu::USER_CODE_SELECTOR);
    assert!(USER_DS as u32 == cpu::USER_DATA_SELECTOR);
    assert!(TSS_SEL as u32 == cpu::TSS_SELECTOR);
    assert!(size_of::<Gdt>() == 6 * 8);
};

/// Operand of `lgdt`.
#[cfg(target_arch = "x86")]
#[repr(C, packed)]
struct DescTablePtr {
    /// Size of the table minus one.
    limit: u16,
    base: u32,
}

#[repr(C, align(8))]
pub struct Gdt {
    null: Desc32,
    kcode: Desc32,
    kdata: Desc32,
    ucode: Desc32,
    udata: Desc32,
    tss: Desc32,
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    /// The table with a non-present TSS slot.
    pub const fn new() -> Self {
        Self::new_with_tss(Desc32::null())
    }

    pub const fn new_with_tss(tss: Desc32) -> Self {
        Self {
            null: Desc32::null(),
            kcode: Desc32::code(Dpl::Ring0),
            kdata: Desc32::data(Dpl::Ring0),
            ucode: Desc32::code(Dpl::Ring3),
            udata: Desc32::data(Dpl::Ring3),
            tss,
        }
    }
}

/// The only GDT. The CPU keeps reading it, so it lives in static storage.
#[cfg(target_arch = "x86")]
static mut GDT: Gdt = Gdt::new();

/// # Safety
/// `gdt` must stay mapped for as long as it is loaded.
#[cfg(target_arch = "x86")]
#[inline]
#[allow(clippy::cast_possible_truncation)]
unsafe fn load_gdt(gdt: *const Gdt) {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: gdt as u32,
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// # Safety
/// The loaded GDT must hold an available TSS descriptor at `sel`.
#[cfg(target_arch = "x86")]
#[inline]
unsafe fn load_task_register(sel: SegmentSelector<TssSel>) {
    let sel = sel.encode();
    unsafe {
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) sel,
            options(nostack, preserves_flags)
        );
    }
}

/// Build and load the GDT, reload every segment register and load the
/// task register.
///
/// # Safety
/// Call once, with interrupts disabled, before the IDT is loaded.
#[cfg(target_arch = "x86")]
pub unsafe fn init_gdt_and_tss() {
    let tss = Desc32::tss(tss_base(), TSS_LIMIT);

    #[allow(static_mut_refs)]
    unsafe {
        GDT = Gdt::new_with_tss(tss);
        load_gdt(&raw const GDT);

        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            "mov ss, {0:x}",
            in(reg) u32::from(KERNEL_DS),
            options(nostack, preserves_flags)
        );

        // Far return to reload CS.
        core::arch::asm!(
            "push {cs}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            cs = in(reg) u32::from(KERNEL_CS),
            tmp = out(reg) _,
        );

        load_task_register(TSS_SYS_SEL);
    }
    log::debug!("GDT loaded, TSS at {:#010x}", tss_base());
}
