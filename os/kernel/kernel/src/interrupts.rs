//! # i386 Interrupt Descriptor Table (IDT)
//!
//! Gates are declared with a fluent builder:
//!
//! ```ignore
//! idt[0x80]
//!     .set_handler(syscall_entry)
//!     .selector(KERNEL_CS_SEL)
//!     .dpl(Dpl::Ring3)     // reachable with `int 0x80` from ring 3
//!     .present(true)
//!     .gate_type(GateType::InterruptGate);
//! ```
//!
//! Only three vectors are populated: the page fault (14), the timer after
//! the PIC remap (32) and the system call (0x80). Every gate is an
//! interrupt gate, so handlers run with `IF` clear.

#[cfg(target_arch = "x86")]
pub mod entry;
pub mod page_fault;
pub mod syscall;
pub mod timer;

use crate::gdt::selectors::{CodeSel, SegmentSelector};
use crate::privilege::Dpl;
use bitfield_struct::bitfield;
use core::mem::size_of;
use core::ops::{Index, IndexMut};

const _: () = assert!(size_of::<IdtEntry>() == 8);
const _: () = assert!(size_of::<Idt>() == 256 * 8);

/// Attribute byte pair of a 32-bit gate (bits 32..47 of the entry).
#[bitfield(u16)]
pub struct IdtGateAttr {
    /// Must be zero.
    #[bits(8)]
    __zero0: u8,

    /// 0xE = 32-bit interrupt gate, 0xF = 32-bit trap gate.
    #[bits(4)]
    pub typ: u8,

    /// Must be `0` for interrupt and trap gates.
    #[bits(1)]
    pub s: bool,

    #[bits(2)]
    pub dpl: u8,

    #[bits(1)]
    pub present: bool,
}

impl IdtGateAttr {
    #[inline]
    #[must_use]
    pub const fn interrupt_gate() -> Self {
        Self::new().with_typ(0xE).with_s(false)
    }

    #[inline]
    #[must_use]
    pub const fn trap_gate() -> Self {
        Self::new().with_typ(0xF).with_s(false)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GateType {
    /// Clears `IF` on entry.
    InterruptGate,
    /// Leaves `IF` unchanged.
    TrapGate,
}

/// One 8-byte gate descriptor.
///
/// ```text
/// 63            48 47 46  45 44 43    40 39      32
/// +----------------+--+------+--+--------+---------+
/// | offset[31:16]  |P | DPL  |S |  type  |  zero   |
/// +----------------+--+------+--+--------+---------+
/// 31            16 15                             0
/// +----------------+-------------------------------+
/// |    selector    |          offset[15:0]         |
/// +----------------+-------------------------------+
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    attr: u16,
    offset_hi: u16,
}

impl IdtEntry {
    /// A zeroed, non-present entry.
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        attr: IdtGateAttr::new().into_bits(),
        offset_hi: 0,
    };

    /// Point this entry at `handler` and return a builder. The entry starts
    /// out non-present, ring 0, interrupt gate.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_handler(&mut self, handler: extern "C" fn()) -> IdtEntryBuilder<'_> {
        self.set_handler_addr(handler as usize as u32)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn set_handler_addr(&mut self, addr: u32) -> IdtEntryBuilder<'_> {
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_hi = (addr >> 16) as u16;
        self.attr = IdtGateAttr::interrupt_gate()
            .with_present(false)
            .with_dpl(0)
            .into_bits();
        IdtEntryBuilder { entry: self }
    }

    #[must_use]
    pub const fn handler_addr(&self) -> u32 {
        (self.offset_lo as u32) | ((self.offset_hi as u32) << 16)
    }

    #[must_use]
    pub const fn selector(&self) -> u16 {
        self.selector
    }

    #[must_use]
    pub const fn attr(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }
}

pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.attr).with_present(p);
        self.entry.attr = bf.into_bits();
        self
    }

    /// Lowest privilege allowed to raise this vector with `int n`.
    #[inline]
    pub const fn dpl(self, dpl: Dpl) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.attr).with_dpl(dpl.into_bits());
        self.entry.attr = bf.into_bits();
        self
    }

    #[inline]
    pub const fn kernel_only(self) -> Self {
        self.dpl(Dpl::Ring0)
    }

    #[inline]
    pub const fn gate_type(self, gate_type: GateType) -> Self {
        let bf = match gate_type {
            GateType::InterruptGate => IdtGateAttr::interrupt_gate(),
            GateType::TrapGate => IdtGateAttr::trap_gate(),
        };
        let old = IdtGateAttr::from_bits(self.entry.attr);
        self.entry.attr = bf
            .with_dpl(old.dpl())
            .with_present(old.present())
            .into_bits();
        self
    }

    #[inline]
    pub const fn selector(self, sel: SegmentSelector<CodeSel>) -> Self {
        self.entry.selector = sel.encode();
        self
    }
}

/// A 256-entry IDT.
#[repr(C, align(8))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Load this table into IDTR.
    ///
    /// # Safety
    /// Ring 0 only. Every present gate must point at a valid entry stub and
    /// the GDT and TSS must already be loaded.
    #[cfg(target_arch = "x86")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn load(&'static self) {
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self) as u32,
        };
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &raw const idtr, options(nostack, preserves_flags, readonly));
        }
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// Operand of `lidt`.
#[cfg(target_arch = "x86")]
#[repr(C, packed)]
struct Idtr {
    limit: u16,
    base: u32,
}
