//! # 32-bit GDT descriptor encodings
//!
//! Every code and data segment is flat: base 0, limit `0xFFFFF` in 4 KiB
//! units, 32-bit default operand size. Paging does the actual protection;
//! the descriptors only separate code from data and ring 0 from ring 3.
//!
//! The TSS descriptor is a system descriptor (`S = 0`) of type 0x9
//! (available 32-bit TSS) with byte granularity.

use crate::privilege::Dpl;
use bitfield_struct::bitfield;

const FLAT_LIMIT: u32 = 0xF_FFFF;

/// Type nibble: execute + read.
const TYPE_CODE_READ: u8 = 0b1010;

/// Type nibble: read + write.
const TYPE_DATA_WRITE: u8 = 0b0010;

/// Type nibble: available 32-bit TSS.
const TYPE_TSS_AVAILABLE: u8 = 0x9;

/// Bit layout shared by code, data and TSS descriptors in protected mode.
#[bitfield(u64)]
pub struct SegmentDescBits {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool,       // [44] 1 = code/data, 0 = system
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53] always 0 here
    pub db: bool,      // [54] 1 = 32-bit segment
    pub g: bool,       // [55] 1 = limit in 4 KiB units
    pub base_hi: u8,   // [63:56]
}

impl SegmentDescBits {
    #[allow(clippy::cast_possible_truncation)]
    const fn with_base_and_limit(self, base: u32, limit: u32) -> Self {
        self.with_limit_lo((limit & 0xFFFF) as u16)
            .with_limit_hi(((limit >> 16) & 0xF) as u8)
            .with_base_lo((base & 0xFFFF) as u16)
            .with_base_mid(((base >> 16) & 0xFF) as u8)
            .with_base_hi((base >> 24) as u8)
    }

    /// Combined 20-bit limit.
    pub const fn limit(self) -> u32 {
        (self.limit_lo() as u32) | ((self.limit_hi() as u32) << 16)
    }

    pub const fn base(self) -> u32 {
        (self.base_lo() as u32) | ((self.base_mid() as u32) << 16) | ((self.base_hi() as u32) << 24)
    }
}

/// A single 8-byte GDT entry.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct Desc32(SegmentDescBits);

impl Desc32 {
    pub const fn null() -> Self {
        Self(SegmentDescBits::new())
    }

    const fn flat(typ: u8, dpl: Dpl) -> Self {
        Self(
            SegmentDescBits::new()
                .with_base_and_limit(0, FLAT_LIMIT)
                .with_typ(typ)
                .with_s(true)
                .with_dpl(dpl.into_bits())
                .with_p(true)
                .with_db(true)
                .with_g(true),
        )
    }

    /// Flat 4 GiB execute/read code segment.
    pub const fn code(dpl: Dpl) -> Self {
        Self::flat(TYPE_CODE_READ, dpl)
    }

    /// Flat 4 GiB read/write data segment.
    pub const fn data(dpl: Dpl) -> Self {
        Self::flat(TYPE_DATA_WRITE, dpl)
    }

    /// Available 32-bit TSS at `base` spanning `limit + 1` bytes.
    pub const fn tss(base: u32, limit: u32) -> Self {
        Self(
            SegmentDescBits::new()
                .with_base_and_limit(base, limit)
                .with_typ(TYPE_TSS_AVAILABLE)
                .with_s(false)
                .with_dpl(Dpl::Ring0.into_bits())
                .with_p(true),
        )
    }

    #[inline]
    pub const fn bits(self) -> SegmentDescBits {
        self.0
    }

    #[inline]
    pub const fn to_u64(self) -> u64 {
        self.0.into_bits()
    }
}

const _: () = assert!(size_of::<Desc32>() == 8);
