//! # Typed segment selectors
//!
//! ```text
//!  15            3 2  1  0
//! +----------------+--+----+
//! |   Index[12:0]  |TI| RPL|
//! +----------------+--+----+  (TI=0 → GDT, TI=1 → LDT; RPL=0..3)
//! ```
//!
//! The marker types keep a data selector out of `CS` and a code selector out
//! of `ltr`. [`SegmentSelector::encode`] gives the raw value for interrupt
//! frames and inline asm.

use crate::privilege::Rpl;
use bitfield_struct::bitfield;
use core::marker::PhantomData;

/// Which descriptor table a selector addresses. Only the GDT is used.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Table {
    Gdt = 0,
    Ldt = 1,
}

impl Table {
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        if bits == 0 { Self::Gdt } else { Self::Ldt }
    }

    #[inline]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// Raw 16-bit selector encoding.
#[bitfield(u16)]
#[derive(Eq, PartialEq)]
pub struct SegmentSelectorRaw {
    #[bits(2)]
    rpl: Rpl,
    #[bits(1)]
    ti: Table,
    #[bits(13)]
    index: u16,
}

impl SegmentSelectorRaw {
    #[inline]
    pub const fn new_with(index: u16, table: Table, rpl: Rpl) -> Self {
        Self::new().with_index(index).with_ti(table).with_rpl(rpl)
    }
}

pub trait SelectorKind: Copy {}

/// Code segment (CS) selector.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum CodeSel {}

/// Data/stack (DS/ES/SS) selector.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum DataSel {}

/// TSS selector (for `ltr`).
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum TssSel {}

impl SelectorKind for CodeSel {}
impl SelectorKind for DataSel {}
impl SelectorKind for TssSel {}

#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct SegmentSelector<K: SelectorKind>(SegmentSelectorRaw, PhantomData<K>);

impl<K: SelectorKind> SegmentSelector<K> {
    #[inline]
    pub const fn raw(self) -> SegmentSelectorRaw {
        self.0
    }

    /// Encode as `u16` (for `iretd` frames, `mov ds, ax` and the like).
    #[inline]
    pub const fn encode(self) -> u16 {
        self.0.into_bits()
    }
}

impl SegmentSelector<CodeSel> {
    #[inline]
    pub const fn new(index: u16, rpl: Rpl) -> Self {
        Self(SegmentSelectorRaw::new_with(index, Table::Gdt, rpl), PhantomData)
    }
}

impl SegmentSelector<DataSel> {
    #[inline]
    pub const fn new(index: u16, rpl: Rpl) -> Self {
        Self(SegmentSelectorRaw::new_with(index, Table::Gdt, rpl), PhantomData)
    }
}

impl SegmentSelector<TssSel> {
    /// RPL is ignored by `ltr`.
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(
            SegmentSelectorRaw::new_with(index, Table::Gdt, Rpl::Ring0),
            PhantomData,
        )
    }
}
