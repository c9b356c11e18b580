//! # i386 paging structures
//!
//! - [`pd`]: the page directory (top level) and its entries.
//! - [`pt`]: page tables (leaf level) and their entries.
//!
//! Both are exactly one 4 KiB-aligned frame of 1024 four-byte entries.

pub mod pd;
pub mod pt;

pub use pd::{PageDirectory, PdEntry};
pub use pt::{PageTable, PtEntry};
