//! # CPU Constants
//!
//! Selector values follow the GDT laid out by the descriptor-table
//! collaborator: null, kernel code, kernel data, user code, user data, TSS.

/// Ring 0 code segment selector.
pub const KERNEL_CODE_SELECTOR: u32 = 0x08;

/// Ring 0 data segment selector.
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;

/// Ring 3 code segment selector (`0x18 | RPL 3`).
pub const USER_CODE_SELECTOR: u32 = 0x18 | 3;

/// Ring 3 data and stack segment selector (`0x20 | RPL 3`).
pub const USER_DATA_SELECTOR: u32 = 0x20 | 3;

/// Task state segment selector.
pub const TSS_SELECTOR: u32 = 0x28;

/// EFLAGS interrupt-enable flag.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Page fault exception vector.
pub const PAGE_FAULT_VECTOR: u8 = 14;

/// IRQ 0 (PIT) after the PIC remap.
pub const TIMER_VECTOR: u8 = 32;

/// Software interrupt used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;
