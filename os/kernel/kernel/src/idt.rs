//! # The kernel's IDT
//!
//! One table for the single CPU, built once at boot after the GDT and TSS
//! are loaded and before interrupts are enabled:
//!
//! 1. [`crate::gdt::init_gdt_and_tss`] (`lgdt`, segment reload, `ltr`)
//! 2. [`init_idt_once`] (`lidt`)
//! 3. PIC remap and unmask, then the first `iretd` into a task sets `IF`.

use crate::interrupts::Idt;
use crate::interrupts::page_fault::{PageFaultInterrupt, page_fault_entry};
use crate::interrupts::syscall::{SyscallInterrupt, syscall_entry};
use crate::interrupts::timer::{TimerInterrupt, timer_entry};
use core::mem::MaybeUninit;

static mut IDT: MaybeUninit<Idt> = MaybeUninit::uninit();

/// Populate the page fault, timer and system call gates and load the table.
///
/// # Safety
/// Call exactly once, with interrupts disabled, after the GDT is loaded.
pub unsafe fn init_idt_once() {
    #[allow(static_mut_refs)]
    unsafe {
        let idt = IDT.write(Idt::new());
        idt.init_page_fault_gate(page_fault_entry)
            .init_timer_gate(timer_entry)
            .init_syscall_gate(syscall_entry);
        IDT.assume_init_ref().load();
    }
    log::debug!("IDT loaded");
}
