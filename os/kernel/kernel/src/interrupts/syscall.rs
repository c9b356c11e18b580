//! `int 0x80` gate.
//!
//! Arguments travel in `eax` (number), `ebx`, `ecx` and `edx`; the result
//! comes back in `eax`. The frame layout is shared with the timer, so a
//! system call that blocks or exits simply resumes another task.

use crate::gdt::KERNEL_CS_SEL;
#[cfg(target_arch = "x86")]
use crate::interrupts::entry::interrupt_common;
use crate::interrupts::{GateType, Idt};
use crate::privilege::Dpl;
use kernel_info::cpu::SYSCALL_VECTOR;

pub trait SyscallInterrupt {
    /// Install the system call gate, callable from ring 3.
    fn init_syscall_gate(&mut self, handler: extern "C" fn()) -> &mut Self;
}

impl SyscallInterrupt for Idt {
    fn init_syscall_gate(&mut self, handler: extern "C" fn()) -> &mut Self {
        self[usize::from(SYSCALL_VECTOR)]
            .set_handler(handler)
            .selector(KERNEL_CS_SEL)
            .dpl(Dpl::Ring3)
            .present(true)
            .gate_type(GateType::InterruptGate);
        self
    }
}

#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "push 0",
        "push {vector}",
        "jmp {common}",
        vector = const SYSCALL_VECTOR,
        common = sym interrupt_common,
    )
}
