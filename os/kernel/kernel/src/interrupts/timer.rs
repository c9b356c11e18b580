use crate::gdt::KERNEL_CS_SEL;
#[cfg(target_arch = "x86")]
use crate::interrupts::entry::interrupt_common;
use crate::interrupts::{GateType, Idt};
use kernel_info::cpu::TIMER_VECTOR;

pub trait TimerInterrupt {
    fn init_timer_gate(&mut self, handler: extern "C" fn()) -> &mut Self;
}

impl TimerInterrupt for Idt {
    fn init_timer_gate(&mut self, handler: extern "C" fn()) -> &mut Self {
        self[usize::from(TIMER_VECTOR)]
            .set_handler(handler)
            .selector(KERNEL_CS_SEL)
            .present(true)
            .kernel_only()
            .gate_type(GateType::InterruptGate);

        debug_assert_eq!(self[usize::from(TIMER_VECTOR)].attr().into_bits() >> 8, 0x8E);
        self
    }
}

/// IRQ 0 entry: no error code from the CPU.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub extern "C" fn timer_entry() {
    core::arch::naked_asm!(
        "push 0",
        "push {vector}",
        "jmp {common}",
        vector = const TIMER_VECTOR,
        common = sym interrupt_common,
    )
}
