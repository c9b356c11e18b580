use crate::gdt::KERNEL_CS_SEL;
use crate::interrupts::{GateType, Idt};
use bitfield_struct::bitfield;
use kernel_info::cpu::PAGE_FAULT_VECTOR;

pub trait PageFaultInterrupt {
    fn init_page_fault_gate(&mut self, handler: extern "C" fn()) -> &mut Self;
}

impl PageFaultInterrupt for Idt {
    fn init_page_fault_gate(&mut self, handler: extern "C" fn()) -> &mut Self {
        self[usize::from(PAGE_FAULT_VECTOR)]
            .set_handler(handler)
            .selector(KERNEL_CS_SEL)
            .present(true)
            .kernel_only()
            .gate_type(GateType::InterruptGate);
        self
    }
}

/// Page faults are fatal: log the faulting address and cause, then halt.
///
/// Stays on whatever stack the CPU delivered the fault on.
#[cfg(target_arch = "x86")]
#[unsafe(naked)]
pub extern "C" fn page_fault_entry() {
    core::arch::naked_asm!(
        "cli",
        "pusha",
        // After pusha: [esp + 32] = error code, [esp + 36] = eip.
        "push dword ptr [esp + 36]",
        "push dword ptr [esp + 36]",
        "call {log_pf}",
        "2:",
        "hlt",
        "jmp 2b",
        log_pf = sym log_page_fault,
    )
}

#[cfg(target_arch = "x86")]
extern "C" fn log_page_fault(err: PageFaultError, eip: u32) -> ! {
    use kernel_registers::LoadRegisterUnsafe;
    use kernel_registers::cr2::Cr2;
    use log::error;

    // SAFETY: ring 0, inside the fault handler.
    let cr2 = unsafe { Cr2::load_unsafe() };
    let task = crate::tasking::try_current_pid();

    error!(
        "PAGE FAULT at {} (eip {eip:#010x}, err {:#x}, task {}): {}",
        cr2.fault_address(),
        err.into_bits(),
        task.map_or(-1, |pid| i64::from(pid.0)),
        err.explain()
    );
    error!("{err:?}");

    crate::halt()
}

/// Page-fault error code (Intel SDM Vol. 3A, §4.7).
#[bitfield(u32)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 0 = read, 1 = write.
    pub write: bool,
    /// 1 = the access came from ring 3.
    pub user: bool,
    /// 1 = a reserved bit was set in a paging structure.
    pub reserved_bit: bool,
    /// 1 = instruction fetch (only with NX paging, never on plain i386).
    pub instruction_fetch: bool,
    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    pub const fn explain(&self) -> &'static str {
        match (self.present(), self.write(), self.user()) {
            (false, false, false) => "kernel read of a non-present page",
            (false, true, false) => "kernel write to a non-present page",
            (false, false, true) => "user read of a non-present page",
            (false, true, true) => "user write to a non-present page",
            (true, false, true) => "user read of a supervisor page",
            (true, true, true) => "user write to a protected page",
            (true, true, false) => "kernel write to a read-only page",
            (true, false, false) => "kernel read protection violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_write_to_missing_page() {
        let err = PageFaultError::from_bits(0b110);
        assert!(!err.present());
        assert!(err.write());
        assert!(err.user());
        assert_eq!(err.explain(), "user write to a non-present page");
    }

    #[test]
    fn decodes_protection_violation() {
        let err = PageFaultError::from_bits(0b101);
        assert!(err.present());
        assert!(!err.write());
        assert_eq!(err.explain(), "user read of a supervisor page");
    }
}
