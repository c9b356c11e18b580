use kernel_memory_addresses::VirtualAddress;

/// CR2 — linear address of the most recent page fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Cr2(pub VirtualAddress);

impl Cr2 {
    #[must_use]
    pub const fn fault_address(self) -> VirtualAddress {
        self.0
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr2 {
    unsafe fn load_unsafe() -> Self {
        let mut cr2: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self(VirtualAddress::new(cr2))
    }
}
