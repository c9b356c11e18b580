use bitfield_struct::bitfield;

/// CR0 — system control flags.
///
/// The kernel only ever flips [`pg_paging`](Self::pg_paging) and
/// [`wp_write_protect`](Self::wp_write_protect) during early boot.
#[bitfield(u32)]
pub struct Cr0 {
    /// Bit 0 — PE: protected mode enable.
    pub pe_protection_enable: bool,

    /// Bit 1 — MP: monitor coprocessor.
    pub mp_monitor_coprocessor: bool,

    /// Bit 2 — EM: x87 emulation.
    pub em_emulation: bool,

    /// Bit 3 — TS: task switched.
    pub ts_task_switched: bool,

    /// Bit 4 — ET: extension type (hard-wired to 1 on modern CPUs).
    pub et_extension_type: bool,

    /// Bit 5 — NE: native x87 error reporting.
    pub ne_numeric_error: bool,

    #[bits(10, default = 0)]
    _reserved_6_15: u16,

    /// Bit 16 — WP: supervisor writes honour read-only pages.
    pub wp_write_protect: bool,

    #[bits(default = false)]
    _reserved_17: bool,

    /// Bit 18 — AM: alignment mask.
    pub am_alignment_mask: bool,

    #[bits(10, default = 0)]
    _reserved_19_28: u16,

    /// Bit 29 — NW: not write-through.
    pub nw_not_write_through: bool,

    /// Bit 30 — CD: cache disable.
    pub cd_cache_disable: bool,

    /// Bit 31 — PG: paging enable. Requires a valid CR3.
    pub pg_paging: bool,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let mut cr0: u32;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        let cr0 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_bit_is_bit_31() {
        let cr0 = Cr0::new().with_pg_paging(true).with_pe_protection_enable(true);
        assert_eq!(cr0.into_bits(), 0x8000_0001);
    }
}
