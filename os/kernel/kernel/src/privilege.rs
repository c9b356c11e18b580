//! # Privilege Levels
//!
//! Only rings 0 (kernel) and 3 (user programs) are used. The same two-bit
//! value shows up in two places the CPU checks against each other:
//!
//! | Concept | Stored in | Purpose |
//! |---------|-----------|---------|
//! | [`Rpl`] | low 2 bits of a selector | requested privilege level |
//! | [`Dpl`] | bits 45–46 of a descriptor, bits 13–14 of a gate | who may use the descriptor |
//!
//! A gate with [`Dpl::Ring3`] can be raised by `int n` from user mode; the
//! system call gate is the only such gate.

/// Selector privilege bits.
pub const RPL_MASK: u16 = 0b11;

/// Requested Privilege Level, the low two bits of a segment selector.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Rpl {
    Ring0 = 0,
    Ring3 = 3,
}

impl Rpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u16 {
        self as u16
    }

    /// Decode from the low two bits. Rings 1 and 2 are unused and read as 0.
    #[inline]
    #[must_use]
    pub const fn from_bits(value: u16) -> Self {
        match value & RPL_MASK {
            3 => Self::Ring3,
            _ => Self::Ring0,
        }
    }

    /// Extract the RPL from an encoded selector.
    #[inline]
    #[must_use]
    pub const fn from_selector(selector: u16) -> Self {
        Self::from_bits(selector)
    }
}

/// Descriptor Privilege Level of a segment descriptor or gate.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Dpl {
    Ring0 = 0,
    Ring3 = 3,
}

impl Dpl {
    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            3 => Self::Ring3,
            _ => Self::Ring0,
        }
    }

    /// Data segment load check: `max(CPL, RPL) <= DPL`.
    #[inline]
    #[must_use]
    pub const fn permits_data_load(self, cpl: Rpl, rpl: Rpl) -> bool {
        let effective = if (cpl as u8) > (rpl as u8) { cpl } else { rpl };
        (effective as u8) <= (self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpl_is_taken_from_low_bits() {
        assert_eq!(Rpl::from_selector(0x1B), Rpl::Ring3);
        assert_eq!(Rpl::from_selector(0x10), Rpl::Ring0);
    }

    #[test]
    fn user_rpl_cannot_load_kernel_data() {
        assert!(!Dpl::Ring0.permits_data_load(Rpl::Ring0, Rpl::Ring3));
        assert!(Dpl::Ring3.permits_data_load(Rpl::Ring3, Rpl::Ring3));
        assert!(Dpl::Ring0.permits_data_load(Rpl::Ring0, Rpl::Ring0));
    }
}
