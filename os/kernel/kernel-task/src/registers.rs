//! # Trap frame
//!
//! Every interrupt and system call entry stub builds the same frame on the
//! current kernel stack before calling into Rust:
//!
//! ```text
//! high  ┌──────────────┐ ← esp0 (kernel stack top)
//!       │ ss           │ ┐ pushed by the CPU on a ring 3 → ring 0
//!       │ useresp      │ ┘ transition only
//!       │ eflags       │
//!       │ cs           │
//!       │ eip          │
//!       │ err_code     │ ← CPU or stub (0)
//!       │ int_no       │ ← stub
//!       │ eax … edi    │ ← pusha
//! low   │ ds           │ ← stub
//!       └──────────────┘ ← &Registers
//! ```
//!
//! Returning from the stub pops the frame in reverse and executes `iret`, so
//! a task is resumed (or started) by pointing `esp` at its frame.

use kernel_info::cpu::{
    EFLAGS_IF, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};

/// Length of the `int 0x80` instruction.
const INT80_LEN: u32 = 2;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Registers {
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pusha`; ignored by `popa`.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

const _: () = assert!(size_of::<Registers>() == 64);

impl Registers {
    /// A frame that enters ring 3 at `entry` with the stack at `stack`,
    /// interrupts enabled and every general purpose register cleared.
    #[must_use]
    pub const fn user(entry: u32, stack: u32) -> Self {
        Self {
            ds: USER_DATA_SELECTOR,
            eip: entry,
            cs: USER_CODE_SELECTOR,
            eflags: EFLAGS_IF,
            useresp: stack,
            ss: USER_DATA_SELECTOR,
            ..Self::zeroed()
        }
    }

    /// A ring 0 frame resuming at `entry` with interrupts enabled.
    ///
    /// `iret` to the same privilege level pops only `eip`, `cs` and
    /// `eflags`; `useresp` and `ss` stay unused on the stack.
    #[must_use]
    pub const fn kernel(entry: u32) -> Self {
        Self {
            ds: KERNEL_DATA_SELECTOR,
            cs: KERNEL_CODE_SELECTOR,
            eflags: EFLAGS_IF,
            eip: entry,
            ..Self::zeroed()
        }
    }

    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: 0,
            err_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }

    /// `true` if the frame was pushed while running in ring 3.
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Wind `eip` back onto the `int 0x80` that trapped, so the same system
    /// call is issued again when the task next runs.
    pub const fn restart_syscall(&mut self) {
        self.eip = self.eip.wrapping_sub(INT80_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_frames_use_ring3_selectors() {
        let r = Registers::user(0, 0xBFFF_FFFC);
        assert_eq!(r.cs, 0x1B);
        assert_eq!(r.ss, 0x23);
        assert_eq!(r.ds, 0x23);
        assert_eq!(r.eflags, 1 << 9);
        assert_eq!(r.useresp, 0xBFFF_FFFC);
        assert!(r.from_user());
    }

    #[test]
    fn kernel_frames_stay_in_ring0() {
        let r = Registers::kernel(0xC010_0000);
        assert_eq!(r.cs, 0x08);
        assert_eq!(r.eip, 0xC010_0000);
        assert!(!r.from_user());
    }

    #[test]
    fn restart_rewinds_over_int80() {
        let mut r = Registers {
            eip: 0x1002,
            ..Registers::zeroed()
        };
        r.restart_syscall();
        assert_eq!(r.eip, 0x1000);
    }
}
