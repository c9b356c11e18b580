//! # x86 I/O Port Access
//!
//! Thin wrappers around `in`/`out` for the legacy devices the kernel drives
//! through port space:
//!
//! ```text
//! 0x0020-0x0021   PIC #1 (master)
//! 0x0040-0x0043   PIT
//! 0x00A0-0x00A1   PIC #2 (slave)
//! ```
//!
//! The QEMU debug console (`0x402`) is written by `kernel-qemu` directly.

/// Write one byte to an I/O port.
///
/// # Safety
/// - Ring 0 (the kernel never grants IOPL to tasks).
/// - `port` must be a register of the intended device, written in the
///   order its protocol expects. Callers serialize access per device.
#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Read one byte from an I/O port.
///
/// # Safety
/// Same requirements as [`outb`].
#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let mut v: u8;
    unsafe {
        core::arch::asm!("in al, dx", in("dx") port, out("al") v, options(nomem, nostack, preserves_flags));
    }
    v
}

/// Give the PIC time to settle between initialization words. Port 0x80 is
/// the POST diagnostic port; writing it has no effect besides the delay.
///
/// # Safety
/// Ring 0.
#[cfg(target_arch = "x86")]
#[inline]
pub unsafe fn io_wait() {
    unsafe { outb(0x80, 0) };
}
