//! # 8254 Programmable Interval Timer
//!
//! Channel 0 runs as a rate generator and raises IRQ 0 at the configured
//! frequency.

use kernel_info::scheduler::PIT_BASE_FREQUENCY;

const PIT_CHANNEL_0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, low byte then high byte, mode 3 (square wave), binary.
const PIT_MODE_SQUARE_WAVE: u8 = 0x36;

/// Reload value for `frequency` Hz.
///
/// The counter is 16 bits wide. Frequencies below roughly 18.2 Hz need a
/// larger divisor than that and are clamped to the slowest rate the PIT
/// can produce.
#[must_use]
pub const fn divisor(frequency: u32) -> u16 {
    if frequency == 0 {
        return u16::MAX;
    }
    let d = PIT_BASE_FREQUENCY / frequency;
    if d > u16::MAX as u32 {
        u16::MAX
    } else if d == 0 {
        1
    } else {
        #[allow(clippy::cast_possible_truncation)]
        {
            d as u16
        }
    }
}

/// Program channel 0 to fire at `frequency` Hz.
///
/// # Safety
/// Ring 0, interrupts disabled.
#[cfg(target_arch = "x86")]
pub unsafe fn init(frequency: u32) {
    use crate::ports::outb;

    let d = divisor(frequency);
    if PIT_BASE_FREQUENCY / frequency.max(1) > u32::from(u16::MAX) {
        log::warn!(
            "timer: {frequency} Hz is below the PIT range, running at {} Hz",
            PIT_BASE_FREQUENCY / u32::from(d)
        );
    }
    let [lo, hi] = d.to_le_bytes();
    unsafe {
        outb(PIT_COMMAND, PIT_MODE_SQUARE_WAVE);
        outb(PIT_CHANNEL_0, lo);
        outb(PIT_CHANNEL_0, hi);
    }
    log::debug!("timer: PIT divisor {d}");
}
