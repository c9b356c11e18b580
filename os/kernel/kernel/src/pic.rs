//! # 8259 PIC pair
//!
//! At reset the PICs deliver IRQ 0..15 on vectors 8..23, which collide with
//! CPU exceptions. [`ChainedPics::init`] remaps them to 32..47 and masks
//! every line except the ones the kernel serves.

use kernel_sync::SpinLock;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

/// ICW1: edge triggered, cascaded, ICW4 follows.
const ICW1_INIT: u8 = 0x11;
/// ICW4: 8086 mode.
const ICW4_8086: u8 = 0x01;
const PIC_EOI: u8 = 0x20;

/// First vector of the master PIC.
pub const PIC1_OFFSET: u8 = 32;
/// First vector of the slave PIC.
pub const PIC2_OFFSET: u8 = 40;

/// IRQ line of the PIT.
pub const TIMER_IRQ: u8 = 0;

/// IRQ line the slave is cascaded on.
const CASCADE_IRQ: u8 = 2;

struct Pic {
    offset: u8,
    command: u16,
    data: u16,
}

pub struct ChainedPics {
    pics: [Pic; 2],
    /// Interrupt mask of both PICs, master in the low byte. A set bit masks
    /// the line.
    mask: u16,
}

impl ChainedPics {
    pub const fn new(offset1: u8, offset2: u8) -> Self {
        Self {
            pics: [
                Pic {
                    offset: offset1,
                    command: PIC1_CMD,
                    data: PIC1_DATA,
                },
                Pic {
                    offset: offset2,
                    command: PIC2_CMD,
                    data: PIC2_DATA,
                },
            ],
            mask: 0xFFFF & !(1 << CASCADE_IRQ),
        }
    }

    /// `true` if `vector` belongs to one of the two PICs.
    pub const fn handles(&self, vector: u8) -> bool {
        vector >= self.pics[0].offset && vector < self.pics[1].offset + 8
    }

    /// Mask value after enabling `irq`.
    const fn mask_with(&self, irq: u8) -> u16 {
        self.mask & !(1 << irq)
    }

    /// Remap both PICs and apply the current mask.
    ///
    /// # Safety
    /// Ring 0, interrupts disabled.
    #[cfg(target_arch = "x86")]
    pub unsafe fn init(&mut self) {
        use crate::ports::{io_wait, outb};

        unsafe {
            for pic in &self.pics {
                outb(pic.command, ICW1_INIT);
                io_wait();
            }
            for pic in &self.pics {
                outb(pic.data, pic.offset);
                io_wait();
            }
            // Master: slave on IRQ 2. Slave: cascade identity 2.
            outb(self.pics[0].data, 1 << CASCADE_IRQ);
            io_wait();
            outb(self.pics[1].data, CASCADE_IRQ);
            io_wait();
            for pic in &self.pics {
                outb(pic.data, ICW4_8086);
                io_wait();
            }
            self.write_mask();
        }
        log::debug!(
            "PIC remapped to {}/{}, mask {:#06x}",
            self.pics[0].offset,
            self.pics[1].offset,
            self.mask
        );
    }

    /// Unmask `irq` (0..15).
    ///
    /// # Safety
    /// Ring 0. A handler for the line's vector must be installed.
    #[cfg(target_arch = "x86")]
    pub unsafe fn unmask(&mut self, irq: u8) {
        self.mask = self.mask_with(irq);
        unsafe { self.write_mask() };
    }

    #[cfg(target_arch = "x86")]
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn write_mask(&self) {
        unsafe {
            crate::ports::outb(self.pics[0].data, self.mask as u8);
            crate::ports::outb(self.pics[1].data, (self.mask >> 8) as u8);
        }
    }

    /// Acknowledge `vector`. IRQs of the slave must be acknowledged on both.
    ///
    /// # Safety
    /// Ring 0, from the handler of `vector`.
    #[cfg(target_arch = "x86")]
    pub unsafe fn notify_end_of_interrupt(&self, vector: u8) {
        if !self.handles(vector) {
            return;
        }
        unsafe {
            if vector >= self.pics[1].offset {
                crate::ports::outb(self.pics[1].command, PIC_EOI);
            }
            crate::ports::outb(self.pics[0].command, PIC_EOI);
        }
    }
}

pub static PICS: SpinLock<ChainedPics> = SpinLock::new(ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remapped_range_covers_both_pics() {
        let pics = ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET);
        assert!(!pics.handles(14));
        assert!(pics.handles(32));
        assert!(pics.handles(47));
        assert!(!pics.handles(48));
        assert!(!pics.handles(0x80));
    }

    #[test]
    fn unmasking_the_timer_leaves_the_cascade_open() {
        let pics = ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET);
        let mask = pics.mask_with(TIMER_IRQ);
        assert_eq!(mask & 1, 0);
        assert_eq!(mask & (1 << CASCADE_IRQ), 0);
        assert_eq!(mask & 0xFF00, 0xFF00);
    }
}
