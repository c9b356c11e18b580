//! # DMA frame bitmap
//!
//! Device DMA needs physically contiguous runs, which the free stack cannot
//! find. A fixed window of [`DMA_WINDOW_FRAMES`] frames directly after the
//! kernel image is tracked by a bitmap instead: bit set means the frame is
//! taken (or was never usable), bit clear means it is free.

use crate::info::{DMA_BOUNDARY, DMA_WINDOW_FRAMES, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

const WORDS: usize = DMA_WINDOW_FRAMES / 32;

/// Frames per [`DMA_BOUNDARY`] segment.
const FRAMES_PER_SEGMENT: usize = (DMA_BOUNDARY / PAGE_SIZE) as usize;

#[derive(Debug)]
pub struct DmaBitmap {
    start: PhysicalPage<Size4K>,
    bits: [u32; WORDS],
}

impl DmaBitmap {
    /// A bitmap for the window beginning at `start` with every frame taken.
    /// Usable frames are handed in through [`release`](Self::release).
    #[must_use]
    pub const fn new(start: PhysicalPage<Size4K>) -> Self {
        Self {
            start,
            bits: [u32::MAX; WORDS],
        }
    }

    /// First frame of the window.
    #[must_use]
    pub const fn start(&self) -> PhysicalPage<Size4K> {
        self.start
    }

    /// First physical address past the window.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.start.base().as_u32() + DMA_WINDOW_FRAMES as u32 * PAGE_SIZE)
    }

    /// `true` if `pa` lies inside the window.
    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.as_u32() >= self.start.base().as_u32() && pa.as_u32() < self.end().as_u32()
    }

    /// Number of free frames.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.bits.iter().map(|w| w.count_zeros() as usize).sum()
    }

    fn index_of(&self, frame: PhysicalPage<Size4K>) -> usize {
        assert!(
            self.contains(frame.base()),
            "frame {frame} outside the DMA window"
        );
        (frame.frame_number() - self.start.frame_number()) as usize
    }

    const fn is_taken(&self, index: usize) -> bool {
        self.bits[index / 32] & (1 << (index % 32)) != 0
    }

    const fn set(&mut self, index: usize, taken: bool) {
        if taken {
            self.bits[index / 32] |= 1 << (index % 32);
        } else {
            self.bits[index / 32] &= !(1 << (index % 32));
        }
    }

    /// Mark `frame` free.
    ///
    /// # Panics
    /// If `frame` lies outside the window.
    pub fn release(&mut self, frame: PhysicalPage<Size4K>) {
        let index = self.index_of(frame);
        self.set(index, false);
    }

    /// Take the first run of `count` free frames.
    ///
    /// Runs of up to one [`DMA_BOUNDARY`] segment never straddle a segment
    /// boundary. Returns `None` if `count` is zero or no run fits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc(&mut self, count: usize) -> Option<PhysicalPage<Size4K>> {
        if count == 0 || count > DMA_WINDOW_FRAMES {
            return None;
        }

        let base = self.start.frame_number() as usize;
        let first = (0..=DMA_WINDOW_FRAMES - count)
            .filter(|&i| {
                count > FRAMES_PER_SEGMENT
                    || (base + i) / FRAMES_PER_SEGMENT
                        == (base + i + count - 1) / FRAMES_PER_SEGMENT
            })
            .find(|&i| (i..i + count).all(|j| !self.is_taken(j)))?;

        for j in first..first + count {
            self.set(j, true);
        }
        self.start.checked_add(first as u32)
    }

    /// Mark the run starting at `first` free again.
    ///
    /// # Panics
    /// If any frame of the run lies outside the window.
    pub fn free(&mut self, first: PhysicalPage<Size4K>, count: usize) {
        let index = self.index_of(first);
        assert!(
            index + count <= DMA_WINDOW_FRAMES,
            "DMA run at {first} overruns the window"
        );
        for j in index..index + count {
            self.set(j, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A window starting at 1 MiB with all frames free.
    fn all_free() -> DmaBitmap {
        let mut bitmap = DmaBitmap::new(PhysicalPage::from_number(0x100));
        for n in 0..DMA_WINDOW_FRAMES as u32 {
            bitmap.release(PhysicalPage::from_number(0x100 + n));
        }
        bitmap
    }

    #[test]
    fn starts_fully_taken() {
        let mut bitmap = DmaBitmap::new(PhysicalPage::from_number(0x100));
        assert_eq!(bitmap.free_frames(), 0);
        assert_eq!(bitmap.alloc(1), None);
    }

    #[test]
    fn allocates_contiguous_first_fit_runs() {
        let mut bitmap = all_free();
        let a = bitmap.alloc(3).unwrap();
        let b = bitmap.alloc(2).unwrap();
        assert_eq!(a.frame_number(), 0x100);
        assert_eq!(b.frame_number(), 0x103);
        assert_eq!(bitmap.free_frames(), DMA_WINDOW_FRAMES - 5);

        bitmap.free(a, 3);
        assert_eq!(bitmap.alloc(2).unwrap().frame_number(), 0x100);
        assert_eq!(bitmap.alloc(2).unwrap().frame_number(), 0x105);
    }

    #[test]
    fn runs_do_not_cross_a_64k_boundary() {
        let mut bitmap = all_free();
        // Leave 2 frames before the first boundary at frame 0x110.
        bitmap.alloc(14).unwrap();
        let run = bitmap.alloc(4).unwrap();
        assert_eq!(run.frame_number(), 0x110);
        assert_eq!(bitmap.alloc(2).unwrap().frame_number(), 0x10E);
    }

    #[test]
    fn reports_the_window() {
        let bitmap = DmaBitmap::new(PhysicalPage::from_number(0x100));
        assert!(bitmap.contains(PhysicalAddress::new(0x10_0000)));
        assert!(bitmap.contains(PhysicalAddress::new(0x1F_FFFF)));
        assert!(!bitmap.contains(PhysicalAddress::new(0x20_0000)));
        assert!(!bitmap.contains(PhysicalAddress::new(0xF_F000)));
    }

    #[test]
    #[should_panic(expected = "outside the DMA window")]
    fn releasing_foreign_frames_panics() {
        let mut bitmap = DmaBitmap::new(PhysicalPage::from_number(0x100));
        bitmap.release(PhysicalPage::from_number(0x80));
    }
}
