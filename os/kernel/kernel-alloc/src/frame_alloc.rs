//! # Physical frame allocator
//!
//! Two pools, both seeded once at boot from the firmware memory map:
//!
//! - **General** frames above the DMA window live on a [`FreeFrameStack`].
//!   Allocation and release are O(1).
//! - **DMA** frames in the fixed window right after the kernel image are
//!   tracked by a [`DmaBitmap`] so contiguous runs can be found.
//!
//! ```text
//! 0 ─── PHYS_LOAD ─── kernel_end ──────────── +1 MiB ─────────────── 4 GiB
//!        kernel image │ DMA window (bitmap)    │ general (free stack)
//! ```
//!
//! Nothing below the end of the kernel image is ever handed out.

use crate::dma_bitmap::DmaBitmap;
use crate::frame_stack::FreeFrameStack;
use crate::info::{DMA_WINDOW_FRAMES, PAGE_SIZE};
use kernel_info::boot::{MemoryMap, MemoryRegion};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, align_up};
use kernel_vmem::{DmaFrameAlloc, FrameAlloc, PhysMapper};
use log::{debug, info, trace};

/// Highest frame the general pool may contain (exclusive).
const PHYS_LIMIT: u64 = 0xFFFF_F000;

/// Why the frame allocator could not be seeded.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SeedError {
    #[error("the boot loader provided no memory map")]
    NoMemoryMap,
    #[error("the memory map contains no usable frames")]
    NoUsableMemory,
}

/// Frames released into each pool by [`FrameAllocator::seed`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SeedStats {
    pub general: usize,
    pub dma: usize,
}

impl SeedStats {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.general + self.dma
    }
}

/// The kernel's frame allocator.
///
/// `M` grants access to free frames, whose first word links the free stack.
pub struct FrameAllocator<M> {
    mapper: M,
    stack: FreeFrameStack,
    dma: DmaBitmap,
}

impl<M: PhysMapper> FrameAllocator<M> {
    /// An empty allocator whose DMA window starts at the first page boundary
    /// at or after `kernel_end`.
    ///
    /// # Panics
    /// If the DMA window would not fit below 4 GiB.
    #[must_use]
    pub fn new(mapper: M, kernel_end: PhysicalAddress) -> Self {
        let Some(start) = align_up(kernel_end.as_u32(), PAGE_SIZE) else {
            panic!("kernel image ends at {kernel_end}, no room for the DMA window");
        };
        Self {
            mapper,
            stack: FreeFrameStack::new(),
            dma: DmaBitmap::new(PhysicalAddress::new(start).page()),
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Frames currently on the general free stack.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.stack.len()
    }

    /// Frames currently free in the DMA window.
    #[must_use]
    pub fn free_dma_frames(&self) -> usize {
        self.dma.free_frames()
    }

    /// `true` if `pa` lies inside the DMA window.
    #[must_use]
    pub const fn is_dma(&self, pa: PhysicalAddress) -> bool {
        self.dma.contains(pa)
    }

    /// Release every usable frame of the memory map into the pools.
    ///
    /// A frame is usable if it lies inside an available region, overlaps no
    /// other region, and starts at or after the DMA window. Frames of the
    /// window go to the bitmap, all others onto the stack.
    ///
    /// # Errors
    /// - [`SeedError::NoMemoryMap`] if `map` is `None`.
    /// - [`SeedError::NoUsableMemory`] if no frame was released.
    pub fn seed(&mut self, map: Option<MemoryMap<'_>>) -> Result<SeedStats, SeedError> {
        let map = map.ok_or(SeedError::NoMemoryMap)?;
        let floor = u64::from(self.dma.start().base().as_u32());
        let mut stats = SeedStats::default();

        for (index, region) in map.clone().enumerate() {
            trace!(
                "memory map: {:#010X}..{:#010X} {:?}",
                region.base,
                region.end(),
                region.kind
            );
            if !region.is_available() {
                continue;
            }

            let first = region.base.max(floor).next_multiple_of(u64::from(PAGE_SIZE));
            let last = region.end().min(PHYS_LIMIT);
            let mut at = first;
            while at + u64::from(PAGE_SIZE) <= last {
                if Self::frame_is_usable(map.clone(), index, at) {
                    #[allow(clippy::cast_possible_truncation)]
                    let frame = PhysicalAddress::new(at as u32).page();
                    if self.dma.contains(frame.base()) {
                        self.dma.release(frame);
                        stats.dma += 1;
                    } else {
                        self.stack.push(&self.mapper, frame);
                        stats.general += 1;
                    }
                }
                at += u64::from(PAGE_SIZE);
            }
        }

        if stats.total() == 0 {
            return Err(SeedError::NoUsableMemory);
        }
        info!(
            "frame allocator: {} general and {} of {} DMA frames free",
            stats.general, stats.dma, DMA_WINDOW_FRAMES
        );
        Ok(stats)
    }

    /// The frame at `at` is not covered by a reserved region nor by an
    /// earlier available region (which already released it).
    fn frame_is_usable(map: MemoryMap<'_>, owner: usize, at: u64) -> bool {
        let end = at + u64::from(PAGE_SIZE);
        let overlaps = |r: &MemoryRegion| r.base < end && r.end() > at;
        map.enumerate().all(|(i, r)| {
            if !overlaps(&r) {
                return true;
            }
            r.is_available() && i >= owner
        })
    }
}

impl<M: PhysMapper> FrameAlloc for FrameAllocator<M> {
    fn alloc_frame(&mut self) -> Option<PhysicalPage<Size4K>> {
        let frame = self.stack.pop(&self.mapper);
        match frame {
            Some(frame) => trace!("alloc_frame -> {frame}"),
            None => debug!("alloc_frame: no free frames left"),
        }
        frame
    }

    fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        trace!("free_frame {frame}");
        self.stack.push(&self.mapper, frame);
    }
}

impl<M: PhysMapper> DmaFrameAlloc for FrameAllocator<M> {
    fn alloc_dma(&mut self, count: usize) -> Option<PhysicalPage<Size4K>> {
        let first = self.dma.alloc(count);
        debug!("alloc_dma({count}) -> {first:?}");
        first
    }

    fn free_dma(&mut self, first: PhysicalPage<Size4K>, count: usize) {
        debug!("free_dma({first}, {count})");
        self.dma.free(first, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::testing::TestPhys;
    use std::collections::HashSet;

    /// 2 MiB of simulated RAM; the kernel image ends at 0x10_0800.
    fn allocator() -> FrameAllocator<TestPhys> {
        // The DMA window covers 0x10_1000..0x20_1000, the general pool the
        // remaining frames up to 0x40_0000.
        FrameAllocator::new(TestPhys::with_frames(1024), PhysicalAddress::new(0x10_0800))
    }

    fn entry(base: u64, length: u64, kind: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&20u32.to_le_bytes());
        v.extend_from_slice(&base.to_le_bytes());
        v.extend_from_slice(&length.to_le_bytes());
        v.extend_from_slice(&kind.to_le_bytes());
        v
    }

    fn standard_map() -> Vec<u8> {
        let mut raw = entry(0, 0x9_FC00, 1);
        raw.extend(entry(0xF_0000, 0x1_0000, 2));
        raw.extend(entry(0x10_0000, 0x30_0000, 1));
        raw
    }

    #[test]
    fn seeds_both_pools_above_the_kernel() {
        let mut frames = allocator();
        let raw = standard_map();
        let stats = frames.seed(Some(MemoryMap::new(&raw))).unwrap();

        assert_eq!(stats.dma, DMA_WINDOW_FRAMES);
        assert_eq!(stats.general, (0x40_0000 - 0x20_1000) / 4096);
        assert_eq!(frames.free_frames(), stats.general);
        assert_eq!(frames.free_dma_frames(), DMA_WINDOW_FRAMES);
    }

    #[test]
    fn reserved_overlaps_are_skipped() {
        let mut frames = allocator();
        let mut raw = standard_map();
        raw.extend(entry(0x30_0800, 0x100, 2));
        let stats = frames.seed(Some(MemoryMap::new(&raw))).unwrap();
        assert_eq!(stats.general, (0x40_0000 - 0x20_1000) / 4096 - 1);

        let mut seen = HashSet::new();
        while let Some(frame) = frames.alloc_frame() {
            assert_ne!(frame.base().as_u32(), 0x30_0000);
            assert!(seen.insert(frame));
        }
    }

    #[test]
    fn overlapping_available_regions_release_frames_once() {
        let mut frames = allocator();
        let mut raw = standard_map();
        raw.extend(entry(0x30_0000, 0x2000, 1));
        let stats = frames.seed(Some(MemoryMap::new(&raw))).unwrap();
        assert_eq!(stats.general, (0x40_0000 - 0x20_1000) / 4096);
    }

    #[test]
    fn missing_or_empty_maps_are_errors() {
        let mut frames = allocator();
        assert_eq!(frames.seed(None), Err(SeedError::NoMemoryMap));

        let raw = entry(0, 0x9_FC00, 1);
        assert_eq!(
            frames.seed(Some(MemoryMap::new(&raw))),
            Err(SeedError::NoUsableMemory)
        );
    }

    #[test]
    fn frames_are_unique_until_freed() {
        let mut frames = allocator();
        let raw = standard_map();
        frames.seed(Some(MemoryMap::new(&raw))).unwrap();

        let mut held = HashSet::new();
        for round in 0..200 {
            let frame = frames.alloc_frame().unwrap();
            assert!(held.insert(frame), "{frame} handed out twice");
            if round % 3 == 0 {
                let victim = *held.iter().next().unwrap();
                held.remove(&victim);
                frames.free_frame(victim);
            }
        }
        for frame in held {
            assert!(!frames.is_dma(frame.base()));
        }
    }

    #[test]
    fn dma_runs_come_from_the_window() {
        let mut frames = allocator();
        let raw = standard_map();
        frames.seed(Some(MemoryMap::new(&raw))).unwrap();

        let run = frames.alloc_dma(4).unwrap();
        assert!(frames.is_dma(run.base()));
        assert_eq!(frames.free_dma_frames(), DMA_WINDOW_FRAMES - 4);
        frames.free_dma(run, 4);
        assert_eq!(frames.free_dma_frames(), DMA_WINDOW_FRAMES);
    }
}
