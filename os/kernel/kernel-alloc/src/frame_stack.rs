//! # Free frame stack
//!
//! General-purpose frames are kept on an intrusive stack: the first word of
//! every free frame holds the physical address of the next free frame, and
//! `0` terminates the chain.
//!
//! ```text
//! top ──► ┌──────────┐    ┌──────────┐    ┌──────────┐
//!         │ next ────┼──► │ next ────┼──► │ 0        │
//!         │ …        │    │ …        │    │ …        │
//!         └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Free frames are usually not mapped anywhere, so every access to a link
//! word goes through a [`PhysMapper`]. The stack itself only remembers the
//! head and a count.

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::PhysMapper;

/// Byte offset of the link word inside a free frame.
const LINK_OFFSET: usize = 0;

/// Intrusive stack of free 4 KiB frames.
#[derive(Debug, Default)]
pub struct FreeFrameStack {
    top: Option<PhysicalPage<Size4K>>,
    len: usize,
}

impl FreeFrameStack {
    #[must_use]
    pub const fn new() -> Self {
        Self { top: None, len: 0 }
    }

    /// Number of frames on the stack.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    /// Physical address of the frame that [`pop`](Self::pop) would return.
    #[must_use]
    pub fn peek(&self) -> Option<PhysicalAddress> {
        self.top.map(PhysicalPage::base)
    }

    /// Push `frame`, writing the current head into its link word.
    ///
    /// The caller gives up ownership of the frame. Frame 0 cannot be pushed
    /// since its address doubles as the end marker.
    ///
    /// # Panics
    /// If `frame` is physical frame 0.
    pub fn push<M: PhysMapper>(&mut self, mapper: &M, frame: PhysicalPage<Size4K>) {
        assert_ne!(frame.frame_number(), 0, "frame 0 cannot be tracked");
        let link = self.peek().map_or(0, PhysicalAddress::as_u32);
        mapper.with_frame(frame, |bytes| bytes.write_u32(LINK_OFFSET, link));
        self.top = Some(frame);
        self.len += 1;
    }

    /// Pop the head frame, read its link word and zero it.
    pub fn pop<M: PhysMapper>(&mut self, mapper: &M) -> Option<PhysicalPage<Size4K>> {
        let frame = self.top?;
        let next = mapper.with_frame(frame, |bytes| {
            let next = bytes.read_u32(LINK_OFFSET);
            bytes.0.fill(0);
            next
        });

        self.top = (next != 0).then(|| PhysicalAddress::new(next).page());
        self.len -= 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::testing::TestPhys;

    fn frame(n: u32) -> PhysicalPage<Size4K> {
        PhysicalPage::from_number(n)
    }

    #[test]
    fn pops_in_reverse_push_order() {
        let phys = TestPhys::with_frames(8);
        let mut stack = FreeFrameStack::new();
        for n in [3, 5, 7] {
            stack.push(&phys, frame(n));
        }
        assert_eq!(stack.len(), 3);

        assert_eq!(stack.pop(&phys), Some(frame(7)));
        assert_eq!(stack.pop(&phys), Some(frame(5)));
        assert_eq!(stack.pop(&phys), Some(frame(3)));
        assert_eq!(stack.pop(&phys), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn link_lives_in_the_free_frame() {
        let phys = TestPhys::with_frames(8);
        let mut stack = FreeFrameStack::new();
        stack.push(&phys, frame(2));
        stack.push(&phys, frame(4));

        let mut word = [0u8; 4];
        phys.read(frame(4).base(), &mut word);
        assert_eq!(u32::from_le_bytes(word), 0x2000);
        phys.read(frame(2).base(), &mut word);
        assert_eq!(u32::from_le_bytes(word), 0);
    }

    #[test]
    fn popped_frames_are_zeroed() {
        let phys = TestPhys::with_frames(4);
        let mut stack = FreeFrameStack::new();
        phys.write(frame(1).base() + 100, &[0xAA; 16]);
        stack.push(&phys, frame(1));

        let got = stack.pop(&phys).unwrap();
        let mut bytes = [0xFFu8; 4096];
        phys.read(got.base(), &mut bytes);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
