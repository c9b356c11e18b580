use crate::{MemoryAddressOffset, MemoryPage, PageSize, PhysicalAddress};
use core::fmt;

/// Physical memory page base for size `S`.
///
/// For `S = Size4K` this is a *frame*: the unit handed out by the frame
/// allocator and stored in page table entries.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let frame = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0030_0FFF));
/// assert_eq!(frame.base().as_u32(), 0x0030_0000);
/// assert_eq!(frame.frame_number(), 0x300);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize>(pub(crate) MemoryPage<S>);

impl<S: PageSize> PhysicalPage<S> {
    /// Page containing `p` (aligns down).
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self(MemoryPage::from_addr(p.0))
    }

    /// Page with the given page number.
    #[inline]
    #[must_use]
    pub const fn from_number(n: u32) -> Self {
        Self::from_addr(PhysicalAddress::new(n << S::SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0.base())
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: MemoryAddressOffset<S>) -> PhysicalAddress {
        PhysicalAddress(self.0.join(off))
    }

    /// Page number (`base >> S::SHIFT`).
    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u32 {
        self.0.number()
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, n: u32) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(p) => Some(Self(p)),
            None => None,
        }
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>(0x{:08X})", S::as_str(), self.0.base().as_u32())
    }
}
