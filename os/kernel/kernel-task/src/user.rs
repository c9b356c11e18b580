//! Copying between kernel buffers and the live user address space.
//!
//! Every page touched must be present and user-accessible (and writable
//! for copies into user memory); otherwise the copy fails with
//! [`TaskError::Fault`] before a single byte moves.

use crate::TaskError;
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_vmem::info::PAGE_SIZE;
use kernel_vmem::{PageTableView, PhysMapper, check_user_ptr};

/// [`check_user_ptr`] as a [`TaskError::Fault`].
pub(crate) fn check_user_range<V: PageTableView>(
    live: &V,
    va: VirtualAddress,
    len: usize,
    write: bool,
) -> Result<(), TaskError> {
    if check_user_ptr(live, va, len, write) {
        Ok(())
    } else {
        Err(TaskError::Fault)
    }
}

/// Visit `[va, va + len)` page by page as `(physical address, done, n)`.
fn for_each_chunk<V: PageTableView>(
    live: &V,
    va: VirtualAddress,
    len: usize,
    mut f: impl FnMut(PhysicalAddress, usize, usize),
) -> Result<(), TaskError> {
    let mut done = 0usize;
    while done < len {
        let at = u32::try_from(done)
            .ok()
            .and_then(|d| va.checked_add(d))
            .ok_or(TaskError::Fault)?;
        let pa = live.translate(at).ok_or(TaskError::Fault)?;
        let off = pa.offset::<Size4K>().as_usize();
        let n = (PAGE_SIZE as usize - off).min(len - done);
        f(pa, done, n);
        done += n;
    }
    Ok(())
}

/// Copy `buf.len()` bytes of user memory at `va` into `buf`.
///
/// # Errors
/// [`TaskError::Fault`] if any byte is not user-readable.
pub fn copy_from_user<V: PageTableView, M: PhysMapper>(
    live: &V,
    mapper: &M,
    va: VirtualAddress,
    buf: &mut [u8],
) -> Result<(), TaskError> {
    check_user_range(live, va, buf.len(), false)?;
    for_each_chunk(live, va, buf.len(), |pa, done, n| {
        let off = pa.offset::<Size4K>().as_usize();
        mapper.with_frame(pa.page(), |f| {
            buf[done..done + n].copy_from_slice(&f.0[off..off + n]);
        });
    })
}

/// Copy `data` into user memory at `va`.
///
/// # Errors
/// [`TaskError::Fault`] if any byte is not user-writable.
pub fn copy_to_user<V: PageTableView, M: PhysMapper>(
    live: &V,
    mapper: &M,
    va: VirtualAddress,
    data: &[u8],
) -> Result<(), TaskError> {
    check_user_range(live, va, data.len(), true)?;
    for_each_chunk(live, va, data.len(), |pa, done, n| {
        let off = pa.offset::<Size4K>().as_usize();
        mapper.with_frame(pa.page(), |f| {
            f.0[off..off + n].copy_from_slice(&data[done..done + n]);
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalPage;
    use kernel_vmem::testing::{BumpAlloc, TestPhys};
    use kernel_vmem::{FrameAlloc, MapFlags, PageMapper, WalkedTables};

    fn setup() -> (TestPhys, BumpAlloc, PhysicalPage<Size4K>) {
        let phys = TestPhys::with_frames(32);
        let mut frames = BumpAlloc::new(1, 32);
        let dir = frames.alloc_frame().unwrap();
        phys.zero_frame(dir);
        (phys, frames, dir)
    }

    #[test]
    fn copies_span_page_boundaries() {
        let (phys, mut frames, dir) = setup();
        let live = WalkedTables::new(dir, &phys);
        PageMapper::new(&live, &mut frames)
            .alloc_pages(VirtualAddress::new(0x1000), 2, MapFlags::USER_DATA)
            .unwrap();

        let at = VirtualAddress::new(0x1FFC);
        copy_to_user(&live, &phys, at, b"straddle").unwrap();
        let mut back = [0u8; 8];
        copy_from_user(&live, &phys, at, &mut back).unwrap();
        assert_eq!(&back, b"straddle");
    }

    #[test]
    fn kernel_pages_are_a_fault() {
        let (phys, mut frames, dir) = setup();
        let live = WalkedTables::new(dir, &phys);
        PageMapper::new(&live, &mut frames)
            .alloc_page(VirtualAddress::new(0x1000), MapFlags::KERNEL_DATA)
            .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            copy_from_user(&live, &phys, VirtualAddress::new(0x1000), &mut buf),
            Err(TaskError::Fault)
        );
        assert_eq!(
            copy_from_user(&live, &phys, VirtualAddress::new(0x5000), &mut buf),
            Err(TaskError::Fault)
        );
    }

    #[test]
    fn partially_mapped_ranges_copy_nothing() {
        let (phys, mut frames, dir) = setup();
        let live = WalkedTables::new(dir, &phys);
        PageMapper::new(&live, &mut frames)
            .alloc_page(VirtualAddress::new(0x1000), MapFlags::USER_DATA)
            .unwrap();

        assert_eq!(
            copy_to_user(&live, &phys, VirtualAddress::new(0x1FFE), b"abcd"),
            Err(TaskError::Fault)
        );
        let mut head = [0xFFu8; 2];
        copy_from_user(&live, &phys, VirtualAddress::new(0x1FFE), &mut head).unwrap();
        assert_eq!(head, [0, 0]);
    }

    #[test]
    fn read_only_pages_refuse_copies_in() {
        let (phys, mut frames, dir) = setup();
        let live = WalkedTables::new(dir, &phys);
        let flags = MapFlags {
            readonly: true,
            kernel_only: false,
        };
        PageMapper::new(&live, &mut frames)
            .alloc_page(VirtualAddress::new(0x1000), flags)
            .unwrap();

        let mut buf = [0xFFu8; 4];
        copy_from_user(&live, &phys, VirtualAddress::new(0x1000), &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        assert_eq!(
            copy_to_user(&live, &phys, VirtualAddress::new(0x1000), b"nope"),
            Err(TaskError::Fault)
        );
    }

    #[test]
    fn ranges_into_the_kernel_half_are_refused() {
        let (phys, _, dir) = setup();
        let live = WalkedTables::new(dir, &phys);
        let mut buf = [0u8; 8];
        assert_eq!(
            copy_from_user(&live, &phys, VirtualAddress::new(0xBFFF_FFFC), &mut buf),
            Err(TaskError::Fault)
        );
    }
}
