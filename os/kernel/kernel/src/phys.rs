//! Byte copies out of physical memory that has no permanent mapping.

use kernel_memory_addresses::{PhysicalAddress, Size4K};
use kernel_vmem::PhysMapper;

/// Fill `buf` from physical memory starting at `pa`, one frame at a time.
///
/// Returns `None` if the range wraps past 4 GiB.
pub fn read_physical<M: PhysMapper>(mapper: &M, pa: PhysicalAddress, buf: &mut [u8]) -> Option<()> {
    let len = u32::try_from(buf.len()).ok()?;
    pa.checked_add(len)?;

    let mut pa = pa;
    let mut done = 0;
    while done < buf.len() {
        let (page, off) = pa.split::<Size4K>();
        let off = off.as_usize();
        let n = (4096 - off).min(buf.len() - done);
        mapper.with_frame(page, |frame| {
            buf[done..done + n].copy_from_slice(&frame.0[off..off + n]);
        });
        done += n;
        #[allow(clippy::cast_possible_truncation)]
        {
            pa += n as u32;
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::testing::TestPhys;

    #[test]
    fn copies_across_a_frame_boundary() {
        let ram = TestPhys::with_frames(3);
        let data: Vec<u8> = (1..=200).collect();
        ram.write(PhysicalAddress::new(0x1FA0), &data);

        let mut buf = [0u8; 200];
        assert_eq!(read_physical(&ram, PhysicalAddress::new(0x1FA0), &mut buf), Some(()));
        assert_eq!(&buf[..], data.as_slice());
    }

    #[test]
    fn refuses_to_wrap() {
        let ram = TestPhys::with_frames(1);
        let mut buf = [0u8; 8];
        assert_eq!(read_physical(&ram, PhysicalAddress::new(0xFFFF_FFFC), &mut buf), None);
    }
}
