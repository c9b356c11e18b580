//! # Address spaces
//!
//! An [`AddressSpace`] owns one page directory frame: a *saved copy* of the
//! user-range slots of a task's view of memory, plus a program break.
//!
//! ## Ownership
//!
//! - Slots at or above [`KERNEL_FIRST_SLOT`], and slots whose table is the
//!   one the [`KernelDirectory`] template has, are **shared**: they are never
//!   copied on clone and never freed.
//! - Every other present slot is **owned**: the page table frame and every
//!   user-accessible leaf frame in it belong to this address space and are
//!   released by [`AddressSpace::free`].
//! - Kernel-only leaves inside owned tables are shared, not copied.
//!
//! ## Switching
//!
//! The CPU's directory never changes. [`switch_address_space`] saves the
//! live user slots into the outgoing space (they may have been changed in
//! place, e.g. by a page allocation while it ran) and then writes and
//! flushes only the slots whose table differs in the incoming space.

use crate::info::{KERNEL_FIRST_SLOT, PAGE_SIZE, USER_ENTRY, USER_STACK_TOP};
use crate::{
    FrameAlloc, MapError, MapFlags, PageMapper, PageTableView, PdEntry, PhysMapper, WalkedTables,
};
use kernel_memory_addresses::{
    ENTRIES_PER_TABLE, PhysicalPage, Size4K, VirtualAddress, align_down, align_up,
};
use log::{debug, trace};

/// The kernel's template directory.
///
/// A snapshot of the boot directory taken once paging is final. New address
/// spaces start as a copy of it; its slots mark which tables are kernel
/// property.
#[derive(Debug, Copy, Clone)]
pub struct KernelDirectory {
    frame: PhysicalPage<Size4K>,
}

impl KernelDirectory {
    /// Use an already populated directory frame as the template.
    #[must_use]
    pub const fn from_frame(frame: PhysicalPage<Size4K>) -> Self {
        Self { frame }
    }

    /// Copy every slot of `live` into a fresh frame.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available.
    pub fn snapshot<V: PageTableView, M: PhysMapper, A: FrameAlloc>(
        live: &V,
        mapper: &M,
        frames: &mut A,
    ) -> Result<Self, MapError> {
        let frame = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        mapper.with_directory(frame, |d| {
            for slot in 0..ENTRIES_PER_TABLE {
                d.set(slot, live.directory_entry(slot));
            }
        });
        debug!("kernel directory template at {frame}");
        Ok(Self { frame })
    }

    #[must_use]
    pub const fn frame(&self) -> PhysicalPage<Size4K> {
        self.frame
    }

    /// `true` if `entry` in `slot` refers to a kernel-owned table.
    #[must_use]
    pub fn shares<M: PhysMapper>(&self, mapper: &M, slot: usize, entry: PdEntry) -> bool {
        if slot >= KERNEL_FIRST_SLOT {
            return true;
        }
        let template = mapper.with_directory(self.frame, |d| d.get(slot));
        template.is_present() && template.same_table(entry)
    }
}

/// One task's view of memory.
#[derive(Debug, Eq, PartialEq)]
pub struct AddressSpace {
    directory: PhysicalPage<Size4K>,
    brk: VirtualAddress,
}

/// What [`switch_address_space`] did.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SwitchStats {
    /// The outgoing space received the live user slots.
    pub saved: bool,
    /// Number of directory slots rewritten and flushed.
    pub reloaded: usize,
}

impl AddressSpace {
    /// Allocate a directory holding only the kernel template's mappings.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available.
    pub fn alloc<M: PhysMapper, A: FrameAlloc>(
        mapper: &M,
        frames: &mut A,
        kernel: &KernelDirectory,
    ) -> Result<Self, MapError> {
        let directory = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        mapper.copy_frame(kernel.frame, directory);
        trace!("address space at {directory}");
        Ok(Self {
            directory,
            brk: VirtualAddress::new(USER_ENTRY),
        })
    }

    #[must_use]
    pub const fn directory(&self) -> PhysicalPage<Size4K> {
        self.directory
    }

    /// End of the loaded program image, page aligned.
    #[must_use]
    pub const fn brk(&self) -> VirtualAddress {
        self.brk
    }

    /// Walk this space's saved directory.
    #[must_use]
    pub const fn view<'a, M: PhysMapper>(&self, mapper: &'a M) -> WalkedTables<'a, M> {
        WalkedTables::new(self.directory, mapper)
    }

    fn entry<M: PhysMapper>(&self, mapper: &M, slot: usize) -> PdEntry {
        mapper.with_directory(self.directory, |d| d.get(slot))
    }

    fn set_entry<M: PhysMapper>(&self, mapper: &M, slot: usize, entry: PdEntry) {
        mapper.with_directory(self.directory, |d| d.set(slot, entry));
    }

    /// Copy the live user-range slots into this space's directory.
    pub fn save<V: PageTableView, M: PhysMapper>(&self, live: &V, mapper: &M) {
        mapper.with_directory(self.directory, |d| {
            for slot in 0..KERNEL_FIRST_SLOT {
                d.set(slot, live.directory_entry(slot));
            }
        });
    }

    /// Deep-copy this space for `fork`.
    ///
    /// Shared slots are linked, owned tables are duplicated; user leaves are
    /// copied frame for frame. The directory must be up to date (see
    /// [`save`](Self::save)) if this space is live.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`]; everything allocated for the clone is
    /// released again before returning.
    pub fn try_clone<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        frames: &mut A,
        kernel: &KernelDirectory,
    ) -> Result<Self, MapError> {
        let directory = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        mapper.zero_frame(directory);
        let clone = Self {
            directory,
            brk: self.brk,
        };

        for slot in 0..ENTRIES_PER_TABLE {
            let entry = self.entry(mapper, slot);
            if !entry.is_present() {
                continue;
            }
            if kernel.shares(mapper, slot, entry) {
                clone.set_entry(mapper, slot, entry);
                continue;
            }
            if let Err(e) = clone.copy_table(mapper, frames, slot, entry) {
                debug!("clone of {} failed in slot {slot}: {e}", self.directory);
                clone.free(mapper, frames, kernel);
                return Err(e);
            }
        }

        debug!("cloned address space {} -> {}", self.directory, clone.directory);
        Ok(clone)
    }

    /// Duplicate the table `source` into `slot` of `self`.
    ///
    /// The new table is linked before it is filled, so a failure part-way
    /// leaves everything copied so far reachable for [`free`](Self::free).
    fn copy_table<M: PhysMapper, A: FrameAlloc>(
        &self,
        mapper: &M,
        frames: &mut A,
        slot: usize,
        source: PdEntry,
    ) -> Result<(), MapError> {
        let table = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        mapper.zero_frame(table);
        self.set_entry(mapper, slot, PdEntry::table(table, source.flags()));

        for index in 0..ENTRIES_PER_TABLE {
            let page = mapper.with_table(source.frame(), |t| t.get(index));
            if !page.is_present() {
                continue;
            }
            let copy = if page.is_user() {
                let frame = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
                mapper.copy_frame(page.frame(), frame);
                page.with_frame(frame)
            } else {
                page
            };
            mapper.with_table(table, |t| t.set(index, copy));
        }
        Ok(())
    }

    /// Release every owned table and user frame, then the directory.
    ///
    /// Must not be called on the live space.
    pub fn free<M: PhysMapper, A: FrameAlloc>(
        self,
        mapper: &M,
        frames: &mut A,
        kernel: &KernelDirectory,
    ) {
        let mut released = 0usize;
        for slot in 0..KERNEL_FIRST_SLOT {
            let entry = self.entry(mapper, slot);
            if !entry.is_present() || kernel.shares(mapper, slot, entry) {
                continue;
            }
            let table = entry.frame();
            for index in 0..ENTRIES_PER_TABLE {
                let page = mapper.with_table(table, |t| t.get(index));
                if page.is_present() && page.is_user() {
                    frames.free_frame(page.frame());
                    released += 1;
                }
            }
            frames.free_frame(table);
            released += 1;
        }
        frames.free_frame(self.directory);
        debug!("freed address space {} ({released} frames)", self.directory);
    }

    /// Copy a flat program image to `USER_ENTRY` and set the break to the
    /// page-aligned end of the image.
    ///
    /// Bytes between the end of the image and the break read as zero.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] (nothing stays mapped), or
    /// [`MapError::AlreadyMapped`] if the range is in use.
    pub fn map_as_data<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mapper: &M,
        frames: &mut A,
        data: &[u8],
    ) -> Result<(), MapError> {
        let len = u32::try_from(data.len()).map_err(|_| MapError::OutOfMemory)?;
        let brk = align_up(USER_ENTRY + len, PAGE_SIZE).ok_or(MapError::OutOfMemory)?;
        let base = VirtualAddress::new(USER_ENTRY);
        let count = ((brk - USER_ENTRY) / PAGE_SIZE) as usize;

        let view = self.view(mapper);
        PageMapper::new(&view, frames).alloc_pages(base, count, MapFlags::USER_DATA)?;

        for (i, chunk) in data.chunks(PAGE_SIZE as usize).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let va = base + i as u32 * PAGE_SIZE;
            let Some(pa) = view.translate(va) else {
                unreachable!("{va} was just mapped");
            };
            mapper.with_frame(pa.page(), |f| {
                f.0[..chunk.len()].copy_from_slice(chunk);
                f.0[chunk.len()..].fill(0);
            });
        }

        self.brk = VirtualAddress::new(brk);
        debug!("mapped {len} byte image, brk {}", self.brk);
        Ok(())
    }

    /// Map a zeroed page just below the kernel split for the user stack.
    ///
    /// # Errors
    /// As [`PageMapper::alloc_page`].
    pub fn map_as_stack<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        mapper: &M,
        frames: &mut A,
    ) -> Result<(), MapError> {
        let va = VirtualAddress::new(align_down(USER_STACK_TOP, PAGE_SIZE));
        let view = self.view(mapper);
        let frame = PageMapper::new(&view, frames).alloc_page(va, MapFlags::USER_DATA)?;
        mapper.zero_frame(frame);
        Ok(())
    }

    /// Read user memory of this (not necessarily live) space.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] if any byte of the range is unmapped.
    pub fn read_user<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), MapError> {
        let view = self.view(mapper);
        let mut done = 0usize;
        while done < buf.len() {
            let at = u32::try_from(done)
                .ok()
                .and_then(|d| va.checked_add(d))
                .ok_or(MapError::NotMapped)?;
            let pa = view.translate(at).ok_or(MapError::NotMapped)?;
            let off = pa.offset::<Size4K>().as_usize();
            let n = (PAGE_SIZE as usize - off).min(buf.len() - done);
            mapper.with_frame(pa.page(), |f| {
                buf[done..done + n].copy_from_slice(&f.0[off..off + n]);
            });
            done += n;
        }
        Ok(())
    }
}

/// Make `new` the live address space.
///
/// If `old` is the same space this is a no-op. Otherwise the live user slots
/// are first saved into `old` (when given); then every user slot whose table
/// differs from `new` is rewritten and its 4 MiB region flushed.
pub fn switch_address_space<V: PageTableView, M: PhysMapper>(
    live: &V,
    mapper: &M,
    old: Option<&AddressSpace>,
    new: &AddressSpace,
) -> SwitchStats {
    let mut stats = SwitchStats::default();
    if let Some(old) = old {
        if old.directory == new.directory {
            return stats;
        }
        old.save(live, mapper);
        stats.saved = true;
    }

    mapper.with_directory(new.directory, |d| {
        for slot in 0..KERNEL_FIRST_SLOT {
            let wanted = d.get(slot);
            if !live.directory_entry(slot).same_table(wanted) {
                live.set_directory_entry(slot, wanted);
                live.flush_slot(slot);
                stats.reloaded += 1;
            }
        }
    });

    trace!(
        "switched to address space {} ({} slot(s) reloaded)",
        new.directory, stats.reloaded
    );
    stats
}
