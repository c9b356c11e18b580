//! # Memory Layout

/// Size of a frame and of a page.
pub const PAGE_SIZE: u32 = 4096;

/// Where the kernel executes (VMA). Everything below is user space.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const KERNEL_VIRTUAL_OFFSET: u32 = 0xC000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// First page directory slot of the kernel range. Slots at or above this
/// index are shared by every address space and never copied or freed.
pub const KERNEL_FIRST_SLOT: usize = (KERNEL_VIRTUAL_OFFSET >> 22) as usize;

/// The directory slot that points back at the directory itself.
pub const RECURSIVE_SLOT: usize = 1023;

/// Virtual address of the live page directory through the recursive slot.
pub const RECURSIVE_DIRECTORY: u32 = 0xFFFF_F000;

/// Virtual address of the first page table through the recursive slot.
/// Table `n` lives at `RECURSIVE_TABLES + n * PAGE_SIZE`.
pub const RECURSIVE_TABLES: u32 = 0xFFC0_0000;

/// Start of the temporary window region. Its page table is part of the boot
/// page tables so installing a window never allocates.
pub const TEMP_WINDOW_START: u32 = 0xFFBF_0000;

/// Number of temporary window slots.
pub const TEMP_WINDOW_PAGES: usize = 16;

/// Base of the kernel heap. The heap grows upward one page run at a time.
pub const HEAP_START: u32 = 0xD000_0000;

/// Entry point of every flat user binary.
pub const USER_ENTRY: u32 = 0;

/// Initial user stack pointer; its page is the last one below the kernel.
pub const USER_STACK_TOP: u32 = KERNEL_VIRTUAL_OFFSET - 4;

/// Size of the DMA pool that follows the kernel image in physical memory.
pub const DMA_WINDOW_BYTES: u32 = 1024 * 1024;

/// Number of frames tracked by the DMA bitmap.
pub const DMA_WINDOW_FRAMES: usize = (DMA_WINDOW_BYTES / PAGE_SIZE) as usize;

/// ISA DMA transfers must not cross this physical boundary.
pub const DMA_BOUNDARY: u32 = 0x1_0000;

/// Size of a task's kernel stack.
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE as usize;

const _: () = {
    assert!(KERNEL_VIRTUAL_OFFSET.is_multiple_of(1 << 22));
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_START > KERNEL_VIRTUAL_OFFSET);
    assert!(TEMP_WINDOW_START + (TEMP_WINDOW_PAGES as u32) * PAGE_SIZE <= RECURSIVE_TABLES);
    assert!(TEMP_WINDOW_START >> 22 == (RECURSIVE_TABLES >> 22) - 1);
    assert!(RECURSIVE_TABLES == (RECURSIVE_SLOT as u32) << 22);
    assert!(DMA_WINDOW_FRAMES.is_multiple_of(32));
};
