//! # Multiboot entry and boot paging
//!
//! The loader jumps to the physical alias of [`_start`] with paging off,
//! `eax` holding the Multiboot magic and `ebx` the physical address of the
//! information block. `_start` builds the boot page directory in place:
//!
//! | Slot              | Maps                                       |
//! |-------------------|--------------------------------------------|
//! | 0                 | first 4 MiB, identity (dropped after boot) |
//! | 768               | first 4 MiB at `KERNEL_VIRTUAL_OFFSET`     |
//! | window slot       | empty table for the temporary window       |
//! | 1023              | the directory itself (recursive slot)      |
//!
//! then sets `CR0.PG`, jumps to the linked (higher-half) address, switches
//! to [`BOOT_STACK`] and calls `kernel_entry(magic, info)`.
//!
//! The boot directory stays the CPU's directory for the lifetime of the
//! kernel. The image, its stacks and the boot tables must therefore fit in
//! the first 4 MiB of physical memory.

use kernel_info::boot::{MULTIBOOT_HEADER_CHECKSUM, MULTIBOOT_HEADER_FLAGS, MULTIBOOT_HEADER_MAGIC};
use kernel_info::memory::{
    KERNEL_FIRST_SLOT, KERNEL_VIRTUAL_OFFSET, RECURSIVE_SLOT, TEMP_WINDOW_START,
};

/// Stack used by `kernel_main` until the first task runs.
pub const BOOT_STACK_SIZE: usize = 16 * 1024;

/// Present and writable, supervisor only.
const BOOT_ENTRY_FLAGS: u32 = 0b11;

const WINDOW_SLOT: usize = (TEMP_WINDOW_START >> 22) as usize;

const CR0_PG: u32 = 1 << 31;

#[repr(C, align(4))]
struct MultibootHeader {
    magic: u32,
    flags: u32,
    checksum: u32,
}

#[used]
#[unsafe(link_section = ".multiboot")]
static MULTIBOOT_HEADER: MultibootHeader = MultibootHeader {
    magic: MULTIBOOT_HEADER_MAGIC,
    flags: MULTIBOOT_HEADER_FLAGS,
    checksum: MULTIBOOT_HEADER_CHECKSUM,
};

/// One page of 32-bit paging entries.
#[repr(C, align(4096))]
pub struct BootTable([u32; 1024]);

#[repr(align(16))]
pub struct Aligned16<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_DIRECTORY: BootTable = BootTable([0; 1024]);

/// Identity table for the first 4 MiB, shared by slots 0 and 768.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_LOW_TABLE: BootTable = BootTable([0; 1024]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_WINDOW_TABLE: BootTable = BootTable([0; 1024]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
pub static mut BOOT_STACK: Aligned16<BOOT_STACK_SIZE> = Aligned16([0; BOOT_STACK_SIZE]);

/// Kernel entry point as seen by the loader (through its physical alias).
///
/// Everything up to the far jump runs at physical addresses, so every
/// symbol reference subtracts `KERNEL_VIRTUAL_OFFSET`.
#[unsafe(no_mangle)]
#[unsafe(naked)]
#[unsafe(link_section = ".text.boot")]
pub extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov esi, eax",
        "mov edi, ebx",

        // Low table: entry i maps frame i.
        "lea edx, [{low} - {offset}]",
        "xor ecx, ecx",
        "2:",
        "mov eax, ecx",
        "shl eax, 12",
        "or eax, {flags}",
        "mov [edx + ecx * 4], eax",
        "inc ecx",
        "cmp ecx, 1024",
        "jne 2b",

        "lea ebx, [{dir} - {offset}]",
        "mov eax, edx",
        "or eax, {flags}",
        "mov [ebx], eax",
        "mov [ebx + {kernel_slot} * 4], eax",
        "lea eax, [{window} - {offset}]",
        "or eax, {flags}",
        "mov [ebx + {window_slot} * 4], eax",
        "mov eax, ebx",
        "or eax, {flags}",
        "mov [ebx + {recursive_slot} * 4], eax",

        "mov cr3, ebx",
        "mov eax, cr0",
        "or eax, {pg}",
        "mov cr0, eax",

        // Continue at the linked address.
        "lea eax, [3f]",
        "jmp eax",
        "3:",
        "lea esp, [{stack} + {stack_size}]",
        "xor ebp, ebp",
        "push edi",
        "push esi",
        "call {entry}",
        "4:",
        "cli",
        "hlt",
        "jmp 4b",
        low = sym BOOT_LOW_TABLE,
        dir = sym BOOT_DIRECTORY,
        window = sym BOOT_WINDOW_TABLE,
        stack = sym BOOT_STACK,
        entry = sym crate::kernel_entry,
        offset = const KERNEL_VIRTUAL_OFFSET,
        flags = const BOOT_ENTRY_FLAGS,
        kernel_slot = const KERNEL_FIRST_SLOT,
        window_slot = const WINDOW_SLOT,
        recursive_slot = const RECURSIVE_SLOT,
        pg = const CR0_PG,
        stack_size = const BOOT_STACK_SIZE,
    );
}

const _: () = assert!(WINDOW_SLOT != KERNEL_FIRST_SLOT && WINDOW_SLOT != RECURSIVE_SLOT);
