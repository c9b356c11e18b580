//! # Kernel Entry Point
//!
//! Boot order, all with interrupts disabled:
//!
//! 1. [`boot::_start`](boot) enables paging and calls [`kernel_entry`],
//! 2. the logger, GDT + TSS, IDT and PIC come up,
//! 3. [`memory::init`] seeds the frame allocator and the heap,
//! 4. the initrd is mounted as the boot filesystem,
//! 5. [`tasking::start`] creates the idle and init tasks and leaves for
//!    user mode. Interrupts are enabled by the first `iretd`.
//!
//! The boot path only builds for `i686`. The hardware-independent parts
//! (descriptor encodings, the boot filesystem, PIC and PIT arithmetic) are
//! unit-tested on the host.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![cfg_attr(not(target_arch = "x86"), allow(dead_code))]
#![allow(unsafe_code)]

#[cfg(target_arch = "x86")]
mod boot;
mod bootfs;
mod gdt;
#[cfg(target_arch = "x86")]
mod idt;
mod interrupts;
#[cfg(target_arch = "x86")]
mod memory;
mod phys;
mod pic;
mod pit;
mod ports;
mod privilege;
#[cfg(target_arch = "x86")]
mod tasking;
mod tss;

#[cfg(target_arch = "x86")]
pub use entry::{halt, kernel_entry};

#[cfg(target_arch = "x86")]
mod entry {
    use crate::bootfs::BootFs;
    use crate::pic::PICS;
    use crate::{gdt, idt, memory, tasking};
    use kernel_info::boot::MULTIBOOT_BOOTLOADER_MAGIC;
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_qemu::QemuLogger;
    use log::{LevelFilter, error, info};

    static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);

    /// Called by the boot code on [`BOOT_STACK`](crate::boot::BOOT_STACK)
    /// with the loader's `eax` and `ebx`.
    pub extern "C" fn kernel_entry(magic: u32, info: u32) -> ! {
        if let Err(e) = LOGGER.init() {
            kernel_qemu::qemu_trace!("logger not installed: {e}\n");
        }
        info!("Kernel reporting to QEMU!");

        if magic != MULTIBOOT_BOOTLOADER_MAGIC {
            error!("not loaded by a Multiboot loader (magic {magic:#010x})");
            halt();
        }

        // SAFETY: once, in this order, interrupts disabled.
        unsafe {
            gdt::init_gdt_and_tss();
            idt::init_idt_once();
            PICS.with_lock(|pics| pics.init());
        }

        info!("Initializing memory management ...");
        let boot = match memory::init(PhysicalAddress::new(info)) {
            Ok(boot) => boot,
            Err(e) => {
                error!("memory bring-up failed: {e}");
                halt();
            }
        };

        let fs = match BootFs::new(memory::WINDOW, boot.initrd.start, boot.initrd.len) {
            Ok(fs) => fs,
            Err(e) => {
                error!("cannot mount the initrd: {e}");
                halt();
            }
        };

        info!("Starting the scheduler ...");
        tasking::start(fs, boot.directory)
    }

    /// Stop this CPU for good.
    pub fn halt() -> ! {
        loop {
            // SAFETY: ring 0.
            unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
        }
    }

    #[cfg(not(test))]
    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        error!("KERNEL PANIC: {info}");
        halt()
    }
}
