use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    let kernel_offset = memory::KERNEL_VIRTUAL_OFFSET;
    let phys_load = memory::PHYS_LOAD;
    assert_eq!(
        kernel_offset & ((1u32 << 22) - 1),
        0,
        "KERNEL_VIRTUAL_OFFSET must be 4 MiB aligned (got {kernel_offset:#x})"
    );
    assert_eq!(
        phys_load & 0xfff,
        0,
        "PHYS_LOAD must be 4 KiB aligned (got {phys_load:#x})"
    );

    println!("cargo:rerun-if-changed={}", ld.display());
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());

    // Symbols consumed by the linker script.
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_VIRTUAL_OFFSET={kernel_offset:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=PHYS_LOAD={phys_load:#x}");
}
