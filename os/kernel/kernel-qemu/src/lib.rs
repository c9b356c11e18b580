//! # QEMU debug console output
//!
//! Routes kernel diagnostics to QEMU's debug console (I/O port `0x402`).
//! Run the VM with `-debugcon stdio` (or `-debugcon file:debug.log`) to see
//! the output on the host.
//!
//! The port is write-only and needs no setup, so the logger works from the
//! first instruction after paging is enabled, long before the heap or the
//! frame allocator exist.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//! if let Err(e) = LOGGER.init() {
//!     kernel_qemu::qemu_trace!("logger not installed: {e}\n");
//! }
//! info!("paging enabled");
//! ```
//!
//! On targets other than x86 the sink discards everything; this keeps host
//! builds of crates that log working.
//!
//! With the `enabled` feature switched off, [`qemu_trace!`] compiles to
//! nothing.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's `-debugcon` port.
    pub const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to the debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        let _ = c;
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // best effort
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(_: fmt::Arguments) {}
}

/// `print!`-style output straight to the debug port, bypassing `log`.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
