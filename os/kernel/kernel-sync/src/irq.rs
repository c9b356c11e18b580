//! Interrupt flag control.
//!
//! On the bare-metal i386 target these functions issue `cli`/`sti` and read
//! EFLAGS with `pushfd`. On every other target (host tests) the interrupt
//! flag is emulated by a process-wide atomic so code built on [`IrqGuard`]
//! keeps its nesting semantics.

const EFLAGS_IF: u32 = 1 << 9;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod arch {
    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    pub fn eflags() -> u32 {
        let r: u32;
        unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags)) }
        r
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
mod arch {
    use core::sync::atomic::{AtomicBool, Ordering};

    static EMULATED_IF: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn disable() {
        EMULATED_IF.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn enable() {
        EMULATED_IF.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn eflags() -> u32 {
        if EMULATED_IF.load(Ordering::SeqCst) {
            super::EFLAGS_IF | 0b10
        } else {
            0b10
        }
    }
}

/// Disables hardware interrupts (`cli`).
///
/// # Privilege
/// Ring 0 only on bare metal.
#[inline]
pub fn cli_stop_interrupts() {
    arch::disable();
}

/// Enables hardware interrupts (`sti`).
///
/// # Privilege
/// Ring 0 only on bare metal.
#[inline]
pub fn sti_enable_interrupts() {
    arch::enable();
}

/// Returns the current `EFLAGS` value.
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    arch::eflags()
}

/// `true` if the interrupt flag is set.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & EFLAGS_IF != 0
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were
/// previously enabled, so guards nest.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            cli_stop_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }

    /// Whether interrupts will be re-enabled when this guard drops.
    #[inline]
    #[must_use]
    pub const fn restores_interrupts(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            sti_enable_interrupts();
        }
    }
}

/// Run `f` with interrupts disabled, restoring the previous state afterwards.
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let _guard = IrqGuard::new();
    f()
}
