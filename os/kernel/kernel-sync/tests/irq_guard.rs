//! The interrupt flag is process-wide on hosted targets, so every assertion
//! on it lives in this single test.

use kernel_sync::irq::{IrqGuard, interrupts_enabled};
use kernel_sync::{SpinLock, without_interrupts};

#[test]
fn guards_nest_and_restore_the_interrupt_flag() {
    assert!(interrupts_enabled());

    {
        let outer = IrqGuard::new();
        assert!(outer.restores_interrupts());
        assert!(!interrupts_enabled());

        {
            let inner = IrqGuard::new();
            assert!(!inner.restores_interrupts());
            assert!(!interrupts_enabled());
        }

        // the inner guard must not re-enable interrupts
        assert!(!interrupts_enabled());
    }
    assert!(interrupts_enabled());

    let seen = without_interrupts(interrupts_enabled);
    assert!(!seen);
    assert!(interrupts_enabled());

    let lock = SpinLock::new(7u32);
    {
        let mut g = lock.lock_irq();
        *g += 1;
        assert!(!interrupts_enabled());
        assert!(lock.is_locked());
    }
    assert!(interrupts_enabled());
    assert!(!lock.is_locked());
    assert_eq!(lock.with_lock_irq(|v| *v), 8);
}
