//! # Scheduler glue
//!
//! Owns the kernel's [`Scheduler`] and connects it to the hardware: the
//! interrupt dispatcher calls [`on_timer`] and [`on_syscall`], then resumes
//! the frame [`resume_frame`] hands back. Every entry takes the scheduler
//! lock with interrupts disabled and builds a [`MemoryContext`] over the
//! live directory, the temporary window and the global frame allocator.

use crate::bootfs::BootFs;
use crate::interrupts::entry::enter_frame;
use crate::memory::{GlobalFrames, RECURSIVE, WINDOW};
use crate::pic::{PICS, TIMER_IRQ};
use crate::{pit, tss};
use kernel_alloc::TempWindow;
use kernel_info::cpu::TIMER_VECTOR;
use kernel_info::scheduler::{INIT_PROGRAM, TIMER_FREQUENCY_HZ};
use kernel_sync::SpinLock;
use kernel_task::{MemoryContext, Pid, Registers, Scheduler, TaskError};
use kernel_vmem::{KernelDirectory, RecursiveMapping};
use log::{error, info};

pub type KernelFs = BootFs<TempWindow<'static, RecursiveMapping>>;

type KernelMemory<'a> = MemoryContext<'a, RecursiveMapping, TempWindow<'static, RecursiveMapping>, GlobalFrames>;

struct Kernel {
    scheduler: Scheduler<KernelFs>,
    directory: KernelDirectory,
}

static KERNEL: SpinLock<Option<Kernel>> = SpinLock::new(None);

fn with_kernel<R>(f: impl FnOnce(&mut Scheduler<KernelFs>, &mut KernelMemory<'_>) -> R) -> Option<R> {
    KERNEL.with_lock_irq(|kernel| {
        let kernel = kernel.as_mut()?;
        let mut frames = GlobalFrames;
        let mut mem = MemoryContext::new(&RECURSIVE, &WINDOW, &mut frames, &kernel.directory);
        Some(f(&mut kernel.scheduler, &mut mem))
    })
}

/// Runs whenever no task is runnable. Interrupts stay enabled.
#[unsafe(naked)]
extern "C" fn idle_loop() -> ! {
    core::arch::naked_asm!("2:", "sti", "hlt", "jmp 2b")
}

/// Create the idle task and pid 1, and load the init program into pid 1.
fn boot_tasks(fs: KernelFs, directory: KernelDirectory) -> Result<Kernel, TaskError> {
    let mut frames = GlobalFrames;
    let mut mem = MemoryContext::new(&RECURSIVE, &WINDOW, &mut frames, &directory);

    #[allow(clippy::cast_possible_truncation)]
    let idle_entry = idle_loop as usize as u32;
    let mut scheduler = Scheduler::new(fs, &mut mem, idle_entry)?;

    let init = scheduler.spawn(&mut mem, None)?;
    scheduler.switch_tasks(&mut mem);
    debug_assert_eq!(scheduler.current(), init);
    scheduler.exec(&mut mem, INIT_PROGRAM)?;
    info!("task {init} runs {INIT_PROGRAM}");

    Ok(Kernel {
        scheduler,
        directory,
    })
}

/// Start multitasking. Never returns; the boot stack is abandoned.
pub fn start(fs: KernelFs, directory: KernelDirectory) -> ! {
    let kernel = match boot_tasks(fs, directory) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("cannot start {INIT_PROGRAM}: {e}");
            crate::halt()
        }
    };
    KERNEL.with_lock_irq(|slot| *slot = Some(kernel));

    // SAFETY: interrupts are still disabled and the timer gate is installed.
    unsafe {
        pit::init(TIMER_FREQUENCY_HZ);
        PICS.with_lock(|pics| pics.unmask(TIMER_IRQ));
    }

    let frame = resume_frame();
    info!("entering user mode");
    // SAFETY: `resume_frame` set `esp0` for the current task.
    unsafe { enter_frame(frame) }
}

/// Timer interrupt: acknowledge it and count a tick.
pub fn on_timer() {
    // SAFETY: called from the timer handler.
    PICS.with_lock(|pics| unsafe { pics.notify_end_of_interrupt(TIMER_VECTOR) });
    with_kernel(|scheduler, mem| scheduler.tick(mem));
}

/// `int 0x80`: run the call described by the current task's frame.
pub fn on_syscall() {
    with_kernel(|scheduler, mem| scheduler.syscall(mem));
}

/// The frame of whichever task is current now, with `esp0` pointing at the
/// top of its kernel stack.
pub fn resume_frame() -> *mut Registers {
    let current = KERNEL.with_lock_irq(|kernel| {
        kernel
            .as_mut()
            .map(|k| (k.scheduler.current_frame_ptr(), k.scheduler.current_stack_top()))
    });
    let Some((frame, stack_top)) = current else {
        error!("interrupt taken before the scheduler exists");
        crate::halt()
    };
    tss::set_esp0(stack_top);
    frame
}

/// The current pid, unless the scheduler is busy or not yet running.
///
/// For diagnostics from fault handlers, which must not wait on the lock.
pub fn try_current_pid() -> Option<Pid> {
    KERNEL.try_lock()?.as_ref().map(|k| k.scheduler.current())
}
