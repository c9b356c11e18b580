//! # Common interrupt entry
//!
//! The timer and system call stubs push a zero error code and their vector,
//! then jump to [`interrupt_common`]. It completes the
//! [`Registers`] frame on the interrupted task's kernel stack, switches to
//! a dedicated handler stack and calls [`interrupt_dispatch`].
//!
//! The dispatcher returns the frame of the task to resume, which may belong
//! to a different task than the one interrupted. The stub loads `esp` from
//! it, pops it and `iretd`s. Running the Rust side on its own stack keeps
//! it off task kernel stacks, which `exit` and `exec` may free or rewrite.

use crate::gdt::KERNEL_DS;
use crate::tasking;
use kernel_info::cpu::{SYSCALL_VECTOR, TIMER_VECTOR};
use kernel_task::Registers;
use log::warn;

const HANDLER_STACK_SIZE: usize = 16 * 1024;

#[repr(C, align(16))]
struct HandlerStack([u8; HANDLER_STACK_SIZE]);

static mut HANDLER_STACK: HandlerStack = HandlerStack([0; HANDLER_STACK_SIZE]);

/// Second half of every entry stub. Expects `[int_no, err_code, eip, cs,
/// eflags, ...]` on the stack.
#[unsafe(naked)]
pub extern "C" fn interrupt_common() {
    core::arch::naked_asm!(
        "pusha",
        "xor eax, eax",
        "mov ax, ds",
        "push eax",
        "mov ax, {kds}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",

        // eax := frame; run the dispatcher on the handler stack.
        "mov eax, esp",
        "lea esp, [{stack} + {stack_size}]",
        "push eax",
        "call {dispatch}",

        // eax := frame to resume.
        "mov esp, eax",
        "jmp {resume}",
        kds = const KERNEL_DS,
        stack = sym HANDLER_STACK,
        stack_size = const HANDLER_STACK_SIZE,
        dispatch = sym interrupt_dispatch,
        resume = sym resume_frame_at_esp,
    )
}

/// Pop the frame at `esp` and return from the interrupt into it.
#[unsafe(naked)]
extern "C" fn resume_frame_at_esp() -> ! {
    core::arch::naked_asm!(
        "pop eax",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "popa",
        "add esp, 8",
        "iretd",
    )
}

/// Leave the boot stack for good and resume `frame`.
///
/// # Safety
/// `frame` must be a complete frame on the kernel stack of the task that is
/// current, with `esp0` already pointing at that stack's top.
pub unsafe fn enter_frame(frame: *mut Registers) -> ! {
    unsafe {
        core::arch::asm!(
            "mov esp, {frame}",
            "jmp {resume}",
            frame = in(reg) frame,
            resume = sym resume_frame_at_esp,
            options(noreturn),
        )
    }
}

/// Route the interrupt in `frame` and return the frame to resume.
extern "C" fn interrupt_dispatch(frame: *const Registers) -> *mut Registers {
    // SAFETY: the stub passes the frame it just built.
    let vector = unsafe { (*frame).int_no };

    match u8::try_from(vector) {
        Ok(TIMER_VECTOR) => tasking::on_timer(),
        Ok(SYSCALL_VECTOR) => tasking::on_syscall(),
        _ => warn!("spurious interrupt on vector {vector}"),
    }

    tasking::resume_frame()
}
