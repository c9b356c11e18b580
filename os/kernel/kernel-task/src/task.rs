use crate::file_table::FileTable;
use crate::registers::Registers;
use alloc::alloc::{Layout, alloc_zeroed};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_vmem::AddressSpace;

/// Process identifier. The idle task is pid 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(pub u32);

impl Pid {
    pub const IDLE: Self = Self(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskStatus {
    /// On the run queue (or executing).
    Running,
    /// Asleep until woken.
    Blocked,
    /// Exited; resources are held until the parent reaps it.
    Finished,
}

/// One page of kernel stack with the task's trap frame at the very top.
///
/// The CPU enters the kernel at `esp0` (the end of the page) on every
/// interrupt from ring 3, so the frame built by the entry stubs always lands
/// in [`frame`](Self::frame).
#[repr(C, align(4096))]
pub struct KernelStack {
    scratch: [u8; KERNEL_STACK_SIZE - size_of::<Registers>()],
    pub frame: Registers,
}

const _: () = assert!(size_of::<KernelStack>() == KERNEL_STACK_SIZE);

impl KernelStack {
    /// Allocate a zeroed stack, or `None` if the heap is exhausted.
    #[must_use]
    pub fn try_new() -> Option<Box<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: non-zero size; an all-zero `KernelStack` is valid.
        unsafe {
            let ptr = alloc_zeroed(layout).cast::<Self>();
            if ptr.is_null() {
                None
            } else {
                Some(Box::from_raw(ptr))
            }
        }
    }

    /// Allocate a byte-for-byte copy of `self`.
    #[must_use]
    pub fn try_clone(&self) -> Option<Box<Self>> {
        let mut copy = Self::try_new()?;
        copy.scratch.copy_from_slice(&self.scratch);
        copy.frame = self.frame;
        Some(copy)
    }

    /// Address the CPU loads into `esp` on entry from ring 3.
    #[must_use]
    pub fn top(&self) -> usize {
        core::ptr::from_ref(self).addr() + KERNEL_STACK_SIZE
    }
}

pub struct Task<H> {
    pub(crate) pid: Pid,
    pub(crate) parent: Option<Pid>,
    pub(crate) children: Vec<Pid>,
    pub(crate) status: TaskStatus,
    pub(crate) exit_code: i32,
    pub(crate) space: AddressSpace,
    pub(crate) kstack: Box<KernelStack>,
    pub(crate) files: FileTable<H>,
}

impl<H> Task<H> {
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub const fn parent(&self) -> Option<Pid> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[Pid] {
        &self.children
    }

    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.exit_code
    }

    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace {
        &self.space
    }

    #[must_use]
    pub fn kernel_stack(&self) -> &KernelStack {
        &self.kstack
    }

    /// The saved user context.
    #[must_use]
    pub fn frame(&self) -> &Registers {
        &self.kstack.frame
    }

    pub fn frame_mut(&mut self) -> &mut Registers {
        &mut self.kstack.frame
    }

    #[must_use]
    pub const fn files(&self) -> &FileTable<H> {
        &self.files
    }
}

impl<H> fmt::Debug for Task<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("status", &self.status)
            .field("children", &self.children)
            .field("exit_code", &self.exit_code)
            .field("directory", &self.space.directory())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stack_frame_sits_at_the_top() {
        let stack = KernelStack::try_new().unwrap();
        let frame = core::ptr::from_ref(&stack.frame).addr();
        assert_eq!(frame + size_of::<Registers>(), stack.top());
        assert_eq!(core::ptr::from_ref(&*stack).addr() % 4096, 0);
    }

    #[test]
    fn cloned_stacks_are_identical_copies() {
        let mut stack = KernelStack::try_new().unwrap();
        stack.scratch[100] = 0xAB;
        stack.frame.eax = 42;
        let copy = stack.try_clone().unwrap();
        assert_eq!(copy.scratch[100], 0xAB);
        assert_eq!(copy.frame, stack.frame);
        assert_ne!(copy.top(), stack.top());
    }
}
