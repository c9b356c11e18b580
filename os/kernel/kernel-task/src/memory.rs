use kernel_vmem::{
    AddressSpace, FrameAlloc, KernelDirectory, MapError, PageTableView, PhysMapper, SwitchStats,
    switch_address_space,
};

/// Everything the scheduler needs to create, switch and free address
/// spaces.
///
/// In the kernel `live` is the recursive mapping of the CPU's directory and
/// `mapper` the temporary window; tests use simulated RAM for both.
pub struct MemoryContext<'a, V, M, A> {
    pub live: &'a V,
    pub mapper: &'a M,
    pub frames: &'a mut A,
    pub kernel: &'a KernelDirectory,
}

impl<'a, V: PageTableView, M: PhysMapper, A: FrameAlloc> MemoryContext<'a, V, M, A> {
    pub const fn new(
        live: &'a V,
        mapper: &'a M,
        frames: &'a mut A,
        kernel: &'a KernelDirectory,
    ) -> Self {
        Self {
            live,
            mapper,
            frames,
            kernel,
        }
    }

    pub(crate) fn alloc_space(&mut self) -> Result<AddressSpace, MapError> {
        AddressSpace::alloc(self.mapper, self.frames, self.kernel)
    }

    pub(crate) fn clone_space(&mut self, space: &AddressSpace) -> Result<AddressSpace, MapError> {
        space.try_clone(self.mapper, self.frames, self.kernel)
    }

    pub(crate) fn free_space(&mut self, space: AddressSpace) {
        space.free(self.mapper, self.frames, self.kernel);
    }

    /// Save the live user slots into `space`.
    pub(crate) fn save(&self, space: &AddressSpace) {
        space.save(self.live, self.mapper);
    }

    pub(crate) fn switch(&self, old: Option<&AddressSpace>, new: &AddressSpace) -> SwitchStats {
        switch_address_space(self.live, self.mapper, old, new)
    }
}
