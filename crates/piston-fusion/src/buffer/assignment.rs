use crate::{HashMap, InstructionId, ShapeIndex};

use super::{AllocationIndex, AllocationKind, BufferAllocation, BufferSlice, SliceLookupError};

/// Result of buffer assignment: the allocations of a module and the slice
/// every assigned `(instruction, shape index)` lives in.
///
/// Assignment may be partial. Lookups for unassigned values fail rather than
/// guess.
#[derive(Debug, Clone, Default)]
pub struct BufferAssignment {
    allocations: Vec<BufferAllocation>,
    slices: HashMap<(InstructionId, ShapeIndex), BufferSlice>,
}

impl BufferAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new allocation of `size` bytes and return its index.
    pub fn allocate(&mut self, size: u64, kind: AllocationKind) -> AllocationIndex {
        let index = AllocationIndex(self.allocations.len());
        self.allocations.push(BufferAllocation::new(index, size, kind));
        index
    }

    pub fn allocation(&self, index: AllocationIndex) -> Option<&BufferAllocation> {
        self.allocations.get(index.0)
    }

    pub fn allocations(&self) -> &[BufferAllocation] {
        &self.allocations
    }

    /// Place the value at `(instruction, index)` in `[offset, offset + size)`
    /// of `allocation`.
    pub fn assign(
        &mut self,
        instruction: InstructionId,
        index: ShapeIndex,
        allocation: AllocationIndex,
        offset: u64,
        size: u64,
    ) -> Result<BufferSlice, SliceLookupError> {
        let slice = self
            .allocation(allocation)
            .ok_or(SliceLookupError::UnknownAllocation(allocation))?
            .slice(offset, size)?;
        self.slices.insert((instruction, index), slice);
        Ok(slice)
    }

    pub fn unique_slice(
        &self,
        instruction: InstructionId,
        index: &ShapeIndex,
    ) -> Result<BufferSlice, SliceLookupError> {
        self.slices
            .get(&(instruction, index.clone()))
            .copied()
            .ok_or_else(|| SliceLookupError::Unassigned {
                instruction,
                index: index.clone(),
            })
    }
}
