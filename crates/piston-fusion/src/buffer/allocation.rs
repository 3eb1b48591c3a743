use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::MemRef;

use super::SliceLookupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationKind {
    /// Holds entry parameter `n`.
    Parameter(usize),
    Output,
    Temp,
    Constant,
}

/// A contiguous region of device memory handed out by buffer assignment.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct BufferAllocation {
    pub index: AllocationIndex,
    pub size: u64,
    pub kind: AllocationKind,
}

impl BufferAllocation {
    /// Slice `[offset, offset + size)` of this allocation, if it fits.
    pub fn slice(&self, offset: u64, size: u64) -> Result<BufferSlice, SliceLookupError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(BufferSlice::new(self.index, offset, size)),
            _ => Err(SliceLookupError::OutOfBounds {
                allocation: self.index,
                offset,
                size,
                allocation_size: self.size,
            }),
        }
    }
}

/// A byte range within one allocation. Two logical buffers share storage
/// exactly when their slices are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, new)]
pub struct BufferSlice {
    pub allocation: AllocationIndex,
    pub offset: u64,
    pub size: u64,
}

/// Resolve a legacy operand against the allocation list it was lowered with.
pub fn resolve_memref(
    memref: &MemRef,
    allocations: &[&BufferAllocation],
) -> Result<BufferSlice, SliceLookupError> {
    let allocation =
        allocations
            .get(memref.argument)
            .ok_or(SliceLookupError::ArgumentOutOfRange {
                argument: memref.argument,
                count: allocations.len(),
            })?;
    allocation.slice(memref.byte_offset, memref.shape.byte_size())
}
