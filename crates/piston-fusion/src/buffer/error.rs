use crate::{InstructionId, ShapeIndex};

use super::AllocationIndex;

/// Failure to map a logical value onto device memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SliceLookupError {
    #[error("No slice assigned to {instruction:?} at index {index:?}.")]
    Unassigned {
        instruction: InstructionId,
        index: ShapeIndex,
    },
    #[error("Allocation {0:?} does not exist.")]
    UnknownAllocation(AllocationIndex),
    #[error("Kernel argument {argument} is out of range, {count} allocations were passed.")]
    ArgumentOutOfRange { argument: usize, count: usize },
    #[error(
        "Slice [{offset}, {offset} + {size}) does not fit allocation {allocation:?} of {allocation_size} bytes."
    )]
    OutOfBounds {
        allocation: AllocationIndex,
        offset: u64,
        size: u64,
        allocation_size: u64,
    },
    #[error("Fusion has no operand for parameter {0}.")]
    MissingOperand(usize),
}
