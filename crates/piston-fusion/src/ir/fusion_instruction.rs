use crate::Shape;

use super::{Computation, InstructionId, Opcode};

/// Checked view of a fusion instruction inside its parent computation.
#[derive(Debug, Clone, Copy)]
pub struct FusionInstruction<'a> {
    parent: &'a Computation,
    id: InstructionId,
    fused: &'a Computation,
}

impl<'a> FusionInstruction<'a> {
    /// Returns `None` when `id` is not a fusion in `parent`.
    pub fn new(parent: &'a Computation, id: InstructionId) -> Option<Self> {
        match &parent.get(id)?.opcode {
            Opcode::Fusion(fused) => Some(Self {
                parent,
                id,
                fused: &**fused,
            }),
            _ => None,
        }
    }

    pub fn id(&self) -> InstructionId {
        self.id
    }

    pub fn fused_computation(&self) -> &'a Computation {
        self.fused
    }

    pub fn shape(&self) -> &'a Shape {
        &self.parent[self.id].shape
    }

    pub fn operands(&self) -> &'a [InstructionId] {
        &self.parent[self.id].operands
    }

    /// The instruction bound to fused parameter `number`.
    pub fn operand(&self, number: usize) -> Option<InstructionId> {
        self.operands().get(number).copied()
    }
}
