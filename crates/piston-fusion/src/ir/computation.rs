//! Instruction graph representation.

use crate::{RVec, Shape};
use slotmap::{new_key_type, SlotMap};

use super::Opcode;

new_key_type! {
    /// Unique identifier for an instruction within a [`Computation`].
    pub struct InstructionId;
}

#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
    #[error("Operand {operand:?} does not belong to computation {computation}.")]
    UnknownOperand {
        operand: InstructionId,
        computation: String,
    },
    #[error("Parameter {number} is already defined in computation {computation}.")]
    DuplicateParameter { number: usize, computation: String },
    #[error("Computation {0} has no root.")]
    MissingRoot(String),
    #[error("Fusion expects {expected} operands, got {actual}.")]
    FusionArity { expected: usize, actual: usize },
    #[error("Fusion produces {expected} array outputs, got {actual} output buffers.")]
    OutputArity { expected: usize, actual: usize },
}

/// A single node of a [`Computation`].
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstructionId,
    pub opcode: Opcode,
    pub shape: Shape,
    /// Input instructions, in operand order.
    pub operands: RVec<InstructionId>,
    /// Instructions consuming this one, each listed once.
    pub users: RVec<InstructionId>,
}

/// A DAG of instructions with numbered parameters and a single root.
///
/// Operands must exist before the instructions that use them.
#[derive(Debug, Clone)]
pub struct Computation {
    name: String,
    instructions: SlotMap<InstructionId, Instruction>,
    parameters: Vec<Option<InstructionId>>,
    root: Option<InstructionId>,
}

impl Computation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: SlotMap::with_key(),
            parameters: Vec::new(),
            root: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_parameter(
        &mut self,
        number: usize,
        shape: Shape,
    ) -> Result<InstructionId, ComputationError> {
        if self.parameter(number).is_some() {
            return Err(ComputationError::DuplicateParameter {
                number,
                computation: self.name.clone(),
            });
        }
        let id = self.insert(Opcode::Parameter(number), shape, RVec::new());
        if self.parameters.len() <= number {
            self.parameters.resize(number + 1, None);
        }
        self.parameters[number] = Some(id);
        Ok(id)
    }

    /// Append an instruction. The newest instruction becomes the root until
    /// [`Computation::set_root`] says otherwise.
    pub fn add_instruction(
        &mut self,
        opcode: Opcode,
        shape: Shape,
        operands: &[InstructionId],
    ) -> Result<InstructionId, ComputationError> {
        if let Opcode::Parameter(number) = &opcode {
            return self.add_parameter(*number, shape);
        }
        for &operand in operands {
            if !self.instructions.contains_key(operand) {
                return Err(ComputationError::UnknownOperand {
                    operand,
                    computation: self.name.clone(),
                });
            }
        }

        let id = self.insert(opcode, shape, operands.iter().copied().collect());
        for &operand in operands {
            let users = &mut self.instructions[operand].users;
            if !users.contains(&id) {
                users.push(id);
            }
        }
        self.root = Some(id);
        Ok(id)
    }

    /// Append a fusion instruction wrapping `fused`. Its shape is the shape of
    /// the fused root.
    pub fn add_fusion(
        &mut self,
        fused: Computation,
        operands: &[InstructionId],
    ) -> Result<InstructionId, ComputationError> {
        let root = fused
            .root()
            .ok_or_else(|| ComputationError::MissingRoot(fused.name.clone()))?;
        if fused.parameter_count() != operands.len() {
            return Err(ComputationError::FusionArity {
                expected: fused.parameter_count(),
                actual: operands.len(),
            });
        }
        let shape = fused[root].shape.clone();
        self.add_instruction(Opcode::Fusion(Box::new(fused)), shape, operands)
    }

    pub fn set_root(&mut self, id: InstructionId) -> Result<(), ComputationError> {
        if !self.instructions.contains_key(id) {
            return Err(ComputationError::UnknownOperand {
                operand: id,
                computation: self.name.clone(),
            });
        }
        self.root = Some(id);
        Ok(())
    }

    fn insert(&mut self, opcode: Opcode, shape: Shape, operands: RVec<InstructionId>) -> InstructionId {
        let id = self.instructions.insert_with_key(|id| Instruction {
            id,
            opcode,
            shape,
            operands,
            users: RVec::new(),
        });
        id
    }

    pub fn root(&self) -> Option<InstructionId> {
        self.root
    }

    pub fn is_root(&self, id: InstructionId) -> bool {
        self.root == Some(id)
    }

    pub fn get(&self, id: InstructionId) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    /// The `index`-th operand of `id`.
    pub fn operand(&self, id: InstructionId, index: usize) -> Option<&Instruction> {
        let operand = *self.get(id)?.operands.get(index)?;
        self.get(operand)
    }

    pub fn users(&self, id: InstructionId) -> &[InstructionId] {
        self.get(id).map(|i| i.users.as_slice()).unwrap_or(&[])
    }

    pub fn parameter(&self, number: usize) -> Option<InstructionId> {
        self.parameters.get(number).copied().flatten()
    }

    /// One more than the highest parameter number.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}

impl std::ops::Index<InstructionId> for Computation {
    type Output = Instruction;

    fn index(&self, id: InstructionId) -> &Self::Output {
        &self.instructions[id]
    }
}
