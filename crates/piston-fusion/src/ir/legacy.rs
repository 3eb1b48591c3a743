//! Buffer-centric fusion representation.
//!
//! Here a fusion does not refer to producer instructions at all. Each operand
//! and result is a view into one of the allocations passed to the kernel.

use derive_new::new;

use crate::Shape;

use super::{Computation, ComputationError};

/// A typed view into one entry of a kernel's allocation list.
#[derive(Debug, Clone, PartialEq, Eq, new)]
pub struct MemRef {
    /// Position in the allocation list, not an allocation index.
    pub argument: usize,
    pub byte_offset: u64,
    pub shape: Shape,
}

#[derive(Debug, Clone)]
pub struct LegacyFusionOp {
    fused: Computation,
    inputs: Vec<MemRef>,
    outputs: Vec<MemRef>,
}

impl LegacyFusionOp {
    /// `inputs` bind fused parameters by number; `outputs` bind the array
    /// leaves of the fused root in pre-order.
    pub fn new(
        fused: Computation,
        inputs: Vec<MemRef>,
        outputs: Vec<MemRef>,
    ) -> Result<Self, ComputationError> {
        let root = fused
            .root()
            .ok_or_else(|| ComputationError::MissingRoot(fused.name().to_string()))?;
        if inputs.len() != fused.parameter_count() {
            return Err(ComputationError::FusionArity {
                expected: fused.parameter_count(),
                actual: inputs.len(),
            });
        }
        let leaves = fused[root].shape.array_leaves().len();
        if outputs.len() != leaves {
            return Err(ComputationError::OutputArity {
                expected: leaves,
                actual: outputs.len(),
            });
        }
        Ok(Self {
            fused,
            inputs,
            outputs,
        })
    }

    pub fn fused_computation(&self) -> &Computation {
        &self.fused
    }

    pub fn input(&self, parameter_number: usize) -> Option<&MemRef> {
        self.inputs.get(parameter_number)
    }

    pub fn outputs(&self) -> &[MemRef] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Opcode};

    #[test]
    fn test_output_arity_follows_root_leaves() -> anyhow::Result<()> {
        let a = Shape::array(DType::F32, &[4]);
        let mut fused = Computation::new("fused");
        let p0 = fused.add_parameter(0, a.clone())?;
        let c0 = fused.add_instruction(Opcode::Copy, a.clone(), &[p0])?;
        let c1 = fused.add_instruction(Opcode::Copy, a.clone(), &[p0])?;
        fused.add_instruction(Opcode::Tuple, Shape::tuple([a.clone(), a.clone()]), &[c0, c1])?;

        let input = MemRef::new(0, 0, a.clone());
        let err = LegacyFusionOp::new(fused.clone(), vec![input.clone()], vec![MemRef::new(1, 0, a.clone())])
            .unwrap_err();
        assert!(matches!(
            err,
            ComputationError::OutputArity {
                expected: 2,
                actual: 1
            }
        ));

        let op = LegacyFusionOp::new(
            fused,
            vec![input],
            vec![MemRef::new(1, 0, a.clone()), MemRef::new(1, 16, a)],
        )?;
        assert_eq!(op.outputs().len(), 2);
        assert_eq!(op.input(0).map(|m| m.argument), Some(0));
        Ok(())
    }
}
