//! Structural matchers shared by the allocation-aware descriptors.
//!
//! Both probes look at the fused computation for a pattern and, once it
//! matches, consult a [`SliceSource`] to see where operands and outputs live.

use std::collections::VecDeque;

use super::{output_defining_dynamic_update_slice, CopyFusionOutcome, FusionAnalysis, MemcpyEmitter};
use crate::{
    BufferSlice, Computation, HashSet, InstructionId, Opcode, RVec, Shape, SliceLookupError,
};

/// Where a fusion's operands and results live in device memory.
pub(crate) trait SliceSource {
    /// Slice of the value bound to fused parameter `number`.
    fn operand_slice(&self, number: usize) -> Result<BufferSlice, SliceLookupError>;

    /// One slice per array leaf of the fusion result, in pre-order.
    fn output_slices(&self) -> Result<Vec<BufferSlice>, SliceLookupError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CopyFusionError {
    #[error("Copy fusion {fusion}: source for parameter {parameter} is not allocated: {source}")]
    Source {
        fusion: String,
        parameter: usize,
        source: SliceLookupError,
    },
    #[error("Copy fusion {fusion}: destination is not allocated: {source}")]
    Destination {
        fusion: String,
        source: SliceLookupError,
    },
    #[error("Copy fusion {fusion} copies {sources} sources into {destinations} destinations.")]
    Arity {
        fusion: String,
        sources: usize,
        destinations: usize,
    },
}

/// Whether the fusion can write its dynamic-update-slice results straight into
/// the buffers it reads from.
///
/// Requires every root to be a DUS (optionally behind a bitcast, optionally
/// inside the root tuple), each updating a fusion parameter that lives in the
/// same slice as the corresponding output and is not read anywhere else in a
/// way that could race with the update.
pub(crate) fn can_update_dynamic_slice_in_place(
    analysis: &FusionAnalysis,
    fused: &Computation,
    slices: &dyn SliceSource,
) -> Result<bool, SliceLookupError> {
    let dus_instrs: RVec<InstructionId> = analysis
        .fusion_roots()
        .iter()
        .filter_map(|&root| output_defining_dynamic_update_slice(fused, root))
        .collect();

    let output_buffers = slices.output_slices()?;
    if dus_instrs.len() != output_buffers.len() || output_buffers.is_empty() {
        log::trace!(
            "{}: {} updates for {} outputs",
            analysis.name(),
            dus_instrs.len(),
            output_buffers.len()
        );
        return Ok(false);
    }

    let Some(update_shape) = fused.operand(dus_instrs[0], 1).map(|u| &u.shape) else {
        return Ok(false);
    };

    for (dus, output_buffer) in dus_instrs.iter().copied().zip(&output_buffers) {
        if fused[dus].operands.len() < 2 {
            return Ok(false);
        }
        // A DUS feeding anything but the root could be read by another update.
        if !fused.is_root(dus) && fused.users(dus).len() != 1 {
            return Ok(false);
        }
        let mut user = single_user_below_root(fused, dus);
        if let Some(bitcast) = user.filter(|&u| matches!(fused[u].opcode, Opcode::Bitcast)) {
            if !fused.is_root(bitcast) && fused.users(bitcast).len() != 1 {
                return Ok(false);
            }
            user = single_user_below_root(fused, bitcast);
        }
        if let Some(tuple) = user.filter(|&u| matches!(fused[u].opcode, Opcode::Tuple)) {
            if !fused.is_root(tuple) {
                return Ok(false);
            }
            user = None;
        }
        if user.is_some() {
            return Ok(false);
        }

        let dus_buffer = fused[dus].operands[0];
        let mut operand = dus_buffer;
        if matches!(fused[operand].opcode, Opcode::Bitcast) {
            match fused[operand].operands.first() {
                Some(&inner) => operand = inner,
                None => return Ok(false),
            }
        }
        let Some(parameter_number) = fused[operand].opcode.parameter_number() else {
            return Ok(false);
        };

        if let Some(reader) = racing_reader(fused, operand, dus, dus_buffer, update_shape) {
            log::trace!(
                "{}: parameter {parameter_number} is also read by a {}",
                analysis.name(),
                fused[reader].opcode.name()
            );
            return Ok(false);
        }

        let update = &fused[fused[dus].operands[1]].shape;
        if update != update_shape {
            log::trace!("{}: updates {update} and {update_shape} differ", analysis.name());
            return Ok(false);
        }

        let lhs_buffer = slices.operand_slice(parameter_number)?;
        if lhs_buffer != *output_buffer {
            log::trace!(
                "{}: parameter {parameter_number} in {lhs_buffer:?}, output in {output_buffer:?}",
                analysis.name()
            );
            return Ok(false);
        }
    }

    Ok(true)
}

/// The only user of `id`, or `None` if `id` is the root.
fn single_user_below_root(fused: &Computation, id: InstructionId) -> Option<InstructionId> {
    if fused.is_root(id) {
        None
    } else {
        fused.users(id).first().copied()
    }
}

/// The first transitive reader of `parameter` that could observe the update.
///
/// Harmless readers are elementwise ops, bitcasts, tuples and dynamic-slices of
/// the same buffer reading exactly the window the DUS writes.
fn racing_reader(
    fused: &Computation,
    parameter: InstructionId,
    dus: InstructionId,
    dus_buffer: InstructionId,
    update_shape: &Shape,
) -> Option<InstructionId> {
    let dus_indices = &fused[dus].operands[2..];
    let mut queue = VecDeque::from([parameter]);
    let mut visited = HashSet::default();
    visited.insert(parameter);
    // The DUS has a single path to the root, checked by the caller.
    visited.insert(dus);

    while let Some(instr) = queue.pop_front() {
        for &user in fused.users(instr) {
            let u = &fused[user];
            let reads_update_window = matches!(u.opcode, Opcode::DynamicSlice)
                && u.operands.first() == Some(&dus_buffer)
                && u.shape == *update_shape;
            if reads_update_window {
                let both_scalar = u.shape.is_effective_scalar() && update_shape.is_effective_scalar();
                if !both_scalar && u.operands[1..] != *dus_indices {
                    return Some(user);
                }
            } else if user != dus
                && !u.opcode.is_elementwise()
                && !matches!(u.opcode, Opcode::Bitcast | Opcode::Tuple)
            {
                return Some(user);
            }
            if visited.insert(user) {
                queue.push_back(user);
            }
        }
    }
    None
}

/// Match a fusion whose roots are all same-layout copies of parameters and
/// resolve the buffers the copies move between.
pub(crate) fn try_memcpy_fusion(
    analysis: &FusionAnalysis,
    fused: &Computation,
    slices: &dyn SliceSource,
) -> CopyFusionOutcome<'static> {
    let mut parameters = RVec::<usize>::new();
    for &root in analysis.fusion_roots() {
        let instr = &fused[root];
        if !matches!(instr.opcode, Opcode::Copy) {
            return CopyFusionOutcome::NotApplicable;
        }
        let Some(operand) = fused.operand(root, 0) else {
            return CopyFusionOutcome::NotApplicable;
        };
        let Some(number) = operand.opcode.parameter_number() else {
            return CopyFusionOutcome::NotApplicable;
        };
        if !operand.shape.same_layout(&instr.shape) {
            return CopyFusionOutcome::NotApplicable;
        }
        parameters.push(number);
    }

    let mut src = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        match slices.operand_slice(parameter) {
            Ok(slice) => src.push(slice),
            Err(source) => {
                return CopyFusionOutcome::Failure(CopyFusionError::Source {
                    fusion: analysis.name().to_string(),
                    parameter,
                    source,
                })
            }
        }
    }

    let dst = match slices.output_slices() {
        Ok(dst) => dst,
        Err(source) => {
            return CopyFusionOutcome::Failure(CopyFusionError::Destination {
                fusion: analysis.name().to_string(),
                source,
            })
        }
    };

    if src.len() != dst.len() {
        return CopyFusionOutcome::Failure(CopyFusionError::Arity {
            fusion: analysis.name().to_string(),
            sources: src.len(),
            destinations: dst.len(),
        });
    }

    CopyFusionOutcome::Success(Box::new(MemcpyEmitter::new(src, dst)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AllocationIndex, DType, ElementwiseOp, EmitterKind, FusionBackendConfig, FusionEmitter,
        Shape,
    };

    /// Slice source backed by plain vectors. `None` entries fail the lookup.
    struct FixedSlices {
        operands: Vec<Option<BufferSlice>>,
        outputs: Option<Vec<BufferSlice>>,
    }

    impl SliceSource for FixedSlices {
        fn operand_slice(&self, number: usize) -> Result<BufferSlice, SliceLookupError> {
            self.operands
                .get(number)
                .copied()
                .flatten()
                .ok_or(SliceLookupError::MissingOperand(number))
        }

        fn output_slices(&self) -> Result<Vec<BufferSlice>, SliceLookupError> {
            self.outputs
                .clone()
                .ok_or(SliceLookupError::UnknownAllocation(AllocationIndex(99)))
        }
    }

    fn slice(allocation: usize) -> BufferSlice {
        BufferSlice::new(AllocationIndex(allocation), 0, 1024)
    }

    fn f32(dims: &[usize]) -> Shape {
        Shape::array(DType::F32, dims)
    }

    /// `dus(p0, p1, p2, p2)` as root, optionally with an extra reader of p0.
    fn dus_fusion(extra_reader: Option<Opcode>) -> anyhow::Result<Computation> {
        let mut c = Computation::new("dus");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        if let Some(op) = extra_reader {
            let operands: &[InstructionId] = match op {
                Opcode::DynamicSlice => &[p0, p2, p2],
                _ => &[p0],
            };
            let shape = match op {
                Opcode::DynamicSlice => f32(&[4, 16]),
                _ => f32(&[16, 16]),
            };
            c.add_instruction(op, shape, operands)?;
        }
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        c.set_root(dus)?;
        Ok(c)
    }

    fn in_place(c: &Computation, slices: &FixedSlices) -> anyhow::Result<bool> {
        let analysis = FusionAnalysis::new(c, FusionBackendConfig::Default)?;
        Ok(can_update_dynamic_slice_in_place(&analysis, c, slices)?)
    }

    #[test]
    fn test_dus_in_place_when_buffers_alias() -> anyhow::Result<()> {
        let c = dus_fusion(None)?;
        let aliased = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1)), Some(slice(2))],
            outputs: Some(vec![slice(0)]),
        };
        assert!(in_place(&c, &aliased)?);

        let separate = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1)), Some(slice(2))],
            outputs: Some(vec![slice(3)]),
        };
        assert!(!in_place(&c, &separate)?);
        Ok(())
    }

    #[test]
    fn test_dus_rejects_racy_readers() -> anyhow::Result<()> {
        let aliased = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1)), Some(slice(2))],
            outputs: Some(vec![slice(0)]),
        };

        // Same window as the update: still in place.
        let c = dus_fusion(Some(Opcode::DynamicSlice))?;
        assert!(in_place(&c, &aliased)?);

        // Elementwise readers are fine.
        let c = dus_fusion(Some(Opcode::Elementwise(ElementwiseOp::Neg)))?;
        assert!(in_place(&c, &aliased)?);

        // A reduction over the whole buffer could observe the update.
        let c = dus_fusion(Some(Opcode::Reduce))?;
        assert!(!in_place(&c, &aliased)?);
        Ok(())
    }

    #[test]
    fn test_dus_lookup_errors_propagate() -> anyhow::Result<()> {
        let c = dus_fusion(None)?;
        let missing = FixedSlices {
            operands: vec![None, Some(slice(1)), Some(slice(2))],
            outputs: Some(vec![slice(0)]),
        };
        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert_eq!(
            can_update_dynamic_slice_in_place(&analysis, &c, &missing),
            Err(SliceLookupError::MissingOperand(0))
        );
        Ok(())
    }

    fn copy_fusion(layout: &[usize]) -> anyhow::Result<Computation> {
        let mut c = Computation::new("copy");
        let p0 = c.add_parameter(0, f32(&[8, 8]))?;
        let p1 = c.add_parameter(1, f32(&[8, 8]))?;
        let shape = Shape::array_with_layout(DType::F32, &[8, 8], layout);
        let c0 = c.add_instruction(Opcode::Copy, shape.clone(), &[p0])?;
        let c1 = c.add_instruction(Opcode::Copy, shape.clone(), &[p1])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([shape.clone(), shape]), &[c0, c1])?;
        Ok(c)
    }

    #[test]
    fn test_copy_outcomes() -> anyhow::Result<()> {
        let slices = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1))],
            outputs: Some(vec![slice(2), slice(1)]),
        };

        let c = copy_fusion(&[1, 0])?;
        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        match try_memcpy_fusion(&analysis, &c, &slices) {
            CopyFusionOutcome::Success(emitter) => {
                assert_eq!(emitter.kind(), EmitterKind::Memcpy)
            }
            other => panic!("expected a memcpy, got {other:?}"),
        }

        // Layout-changing copies are real kernels.
        let c = copy_fusion(&[0, 1])?;
        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert!(matches!(
            try_memcpy_fusion(&analysis, &c, &slices),
            CopyFusionOutcome::NotApplicable
        ));

        let c = copy_fusion(&[1, 0])?;
        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        let no_outputs = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1))],
            outputs: None,
        };
        assert!(matches!(
            try_memcpy_fusion(&analysis, &c, &no_outputs),
            CopyFusionOutcome::Failure(CopyFusionError::Destination { .. })
        ));

        let no_source = FixedSlices {
            operands: vec![Some(slice(0)), None],
            outputs: Some(vec![slice(2), slice(3)]),
        };
        assert!(matches!(
            try_memcpy_fusion(&analysis, &c, &no_source),
            CopyFusionOutcome::Failure(CopyFusionError::Source { parameter: 1, .. })
        ));

        let short = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1))],
            outputs: Some(vec![slice(2)]),
        };
        assert!(matches!(
            try_memcpy_fusion(&analysis, &c, &short),
            CopyFusionOutcome::Failure(CopyFusionError::Arity {
                sources: 2,
                destinations: 1,
                ..
            })
        ));

        let empty = FixedSlices {
            operands: vec![Some(slice(0)), Some(slice(1))],
            outputs: Some(vec![]),
        };
        assert!(matches!(
            try_memcpy_fusion(&analysis, &c, &empty),
            CopyFusionOutcome::Failure(CopyFusionError::Arity {
                sources: 2,
                destinations: 0,
                ..
            })
        ));
        Ok(())
    }

    /// Slices where parameter `n` lives in allocation `n`.
    fn numbered(count: usize, outputs: Vec<BufferSlice>) -> FixedSlices {
        FixedSlices {
            operands: (0..count).map(|n| Some(slice(n))).collect(),
            outputs: Some(outputs),
        }
    }

    /// `tuple(dus(p0, p1, p2, p2), dus(p3, p4, p2, p2))`.
    fn two_dus_fusion(update0: Shape, update1: Shape) -> anyhow::Result<Computation> {
        let mut c = Computation::new("two_dus");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, update0)?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let p3 = c.add_parameter(3, f32(&[16, 16]))?;
        let p4 = c.add_parameter(4, update1)?;
        let d0 = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        let d1 = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p3, p4, p2, p2])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[16, 16]), f32(&[16, 16])]), &[d0, d1])?;
        Ok(c)
    }

    #[test]
    fn test_multi_output_dus_pairs_outputs_in_order() -> anyhow::Result<()> {
        let c = two_dus_fusion(f32(&[4, 16]), f32(&[4, 16]))?;
        assert!(in_place(&c, &numbered(5, vec![slice(0), slice(3)]))?);
        // Output i must alias the buffer of update i, not just any updated buffer.
        assert!(!in_place(&c, &numbered(5, vec![slice(3), slice(0)]))?);
        Ok(())
    }

    #[test]
    fn test_dus_updates_must_share_one_shape() -> anyhow::Result<()> {
        let aliased = numbered(5, vec![slice(0), slice(3)]);

        let c = two_dus_fusion(f32(&[4, 16]), f32(&[2, 16]))?;
        assert!(!in_place(&c, &aliased)?);

        let c = two_dus_fusion(f32(&[4, 16]), Shape::array(DType::F16, &[4, 16]))?;
        assert!(!in_place(&c, &aliased)?);

        let c = two_dus_fusion(
            f32(&[4, 16]),
            Shape::array_with_layout(DType::F32, &[4, 16], &[0, 1]),
        )?;
        assert!(!in_place(&c, &aliased)?);
        Ok(())
    }

    #[test]
    fn test_dus_with_extra_users_is_not_in_place() -> anyhow::Result<()> {
        // The same DUS behind two root bitcasts.
        let mut c = Computation::new("shared_dus");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        let b0 = c.add_instruction(Opcode::Bitcast, f32(&[256]), &[dus])?;
        let b1 = c.add_instruction(Opcode::Bitcast, f32(&[256]), &[dus])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[256]), f32(&[256])]), &[b0, b1])?;
        assert!(!in_place(&c, &numbered(3, vec![slice(0), slice(0)]))?);

        // A DUS that also feeds a tuple outside the root.
        let mut c = Computation::new("dus_in_tuple");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[16, 16])]), &[dus])?;
        let root = c.add_instruction(Opcode::Bitcast, f32(&[256]), &[dus])?;
        assert!(c.is_root(root));
        assert!(!in_place(&c, &numbered(3, vec![slice(0)]))?);

        // The bitcast between the DUS and the root tuple has a second user.
        let mut c = Computation::new("shared_bitcast");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        let bitcast = c.add_instruction(Opcode::Bitcast, f32(&[256]), &[dus])?;
        c.add_instruction(Opcode::Elementwise(ElementwiseOp::Neg), f32(&[256]), &[bitcast])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[256])]), &[bitcast])?;
        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert!(analysis.is_dynamic_update_slice_fusion());
        assert!(!in_place(&c, &numbered(3, vec![slice(0)]))?);
        Ok(())
    }

    #[test]
    fn test_dynamic_slice_of_other_window_races() -> anyhow::Result<()> {
        let mut c = Computation::new("dus");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let p2 = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let p3 = c.add_parameter(3, Shape::scalar(DType::I32))?;
        c.add_instruction(Opcode::DynamicSlice, f32(&[4, 16]), &[p0, p3, p2])?;
        c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, p2, p2])?;
        assert!(!in_place(&c, &numbered(4, vec![slice(0)]))?);
        Ok(())
    }

    #[test]
    fn test_dus_without_outputs_is_not_in_place() -> anyhow::Result<()> {
        let c = dus_fusion(None)?;
        assert!(!in_place(&c, &numbered(3, vec![]))?);
        Ok(())
    }
}
