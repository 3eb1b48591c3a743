//! The three ways a fusion can be handed to the selector.

use crate::{
    resolve_memref, rvec, BufferAllocation, BufferAssignment, BufferSlice, FusionInstruction,
    LegacyFusionOp, SliceLookupError,
};

use super::probes::{can_update_dynamic_slice_in_place, try_memcpy_fusion, SliceSource};
use super::{CopyFusionError, FusionAnalysis, FusionEmitter};

/// Result of probing a fusion for the memcpy special case.
///
/// `NotApplicable` lets the selector move on; `Failure` must not be skipped,
/// because the fusion *is* a copy and the generic path would emit it wrongly.
#[derive(Debug)]
pub enum CopyFusionOutcome<'a> {
    NotApplicable,
    Success(Box<dyn FusionEmitter + 'a>),
    Failure(CopyFusionError),
}

impl CopyFusionOutcome<'_> {
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, CopyFusionOutcome::NotApplicable)
    }
}

/// A fusion as seen by [`select_emitter`](super::select_emitter).
///
/// Implementors borrow the analysis and whatever allocation data they were
/// built from, and must not outlive them.
pub trait FusionDescriptor {
    fn analysis(&self) -> &FusionAnalysis;

    /// Whether the DUS results can be written into their input buffers.
    ///
    /// Only meaningful for DUS fusions (see
    /// [`FusionAnalysis::is_dynamic_update_slice_fusion`]); calling it for
    /// anything else is a bug.
    fn can_emit_dynamic_update_slice_in_place(&self) -> bool;

    fn try_get_copy_fusion(&self) -> CopyFusionOutcome<'_>;
}

/// Stand-in used before buffer assignment exists, e.g. for cost estimates.
///
/// Its answers are placeholders: DUS fusions are assumed to be in place and
/// copy fusions are never detected. Ask again with an allocation-aware
/// descriptor once buffers are assigned.
#[derive(Debug, Clone, Copy)]
pub struct EarlyFusion<'a> {
    analysis: &'a FusionAnalysis,
}

impl<'a> EarlyFusion<'a> {
    pub fn new(analysis: &'a FusionAnalysis) -> Self {
        Self { analysis }
    }
}

impl FusionDescriptor for EarlyFusion<'_> {
    fn analysis(&self) -> &FusionAnalysis {
        self.analysis
    }

    fn can_emit_dynamic_update_slice_in_place(&self) -> bool {
        debug_assert!(self.analysis.is_dynamic_update_slice_fusion());
        true
    }

    fn try_get_copy_fusion(&self) -> CopyFusionOutcome<'_> {
        // Only producing the slices needs an assignment, but without one the
        // loop emitter is just as good.
        CopyFusionOutcome::NotApplicable
    }
}

/// A buffer-centric fusion op plus the allocations its memrefs index into.
#[derive(Debug, Clone, Copy)]
pub struct LegacyFusion<'a> {
    analysis: &'a FusionAnalysis,
    fusion_op: &'a LegacyFusionOp,
    allocations: &'a [&'a BufferAllocation],
}

impl<'a> LegacyFusion<'a> {
    pub fn new(
        analysis: &'a FusionAnalysis,
        fusion_op: &'a LegacyFusionOp,
        allocations: &'a [&'a BufferAllocation],
    ) -> Self {
        Self {
            analysis,
            fusion_op,
            allocations,
        }
    }
}

impl SliceSource for LegacyFusion<'_> {
    fn operand_slice(&self, number: usize) -> Result<BufferSlice, SliceLookupError> {
        let memref = self
            .fusion_op
            .input(number)
            .ok_or(SliceLookupError::MissingOperand(number))?;
        resolve_memref(memref, self.allocations)
    }

    fn output_slices(&self) -> Result<Vec<BufferSlice>, SliceLookupError> {
        self.fusion_op
            .outputs()
            .iter()
            .map(|memref| resolve_memref(memref, self.allocations))
            .collect()
    }
}

impl FusionDescriptor for LegacyFusion<'_> {
    fn analysis(&self) -> &FusionAnalysis {
        self.analysis
    }

    fn can_emit_dynamic_update_slice_in_place(&self) -> bool {
        debug_assert!(self.analysis.is_dynamic_update_slice_fusion());
        let fused = self.fusion_op.fused_computation();
        match can_update_dynamic_slice_in_place(self.analysis, fused, self) {
            Ok(in_place) => in_place,
            Err(err) => {
                log::trace!("{}: not in place, {err}", self.analysis.name());
                false
            }
        }
    }

    fn try_get_copy_fusion(&self) -> CopyFusionOutcome<'_> {
        try_memcpy_fusion(self.analysis, self.fusion_op.fused_computation(), self)
    }
}

/// A fusion instruction plus the module's (possibly partial) buffer assignment.
#[derive(Debug, Clone, Copy)]
pub struct ModernFusion<'a> {
    analysis: &'a FusionAnalysis,
    instr: FusionInstruction<'a>,
    buffer_assignment: &'a BufferAssignment,
}

impl<'a> ModernFusion<'a> {
    pub fn new(
        analysis: &'a FusionAnalysis,
        instr: FusionInstruction<'a>,
        buffer_assignment: &'a BufferAssignment,
    ) -> Self {
        Self {
            analysis,
            instr,
            buffer_assignment,
        }
    }
}

impl SliceSource for ModernFusion<'_> {
    fn operand_slice(&self, number: usize) -> Result<BufferSlice, SliceLookupError> {
        let operand = self
            .instr
            .operand(number)
            .ok_or(SliceLookupError::MissingOperand(number))?;
        self.buffer_assignment.unique_slice(operand, &rvec![])
    }

    fn output_slices(&self) -> Result<Vec<BufferSlice>, SliceLookupError> {
        self.instr
            .shape()
            .array_leaves()
            .into_iter()
            .map(|(index, _)| self.buffer_assignment.unique_slice(self.instr.id(), &index))
            .collect()
    }
}

impl FusionDescriptor for ModernFusion<'_> {
    fn analysis(&self) -> &FusionAnalysis {
        self.analysis
    }

    fn can_emit_dynamic_update_slice_in_place(&self) -> bool {
        debug_assert!(self.analysis.is_dynamic_update_slice_fusion());
        let fused = self.instr.fused_computation();
        match can_update_dynamic_slice_in_place(self.analysis, fused, self) {
            Ok(in_place) => in_place,
            Err(err) => {
                log::trace!("{}: not in place, {err}", self.analysis.name());
                false
            }
        }
    }

    fn try_get_copy_fusion(&self) -> CopyFusionOutcome<'_> {
        try_memcpy_fusion(self.analysis, self.instr.fused_computation(), self)
    }
}
