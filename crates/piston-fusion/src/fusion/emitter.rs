//! Fusion emitters.
//!
//! This module provides one emitter per emission strategy:
//! - [`InPlaceDynamicUpdateSliceEmitter`] - writes only the updated window
//! - [`MemcpyEmitter`] - device-to-device copies, no kernel
//! - [`LoopEmitter`], [`InputSlicesEmitter`], [`ReductionEmitter`],
//!   [`TransposeEmitter`] - the generic path, chosen by [`EmitterFusionKind`]
//!
//! Emitters are constructed by the selector and handed back to the caller.
//! Nothing here generates device code until the caller asks for it.

use std::fmt;

use super::{EmitterFusionKind, FusionAnalysis, SelectorConfig, Workload};
use crate::{BufferSlice, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmitterKind {
    InPlaceDynamicUpdateSlice,
    Memcpy,
    Loop,
    InputSlices,
    Reduction,
    Transpose,
}

impl fmt::Display for EmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmitterKind::InPlaceDynamicUpdateSlice => "in-place-dus",
            EmitterKind::Memcpy => "memcpy",
            EmitterKind::Loop => "loop",
            EmitterKind::InputSlices => "input-slices",
            EmitterKind::Reduction => "reduction",
            EmitterKind::Transpose => "transpose",
        };
        f.write_str(name)
    }
}

/// Trait for fused kernel emitters.
pub trait FusionEmitter: fmt::Debug {
    fn kind(&self) -> EmitterKind;

    /// Launch this emitter would issue, or `None` if it launches no kernel.
    fn workload(&self) -> Option<Workload>;
}

fn max_numel(shapes: &[Shape]) -> usize {
    shapes.iter().map(Shape::numel).max().unwrap_or(0)
}

/// Updates the output buffer in place. Only the update window is touched, so
/// the launch covers the update shape rather than the whole buffer.
#[derive(Debug)]
pub struct InPlaceDynamicUpdateSliceEmitter<'a> {
    analysis: &'a FusionAnalysis,
    workgroup_size: u32,
}

impl<'a> InPlaceDynamicUpdateSliceEmitter<'a> {
    pub fn new(analysis: &'a FusionAnalysis, config: &SelectorConfig) -> Self {
        Self {
            analysis,
            workgroup_size: config.workgroup_size,
        }
    }
}

impl FusionEmitter for InPlaceDynamicUpdateSliceEmitter<'_> {
    fn kind(&self) -> EmitterKind {
        EmitterKind::InPlaceDynamicUpdateSlice
    }

    fn workload(&self) -> Option<Workload> {
        // All updates share one shape, checked before this emitter is chosen.
        let numel = self.analysis.update_shapes().first().map_or(0, Shape::numel);
        Some(Workload::for_elements(numel, self.workgroup_size))
    }
}

/// A fusion that only copies parameters to outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcpyEmitter {
    src: Vec<BufferSlice>,
    dst: Vec<BufferSlice>,
}

impl MemcpyEmitter {
    pub fn new(src: Vec<BufferSlice>, dst: Vec<BufferSlice>) -> Self {
        debug_assert_eq!(src.len(), dst.len());
        Self { src, dst }
    }

    /// `(src, dst)` pairs that actually move bytes. Copies onto the same slice
    /// are dropped.
    pub fn copies(&self) -> impl Iterator<Item = (BufferSlice, BufferSlice)> + '_ {
        self.src
            .iter()
            .zip(&self.dst)
            .filter(|(src, dst)| src != dst)
            .map(|(src, dst)| (*src, *dst))
    }
}

impl FusionEmitter for MemcpyEmitter {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Memcpy
    }

    fn workload(&self) -> Option<Workload> {
        None
    }
}

/// One thread per output element.
#[derive(Debug)]
pub struct LoopEmitter<'a> {
    analysis: &'a FusionAnalysis,
    workgroup_size: u32,
}

impl<'a> LoopEmitter<'a> {
    pub fn new(analysis: &'a FusionAnalysis, config: &SelectorConfig) -> Self {
        Self {
            analysis,
            workgroup_size: config.workgroup_size,
        }
    }
}

impl FusionEmitter for LoopEmitter<'_> {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Loop
    }

    fn workload(&self) -> Option<Workload> {
        let numel = max_numel(self.analysis.root_shapes());
        Some(Workload::for_elements(numel, self.workgroup_size))
    }
}

/// Several slices of one input, emitted as a single pass over that input.
#[derive(Debug)]
pub struct InputSlicesEmitter<'a> {
    analysis: &'a FusionAnalysis,
    workgroup_size: u32,
}

impl<'a> InputSlicesEmitter<'a> {
    pub fn new(analysis: &'a FusionAnalysis, config: &SelectorConfig) -> Self {
        Self {
            analysis,
            workgroup_size: config.workgroup_size,
        }
    }
}

impl FusionEmitter for InputSlicesEmitter<'_> {
    fn kind(&self) -> EmitterKind {
        EmitterKind::InputSlices
    }

    fn workload(&self) -> Option<Workload> {
        let numel = max_numel(self.analysis.hero_input_shapes());
        Some(Workload::for_elements(numel, self.workgroup_size))
    }
}

/// One workgroup per reduced output element.
#[derive(Debug)]
pub struct ReductionEmitter<'a> {
    analysis: &'a FusionAnalysis,
    workgroup_size: u32,
}

impl<'a> ReductionEmitter<'a> {
    pub fn new(analysis: &'a FusionAnalysis, config: &SelectorConfig) -> Self {
        Self {
            analysis,
            workgroup_size: config.workgroup_size,
        }
    }
}

impl FusionEmitter for ReductionEmitter<'_> {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Reduction
    }

    fn workload(&self) -> Option<Workload> {
        let outputs = max_numel(self.analysis.root_shapes());
        Some(Workload::for_groups(outputs, self.workgroup_size))
    }
}

/// Tiled transpose, one workgroup per tile of the two minor dims.
#[derive(Debug)]
pub struct TransposeEmitter<'a> {
    analysis: &'a FusionAnalysis,
}

impl<'a> TransposeEmitter<'a> {
    pub const TILE: usize = 32;

    pub fn new(analysis: &'a FusionAnalysis) -> Self {
        Self { analysis }
    }
}

impl FusionEmitter for TransposeEmitter<'_> {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Transpose
    }

    fn workload(&self) -> Option<Workload> {
        let shape = self
            .analysis
            .hero_input_shapes()
            .iter()
            .max_by_key(|s| s.numel())?;
        let dims = shape.dims();
        let (rows, cols) = match dims.len() {
            0 => (1, 1),
            1 => (1, dims[0]),
            n => (dims[..n - 1].iter().product(), dims[n - 1]),
        };
        let tiles = rows.div_ceil(Self::TILE) * cols.div_ceil(Self::TILE);
        Some(Workload::for_groups(tiles, (Self::TILE * Self::TILE / 4) as u32))
    }
}

/// Select the generic emitter for the analysis' kind. `None` for kinds with
/// no generic builder.
pub fn generic_emitter<'a>(
    analysis: &'a FusionAnalysis,
    config: &SelectorConfig,
) -> Option<Box<dyn FusionEmitter + 'a>> {
    match analysis.emitter_fusion_kind() {
        EmitterFusionKind::Loop => Some(Box::new(LoopEmitter::new(analysis, config))),
        EmitterFusionKind::InputSlices => {
            Some(Box::new(InputSlicesEmitter::new(analysis, config)))
        }
        EmitterFusionKind::Reduction => Some(Box::new(ReductionEmitter::new(analysis, config))),
        EmitterFusionKind::Transpose => Some(Box::new(TransposeEmitter::new(analysis))),
        EmitterFusionKind::Scatter
        | EmitterFusionKind::Triton
        | EmitterFusionKind::CustomFusion => None,
    }
}
