//! Static facts about a fused computation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Computation, ComputationError, InstructionId, OpPattern, Opcode, RVec, Shape};

/// How the fusion was requested to be emitted, before any analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionBackendConfig {
    #[default]
    Default,
    Triton,
    /// A hand-written kernel registered under `name`.
    Custom(String),
}

/// Emission strategy implied by the shape of a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmitterFusionKind {
    Loop,
    InputSlices,
    Reduction,
    Transpose,
    Scatter,
    Triton,
    CustomFusion,
}

impl EmitterFusionKind {
    /// Whether the generic path has a builder for this kind.
    pub fn has_generic_emitter(self) -> bool {
        matches!(
            self,
            EmitterFusionKind::Loop
                | EmitterFusionKind::InputSlices
                | EmitterFusionKind::Reduction
                | EmitterFusionKind::Transpose
        )
    }
}

impl fmt::Display for EmitterFusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmitterFusionKind::Loop => "loop",
            EmitterFusionKind::InputSlices => "input-slices",
            EmitterFusionKind::Reduction => "reduction",
            EmitterFusionKind::Transpose => "transpose",
            EmitterFusionKind::Scatter => "scatter",
            EmitterFusionKind::Triton => "triton",
            EmitterFusionKind::CustomFusion => "custom",
        };
        f.write_str(name)
    }
}

/// Everything the selector and the emitters need to know about a fusion that
/// does not depend on buffer assignment.
///
/// Roots and heroes are ids into the fused computation the analysis was built
/// from; they are meaningless for any other computation.
#[derive(Debug, Clone)]
pub struct FusionAnalysis {
    name: String,
    kind: EmitterFusionKind,
    roots: RVec<InstructionId>,
    heroes: RVec<InstructionId>,
    root_shapes: RVec<Shape>,
    /// Shape each hero reads: operand 0 of reductions, transposes and slices.
    hero_input_shapes: RVec<Shape>,
    /// Update shapes of the DUS behind each root. Empty unless every root is one.
    update_shapes: RVec<Shape>,
}

impl FusionAnalysis {
    pub fn new(
        fused: &Computation,
        backend_config: FusionBackendConfig,
    ) -> Result<Self, ComputationError> {
        let root = fused
            .root()
            .ok_or_else(|| ComputationError::MissingRoot(fused.name().to_string()))?;

        let roots: RVec<_> = match fused[root].opcode {
            Opcode::Tuple => fused[root].operands.clone(),
            _ => crate::rvec![root],
        };
        let heroes: RVec<_> = roots.iter().map(|&r| find_hero(fused, r)).collect();
        let root_shapes = roots.iter().map(|&r| fused[r].shape.clone()).collect();
        let hero_input_shapes = heroes
            .iter()
            .map(|&h| {
                fused
                    .operand(h, 0)
                    .map_or_else(|| fused[h].shape.clone(), |o| o.shape.clone())
            })
            .collect();

        let kind = classify(fused, &backend_config, &roots, &heroes);

        let dus: Option<RVec<_>> = roots
            .iter()
            .map(|&r| output_defining_dynamic_update_slice(fused, r))
            .collect();
        let update_shapes = match (kind, dus) {
            (EmitterFusionKind::Loop, Some(dus)) => dus
                .iter()
                .filter_map(|&d| fused.operand(d, 1).map(|u| u.shape.clone()))
                .collect(),
            _ => RVec::new(),
        };

        Ok(Self {
            name: fused.name().to_string(),
            kind,
            roots,
            heroes,
            root_shapes,
            hero_input_shapes,
            update_shapes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn emitter_fusion_kind(&self) -> EmitterFusionKind {
        self.kind
    }

    pub fn fusion_roots(&self) -> &[InstructionId] {
        &self.roots
    }

    pub fn fusion_heroes(&self) -> &[InstructionId] {
        &self.heroes
    }

    pub fn root_shapes(&self) -> &[Shape] {
        &self.root_shapes
    }

    pub fn hero_input_shapes(&self) -> &[Shape] {
        &self.hero_input_shapes
    }

    pub fn update_shapes(&self) -> &[Shape] {
        &self.update_shapes
    }

    /// A loop fusion whose every root is a dynamic-update-slice, possibly
    /// behind a bitcast.
    pub fn is_dynamic_update_slice_fusion(&self) -> bool {
        !self.update_shapes.is_empty() && self.update_shapes.len() == self.roots.len()
    }
}

/// The DUS that defines the value of `root`, looking through one bitcast.
pub(crate) fn output_defining_dynamic_update_slice(
    fused: &Computation,
    root: InstructionId,
) -> Option<InstructionId> {
    match fused[root].opcode {
        Opcode::DynamicUpdateSlice => Some(root),
        Opcode::Bitcast => {
            let operand = fused.operand(root, 0)?;
            matches!(operand.opcode, Opcode::DynamicUpdateSlice).then_some(operand.id)
        }
        _ => None,
    }
}

/// Walk back from `root` through cheap single-use ops to the instruction that
/// decides how the fusion is emitted.
fn find_hero(fused: &Computation, root: InstructionId) -> InstructionId {
    let mut current = root;
    loop {
        let instr = &fused[current];
        if instr.opcode.pattern() == OpPattern::Reduce || matches!(instr.opcode, Opcode::Transpose)
        {
            return current;
        }
        if !(instr.opcode.is_elementwise() || matches!(instr.opcode, Opcode::Bitcast)) {
            return root;
        }
        let mut candidates = instr.operands.iter().copied().filter(|&operand| {
            fused.users(operand).len() == 1
                && !matches!(
                    fused[operand].opcode,
                    Opcode::Parameter(_) | Opcode::Constant
                )
        });
        match (candidates.next(), candidates.next()) {
            (Some(next), None) => current = next,
            _ => return root,
        }
    }
}

fn classify(
    fused: &Computation,
    backend_config: &FusionBackendConfig,
    roots: &[InstructionId],
    heroes: &[InstructionId],
) -> EmitterFusionKind {
    match backend_config {
        FusionBackendConfig::Custom(_) => return EmitterFusionKind::CustomFusion,
        FusionBackendConfig::Triton => return EmitterFusionKind::Triton,
        FusionBackendConfig::Default => {}
    }

    let hero_is = |pred: fn(&Opcode) -> bool| heroes.iter().any(|&h| pred(&fused[h].opcode));
    if hero_is(|op| op.pattern() == OpPattern::Reduce) {
        return EmitterFusionKind::Reduction;
    }
    if hero_is(|op| matches!(op, Opcode::Transpose)) {
        return EmitterFusionKind::Transpose;
    }
    if roots
        .iter()
        .any(|&r| matches!(fused[r].opcode, Opcode::Scatter))
    {
        return EmitterFusionKind::Scatter;
    }
    if roots.len() > 1
        && roots
            .iter()
            .all(|&r| matches!(fused[r].opcode, Opcode::Slice))
    {
        return EmitterFusionKind::InputSlices;
    }
    EmitterFusionKind::Loop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, ElementwiseOp};

    fn f32(dims: &[usize]) -> Shape {
        Shape::array(DType::F32, dims)
    }

    #[test]
    fn test_reduction_hero_behind_elementwise() -> anyhow::Result<()> {
        let mut c = Computation::new("reduce_exp");
        let p0 = c.add_parameter(0, f32(&[8, 128]))?;
        let init = c.add_instruction(Opcode::Constant, Shape::scalar(DType::F32), &[])?;
        let reduce = c.add_instruction(Opcode::Reduce, f32(&[8]), &[p0, init])?;
        let exp = c.add_instruction(Opcode::Elementwise(ElementwiseOp::Exp), f32(&[8]), &[reduce])?;

        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert_eq!(analysis.fusion_roots(), &[exp]);
        assert_eq!(analysis.fusion_heroes(), &[reduce]);
        assert_eq!(analysis.emitter_fusion_kind(), EmitterFusionKind::Reduction);
        assert_eq!(analysis.hero_input_shapes(), &[f32(&[8, 128])]);
        assert!(!analysis.is_dynamic_update_slice_fusion());
        Ok(())
    }

    #[test]
    fn test_dus_behind_bitcast_in_tuple() -> anyhow::Result<()> {
        let mut c = Computation::new("dus");
        let p0 = c.add_parameter(0, f32(&[16, 16]))?;
        let p1 = c.add_parameter(1, f32(&[4, 16]))?;
        let i = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, i, i])?;
        let bitcast = c.add_instruction(Opcode::Bitcast, f32(&[256]), &[dus])?;
        let dus2 = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16, 16]), &[p0, p1, i, i])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[256]), f32(&[16, 16])]), &[bitcast, dus2])?;

        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert_eq!(analysis.emitter_fusion_kind(), EmitterFusionKind::Loop);
        assert!(analysis.is_dynamic_update_slice_fusion());
        assert_eq!(analysis.update_shapes(), &[f32(&[4, 16]), f32(&[4, 16])]);
        Ok(())
    }

    #[test]
    fn test_mixed_roots_are_not_dus() -> anyhow::Result<()> {
        let mut c = Computation::new("mixed");
        let p0 = c.add_parameter(0, f32(&[16]))?;
        let p1 = c.add_parameter(1, f32(&[4]))?;
        let i = c.add_parameter(2, Shape::scalar(DType::I32))?;
        let dus = c.add_instruction(Opcode::DynamicUpdateSlice, f32(&[16]), &[p0, p1, i])?;
        let neg = c.add_instruction(Opcode::Elementwise(ElementwiseOp::Neg), f32(&[16]), &[p0])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[16]), f32(&[16])]), &[dus, neg])?;

        let analysis = FusionAnalysis::new(&c, FusionBackendConfig::Default)?;
        assert_eq!(analysis.emitter_fusion_kind(), EmitterFusionKind::Loop);
        assert!(!analysis.is_dynamic_update_slice_fusion());
        Ok(())
    }

    #[test]
    fn test_classification() -> anyhow::Result<()> {
        let mut c = Computation::new("slices");
        let p0 = c.add_parameter(0, f32(&[32]))?;
        let s0 = c.add_instruction(Opcode::Slice, f32(&[16]), &[p0])?;
        let s1 = c.add_instruction(Opcode::Slice, f32(&[16]), &[p0])?;
        c.add_instruction(Opcode::Tuple, Shape::tuple([f32(&[16]), f32(&[16])]), &[s0, s1])?;

        let kind = |config| -> anyhow::Result<EmitterFusionKind> {
            Ok(FusionAnalysis::new(&c, config)?.emitter_fusion_kind())
        };
        assert_eq!(kind(FusionBackendConfig::Default)?, EmitterFusionKind::InputSlices);
        assert_eq!(kind(FusionBackendConfig::Triton)?, EmitterFusionKind::Triton);
        assert_eq!(
            kind(FusionBackendConfig::Custom("gemm".into()))?,
            EmitterFusionKind::CustomFusion
        );

        let mut t = Computation::new("transpose");
        let p0 = t.add_parameter(0, f32(&[32, 64]))?;
        let tr = t.add_instruction(Opcode::Transpose, f32(&[64, 32]), &[p0])?;
        t.add_instruction(Opcode::Elementwise(ElementwiseOp::Neg), f32(&[64, 32]), &[tr])?;
        let analysis = FusionAnalysis::new(&t, FusionBackendConfig::Default)?;
        assert_eq!(analysis.emitter_fusion_kind(), EmitterFusionKind::Transpose);
        assert_eq!(analysis.fusion_heroes(), &[tr]);
        Ok(())
    }

    #[test]
    fn test_missing_root() {
        let c = Computation::new("empty");
        assert!(matches!(
            FusionAnalysis::new(&c, FusionBackendConfig::Default),
            Err(ComputationError::MissingRoot(_))
        ));
    }
}
