//! Instruction opcodes and their fusion pattern classification.

use super::Computation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementwiseOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Neg,
    Exp,
    Log,
    Tanh,
    Convert,
    Select,
}

#[derive(Debug, Clone)]
pub enum Opcode {
    /// Parameter `n` of the enclosing computation.
    Parameter(usize),
    Constant,
    Copy,
    Bitcast,
    Tuple,
    GetTupleElement(usize),
    Elementwise(ElementwiseOp),
    Broadcast,
    Slice,
    /// Operands: `[buffer, index...]`.
    DynamicSlice,
    /// Operands: `[buffer, update, index...]`.
    DynamicUpdateSlice,
    Reduce,
    Transpose,
    Scatter,
    Fusion(Box<Computation>),
}

/// Classification of operations for fusion analysis.
///
/// Higher values are more "dominant": a reduction anywhere in a chain decides
/// how the whole fusion is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OpPattern {
    /// 1:1 input-output mapping with the same shape.
    Elemwise = 0,
    /// 1:1 mapping, shapes may differ (bitcast, broadcast, slice, transpose).
    Injective = 1,
    /// N:1 mapping.
    Reduce = 2,
    /// Irregular access or side effects.
    Opaque = 3,
}

impl Opcode {
    pub fn pattern(&self) -> OpPattern {
        match self {
            Opcode::Elementwise(_) | Opcode::Copy => OpPattern::Elemwise,

            Opcode::Bitcast
            | Opcode::Broadcast
            | Opcode::Slice
            | Opcode::Transpose
            | Opcode::Tuple
            | Opcode::GetTupleElement(_)
            | Opcode::DynamicSlice
            | Opcode::DynamicUpdateSlice => OpPattern::Injective,

            Opcode::Reduce => OpPattern::Reduce,

            Opcode::Parameter(_) | Opcode::Constant | Opcode::Scatter | Opcode::Fusion(_) => {
                OpPattern::Opaque
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Parameter(_) => "parameter",
            Opcode::Constant => "constant",
            Opcode::Copy => "copy",
            Opcode::Bitcast => "bitcast",
            Opcode::Tuple => "tuple",
            Opcode::GetTupleElement(_) => "get-tuple-element",
            Opcode::Elementwise(_) => "elementwise",
            Opcode::Broadcast => "broadcast",
            Opcode::Slice => "slice",
            Opcode::DynamicSlice => "dynamic-slice",
            Opcode::DynamicUpdateSlice => "dynamic-update-slice",
            Opcode::Reduce => "reduce",
            Opcode::Transpose => "transpose",
            Opcode::Scatter => "scatter",
            Opcode::Fusion(_) => "fusion",
        }
    }

    pub fn is_elementwise(&self) -> bool {
        matches!(self, Opcode::Elementwise(_) | Opcode::Copy)
    }

    pub fn parameter_number(&self) -> Option<usize> {
        match self {
            Opcode::Parameter(n) => Some(*n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_ordering() {
        assert!(OpPattern::Elemwise < OpPattern::Injective);
        assert!(OpPattern::Injective < OpPattern::Reduce);
        assert!(OpPattern::Reduce < OpPattern::Opaque);
    }

    #[test]
    fn test_pattern_classes() {
        assert_eq!(Opcode::Copy.pattern(), OpPattern::Elemwise);
        assert_eq!(Opcode::Bitcast.pattern(), OpPattern::Injective);
        assert_eq!(Opcode::Reduce.pattern(), OpPattern::Reduce);
        assert_eq!(Opcode::Scatter.pattern(), OpPattern::Opaque);
    }
}
