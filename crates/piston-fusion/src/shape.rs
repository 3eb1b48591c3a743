use crate::RVec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F16,
    F32,
    I32,
    U32,
    Pred,
}

impl DType {
    pub fn size_of(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::Pred => 1,
        }
    }
}

/// Path to a subshape of a (possibly nested) tuple shape.
///
/// The empty index addresses the shape itself.
pub type ShapeIndex = RVec<usize>;

/// Shape of an instruction result.
///
/// Arrays carry a layout in minor-to-major order. Two arrays with equal dims
/// but different layouts are not interchangeable byte for byte.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Array {
        dtype: DType,
        dims: RVec<usize>,
        layout: RVec<usize>,
    },
    Tuple(Vec<Shape>),
}

impl Shape {
    /// Array with the default (row-major) layout.
    pub fn array(dtype: DType, dims: &[usize]) -> Self {
        let layout = (0..dims.len()).rev().collect();
        Shape::Array {
            dtype,
            dims: dims.iter().copied().collect(),
            layout,
        }
    }

    pub fn array_with_layout(dtype: DType, dims: &[usize], layout: &[usize]) -> Self {
        debug_assert_eq!(
            dims.len(),
            layout.len(),
            "layout rank must match the number of dims"
        );
        Shape::Array {
            dtype,
            dims: dims.iter().copied().collect(),
            layout: layout.iter().copied().collect(),
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::array(dtype, &[])
    }

    pub fn tuple(elements: impl IntoIterator<Item = Shape>) -> Self {
        Shape::Tuple(elements.into_iter().collect())
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Shape::Array { .. })
    }

    pub fn dims(&self) -> &[usize] {
        match self {
            Shape::Array { dims, .. } => dims,
            Shape::Tuple(_) => &[],
        }
    }

    /// Number of elements. Tuples sum their leaves. Saturates at `usize::MAX`.
    pub fn numel(&self) -> usize {
        match self {
            Shape::Array { dims, .. } => dims
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .unwrap_or(usize::MAX),
            Shape::Tuple(elements) => elements
                .iter()
                .fold(0usize, |acc, e| acc.saturating_add(e.numel())),
        }
    }

    /// Saturates at `u64::MAX`, which no allocation can hold.
    pub fn byte_size(&self) -> u64 {
        match self {
            Shape::Array { dtype, dims, .. } => dims
                .iter()
                .try_fold(dtype.size_of() as u64, |acc, &d| acc.checked_mul(d as u64))
                .unwrap_or(u64::MAX),
            Shape::Tuple(elements) => elements
                .iter()
                .fold(0u64, |acc, e| acc.saturating_add(e.byte_size())),
        }
    }

    /// True for arrays holding exactly one element, whatever their rank.
    pub fn is_effective_scalar(&self) -> bool {
        self.is_array() && self.numel() == 1
    }

    /// Dims equality that ignores element type and layout.
    pub fn same_dims(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array { dims: a, .. }, Shape::Array { dims: b, .. }) => a == b,
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_dims(b))
            }
            _ => false,
        }
    }

    pub fn same_layout(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Array { layout: a, .. }, Shape::Array { layout: b, .. }) => a == b,
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_layout(b))
            }
            _ => false,
        }
    }

    /// Array leaves in pre-order, paired with their index.
    pub fn array_leaves(&self) -> Vec<(ShapeIndex, &Shape)> {
        let mut leaves = Vec::new();
        let mut index = ShapeIndex::new();
        self.collect_leaves(&mut index, &mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, index: &mut ShapeIndex, out: &mut Vec<(ShapeIndex, &'a Shape)>) {
        match self {
            Shape::Array { .. } => out.push((index.clone(), self)),
            Shape::Tuple(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    index.push(i);
                    element.collect_leaves(index, out);
                    index.pop();
                }
            }
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Array {
                dtype,
                dims,
                layout,
            } => write!(f, "{:?}{:?}{{{:?}}}", dtype, dims.as_slice(), layout.as_slice()),
            Shape::Tuple(elements) => f.debug_tuple("").field(elements).finish(),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rvec;

    #[test]
    fn test_array_leaves_preorder() {
        let a = Shape::array(DType::F32, &[2, 3]);
        let b = Shape::array(DType::I32, &[4]);
        let c = Shape::scalar(DType::F16);
        let shape = Shape::tuple([a.clone(), Shape::tuple([b.clone(), c.clone()])]);

        let leaves = shape.array_leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0], (rvec![0], &a));
        assert_eq!(leaves[1], (rvec![1, 0], &b));
        assert_eq!(leaves[2], (rvec![1, 1], &c));
    }

    #[test]
    fn test_effective_scalar() {
        assert!(Shape::array(DType::F32, &[1, 1, 1]).is_effective_scalar());
        assert!(Shape::scalar(DType::F32).is_effective_scalar());
        assert!(!Shape::array(DType::F32, &[1, 2]).is_effective_scalar());
        assert!(!Shape::tuple([Shape::scalar(DType::F32)]).is_effective_scalar());
    }

    #[test]
    fn test_same_dims_ignores_dtype_and_layout() {
        let a = Shape::array(DType::F32, &[4, 8]);
        let b = Shape::array_with_layout(DType::F16, &[4, 8], &[0, 1]);
        assert!(a.same_dims(&b));
        assert!(!a.same_layout(&b));
        assert_eq!(a.byte_size(), 128);
        assert_eq!(b.byte_size(), 64);
    }

    #[test]
    fn test_huge_shapes_saturate() {
        let huge = Shape::array(DType::F32, &[usize::MAX, 2]);
        assert_eq!(huge.numel(), usize::MAX);
        assert_eq!(huge.byte_size(), u64::MAX);
        let pair = Shape::tuple([huge.clone(), huge]);
        assert_eq!(pair.byte_size(), u64::MAX);
    }
}
