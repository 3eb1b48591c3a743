//! # piston-fusion
//!
//! Picks the code generator ("emitter") for a fused kernel.
//!
//! A fusion can be described in three ways depending on how far compilation
//! has progressed:
//! - [`EarlyFusion`] - before buffers are allocated, analysis only
//! - [`LegacyFusion`] - a buffer-centric fusion op plus its allocation list
//! - [`ModernFusion`] - a fusion instruction plus a [`BufferAssignment`]
//!
//! All three implement [`FusionDescriptor`], and [`select_emitter`] only ever
//! talks to that trait. The two special cases it looks for are in-place
//! dynamic-update-slice fusions and fusions that are a plain memcpy.

mod buffer;
mod fusion;
mod ir;
mod shape;

pub use buffer::*;
pub use fusion::*;
pub use ir::*;
pub use shape::*;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;

pub type RVec<T> = smallvec::SmallVec<[T; 4]>;

#[macro_export]
macro_rules! rvec {
    ($($x:tt)*) => {
        $crate::RVec::from_iter([$($x)*])
    };
}

#[macro_export]
macro_rules! wgs {
    ($x:expr, $y:expr, $z:expr) => {
        $crate::WorkgroupSize::new($x, $y, $z)
    };
}

#[macro_export]
macro_rules! wgc {
    ($x:expr, $y:expr, $z:expr) => {
        $crate::WorkgroupCount::new($x, $y, $z)
    };
}
