//! # Fusion emitter selection
//!
//! - [`FusionAnalysis`] - what a fusion computes, independent of buffers
//! - [`FusionDescriptor`] - a fusion in one of its three representations
//! - [`FusionEmitter`] - the code generator chosen for it
//!
//! ## Selection order
//!
//! 1. **In-place DUS**: a DUS fusion whose updated buffer is also its output
//! 2. **Memcpy**: every root is a same-layout copy of a parameter
//! 3. **Generic**: by [`EmitterFusionKind`], or nothing if the kind is unsupported

mod analysis;
mod config;
mod descriptor;
mod emitter;
mod probes;
mod select;
mod workload;

pub use analysis::*;
pub use config::*;
pub use descriptor::*;
pub use emitter::*;
pub use probes::CopyFusionError;
pub use select::*;
pub use workload::*;
