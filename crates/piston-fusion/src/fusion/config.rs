use serde::{Deserialize, Serialize};

/// Knobs for [`select_emitter_with_config`](super::select_emitter_with_config).
///
/// With `enable_in_place_dus` off, DUS fusions are emitted out of place by
/// the copy or generic path. The copy probe always runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Threads per workgroup for emitters that launch a kernel.
    pub workgroup_size: u32,
    pub enable_in_place_dus: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            workgroup_size: 256,
            enable_in_place_dus: true,
        }
    }
}
