//! Dispatch sizes for emitted kernels.

use crate::{wgc, wgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupSize {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn product(&self) -> u32 {
        self.x * self.y * self.z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupCount {
    pub const MAX_WGS_PER_DIM: usize = 65535;

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn div_ceil(num: usize, div: usize) -> usize {
        num.div_ceil(div)
    }

    /// Lay out `groups` workgroups, spilling into y once x is full.
    pub fn spread(groups: usize) -> Self {
        let groups = groups.max(1);
        if groups > Self::MAX_WGS_PER_DIM {
            let y_groups = Self::div_ceil(groups, Self::MAX_WGS_PER_DIM);
            wgc![Self::MAX_WGS_PER_DIM as _, y_groups as _, 1]
        } else {
            wgc![groups as _, 1, 1]
        }
    }

    pub fn total(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

/// Workgroup size and count of a single kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Workload {
    pub workgroup_size: WorkgroupSize,
    pub workgroup_count: WorkgroupCount,
}

impl Workload {
    /// One thread per element.
    pub fn for_elements(numel: usize, workgroup_size: u32) -> Self {
        let workgroup_size = wgs![workgroup_size.max(1), 1, 1];
        let groups = WorkgroupCount::div_ceil(numel, workgroup_size.product() as _);
        Self {
            workgroup_size,
            workgroup_count: WorkgroupCount::spread(groups),
        }
    }

    /// One workgroup per `groups`.
    pub fn for_groups(groups: usize, workgroup_size: u32) -> Self {
        Self {
            workgroup_size: wgs![workgroup_size.max(1), 1, 1],
            workgroup_count: WorkgroupCount::spread(groups),
        }
    }

    pub fn threads(&self) -> u64 {
        self.workgroup_count.total() * self.workgroup_size.product() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_elements_covers_every_element() {
        let w = Workload::for_elements(1000, 256);
        assert_eq!(w.workgroup_count, wgc![4, 1, 1]);
        assert!(w.threads() >= 1000);
    }

    #[test]
    fn test_spread_spills_into_y() {
        let groups = WorkgroupCount::MAX_WGS_PER_DIM * 3 + 1;
        let count = WorkgroupCount::spread(groups);
        assert_eq!(count.x as usize, WorkgroupCount::MAX_WGS_PER_DIM);
        assert_eq!(count.y, 4);
        assert!(count.total() as usize >= groups);
    }

    #[test]
    fn test_empty_launch_still_dispatches() {
        let w = Workload::for_elements(0, 64);
        assert_eq!(w.workgroup_count, wgc![1, 1, 1]);
    }
}
