//! Launch geometry for compute kernels.
//!
//! Callers describe a launch the way generated kernel code thinks about it: a
//! number of threadgroups per dimension plus the shape of one threadgroup. The
//! device is driven in absolute thread counts, see [`LaunchConfig::total_threads`].

use crate::MetalError;

/// Number of threadgroups per dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridSize {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    pub const fn d1(width: usize) -> Self {
        Self::new(width, 1, 1)
    }

    pub const fn d2(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }
}

/// Threads per threadgroup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ThreadgroupSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl ThreadgroupSize {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self { width, height, depth }
    }

    pub const fn d1(width: usize) -> Self {
        Self::new(width, 1, 1)
    }

    pub const fn d2(width: usize, height: usize) -> Self {
        Self::new(width, height, 1)
    }

    /// Threads in one group, `None` on overflow.
    pub fn thread_count(&self) -> Option<usize> {
        self.width.checked_mul(self.height)?.checked_mul(self.depth)
    }
}

/// Absolute thread extent handed to the device (`grid * group` per dimension).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ThreadExtent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

/// Grid and group shape for a single dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LaunchConfig {
    pub grid: GridSize,
    pub group: ThreadgroupSize,
}

impl LaunchConfig {
    pub const fn new(grid: GridSize, group: ThreadgroupSize) -> Self {
        Self { grid, group }
    }

    /// Build from the flat six-integer form used by generated code.
    pub const fn from_dims(grid_x: usize, grid_y: usize, grid_z: usize, block_x: usize, block_y: usize, block_z: usize) -> Self {
        Self {
            grid: GridSize::new(grid_x, grid_y, grid_z),
            group: ThreadgroupSize::new(block_x, block_y, block_z),
        }
    }

    pub const fn d1(groups: usize, threads_per_group: usize) -> Self {
        Self {
            grid: GridSize::d1(groups),
            group: ThreadgroupSize::d1(threads_per_group),
        }
    }

    /// Total threads per dimension.
    ///
    /// Fails with [`MetalError::InvalidLaunch`] when a product overflows `usize`.
    pub fn total_threads(&self) -> Result<ThreadExtent, MetalError> {
        let dim = |groups: usize, threads: usize, axis: &str| {
            groups
                .checked_mul(threads)
                .ok_or_else(|| MetalError::InvalidLaunch(format!("{axis} extent {groups} x {threads} overflows")))
        };
        Ok(ThreadExtent {
            width: dim(self.grid.width, self.group.width, "x")?,
            height: dim(self.grid.height, self.group.height, "y")?,
            depth: dim(self.grid.depth, self.group.depth, "z")?,
        })
    }
}

#[path = "dispatch.test.rs"]
mod tests;
