//! N-dimensional index space for kernel launches
//!
//! An [`NdRange`] is what the host asks for: a global size, an optional local
//! size and an optional global offset, each with one to three dimensions. It
//! resolves against a device into a [`LaunchGeometry`] that the executor
//! iterates over.
//!
//! For every dimension `d`:
//!
//! ```text
//! global_id[d] = global_offset[d] + group_id[d] * local_size[d] + local_id[d]
//! ```

use super::types::DeviceInfo;
use crate::error::{Result, RuntimeError};
use crate::isa::WorkItemQuery;
use std::fmt;

/// Extent of 1 to 3 dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkSize {
    dims: [usize; 3],
    len: u8,
}

impl WorkSize {
    /// Create from a slice of 1 to 3 extents
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.is_empty() || dims.len() > 3 {
            return Err(RuntimeError::InvalidLaunchConfig(format!(
                "work size needs 1 to 3 dimensions, got {}",
                dims.len()
            )));
        }
        let mut padded = [0; 3];
        padded[..dims.len()].copy_from_slice(dims);
        Ok(Self {
            dims: padded,
            len: dims.len() as u8,
        })
    }

    /// 1D extent
    pub const fn one(x: usize) -> Self {
        Self { dims: [x, 0, 0], len: 1 }
    }

    /// 2D extent
    pub const fn two(x: usize, y: usize) -> Self {
        Self { dims: [x, y, 0], len: 2 }
    }

    /// 3D extent
    pub const fn three(x: usize, y: usize, z: usize) -> Self {
        Self { dims: [x, y, z], len: 3 }
    }

    /// Number of dimensions
    pub const fn work_dim(&self) -> usize {
        self.len as usize
    }

    /// Extents of the used dimensions
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.len as usize]
    }

    /// Extent of dimension `d`, if used
    pub fn get(&self, d: usize) -> Option<usize> {
        self.dims().get(d).copied()
    }

    /// Product of all used extents
    pub fn product(&self) -> usize {
        self.dims().iter().product()
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims().iter().map(ToString::to_string).collect();
        write!(f, "({})", dims.join(", "))
    }
}

/// Requested launch range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub global: WorkSize,
    /// `None` lets the device choose the partitioning
    pub local: Option<WorkSize>,
    /// `None` means no offset
    pub offset: Option<WorkSize>,
}

impl NdRange {
    pub const fn new(global: WorkSize) -> Self {
        Self {
            global,
            local: None,
            offset: None,
        }
    }

    pub const fn with_local(mut self, local: WorkSize) -> Self {
        self.local = Some(local);
        self
    }

    pub const fn with_offset(mut self, offset: WorkSize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Validate against a device and compute the launch geometry
    pub fn resolve(&self, device: &DeviceInfo) -> Result<LaunchGeometry> {
        let work_dim = self.global.work_dim();
        let invalid = |msg: String| Err(RuntimeError::InvalidLaunchConfig(msg));

        for (name, size) in [("local", self.local), ("offset", self.offset)] {
            if let Some(size) = size {
                if size.work_dim() != work_dim {
                    return invalid(format!(
                        "global size has {} dimension(s), {} has {}",
                        work_dim,
                        name,
                        size.work_dim()
                    ));
                }
            }
        }

        if self.global.dims().contains(&0) {
            return invalid(format!("global size {} has a zero dimension", self.global));
        }

        let mut geometry = LaunchGeometry {
            work_dim,
            global: [1; 3],
            local: [1; 3],
            offset: [0; 3],
            groups: [1; 3],
        };

        for d in 0..work_dim {
            let global = self.global.dims[d];
            let offset = self.offset.map_or(0, |o| o.dims[d]);
            if offset.checked_add(global).is_none() {
                return invalid(format!("offset {offset} + global size {global} overflows in dimension {d}"));
            }
            geometry.global[d] = global;
            geometry.offset[d] = offset;
        }

        match self.local {
            Some(local) => {
                for d in 0..work_dim {
                    let (global, local) = (self.global.dims[d], local.dims[d]);
                    if local == 0 {
                        return invalid(format!("local size {} has a zero dimension", self.local_display()));
                    }
                    if local > device.max_work_item_sizes[d] {
                        return invalid(format!(
                            "local size {local} exceeds device maximum {} in dimension {d}",
                            device.max_work_item_sizes[d]
                        ));
                    }
                    if global % local != 0 {
                        return invalid(format!(
                            "local size {local} does not divide global size {global} in dimension {d}"
                        ));
                    }
                    geometry.local[d] = local;
                }
                if local.product() > device.max_work_group_size {
                    return invalid(format!(
                        "work-group size {} exceeds device maximum {}",
                        local.product(),
                        device.max_work_group_size
                    ));
                }
            }
            None => {
                let mut budget = device.max_work_group_size;
                for d in 0..work_dim {
                    let limit = budget.min(device.max_work_item_sizes[d]);
                    let local = largest_divisor_at_most(self.global.dims[d], limit);
                    geometry.local[d] = local;
                    budget /= local;
                }
            }
        }

        for d in 0..3 {
            geometry.groups[d] = geometry.global[d] / geometry.local[d];
        }

        Ok(geometry)
    }

    fn local_display(&self) -> String {
        self.local.map_or_else(|| "(auto)".to_string(), |l| l.to_string())
    }
}

impl fmt::Display for NdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global={} local={}", self.global, self.local_display())?;
        if let Some(offset) = self.offset {
            write!(f, " offset={offset}")?;
        }
        Ok(())
    }
}

fn largest_divisor_at_most(n: usize, limit: usize) -> usize {
    (1..=limit.min(n).max(1)).rev().find(|d| n % d == 0).unwrap_or(1)
}

// ================================================================================================
// Launch Geometry
// ================================================================================================

/// Resolved launch: every dimension padded to 3 (unused dims are 1 wide)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchGeometry {
    pub work_dim: usize,
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub offset: [usize; 3],
    pub groups: [usize; 3],
}

impl LaunchGeometry {
    /// Work-items per work-group
    pub fn group_size(&self) -> usize {
        self.local.iter().product()
    }

    /// Number of work-groups
    pub fn total_groups(&self) -> usize {
        self.groups.iter().product()
    }

    /// Number of work-items
    pub fn total_work_items(&self) -> usize {
        self.global.iter().product()
    }

    /// Group coordinates of a linear group index (dimension 0 fastest)
    pub fn group_coords(&self, linear: usize) -> [usize; 3] {
        unflatten(linear, self.groups)
    }

    /// Local coordinates of a linear index within a group (dimension 0 fastest)
    pub fn local_coords(&self, linear: usize) -> [usize; 3] {
        unflatten(linear, self.local)
    }

    /// Global id of a work-item
    pub fn global_id(&self, group: [usize; 3], local: [usize; 3]) -> [usize; 3] {
        std::array::from_fn(|d| self.offset[d] + group[d] * self.local[d] + local[d])
    }

    /// Evaluate a work-item query
    ///
    /// Dimensions at or beyond `work_dim` read as 0 for ids and offsets and 1
    /// for sizes. Out-of-range dimensions read the same way.
    pub fn query(&self, query: WorkItemQuery, dim: u8, group: [usize; 3], local: [usize; 3]) -> u64 {
        let d = dim as usize;
        if query == WorkItemQuery::WorkDim {
            return self.work_dim as u64;
        }
        if d >= 3 {
            return match query {
                WorkItemQuery::GlobalSize | WorkItemQuery::LocalSize | WorkItemQuery::NumGroups => 1,
                _ => 0,
            };
        }
        let value = match query {
            WorkItemQuery::GlobalId => self.offset[d] + group[d] * self.local[d] + local[d],
            WorkItemQuery::LocalId => local[d],
            WorkItemQuery::GlobalSize => self.global[d],
            WorkItemQuery::LocalSize => self.local[d],
            WorkItemQuery::GroupId => group[d],
            WorkItemQuery::NumGroups => self.groups[d],
            WorkItemQuery::GlobalOffset => self.offset[d],
            WorkItemQuery::WorkDim => self.work_dim,
        };
        value as u64
    }
}

impl fmt::Display for LaunchGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.work_dim;
        write!(
            f,
            "global={:?} local={:?} offset={:?} groups={:?}",
            &self.global[..n],
            &self.local[..n],
            &self.offset[..n],
            &self.groups[..n]
        )
    }
}

fn unflatten(linear: usize, extent: [usize; 3]) -> [usize; 3] {
    let x = linear % extent[0];
    let y = (linear / extent[0]) % extent[1];
    let z = linear / (extent[0] * extent[1]);
    [x, y, z]
}
