//! Index Model
//!
//! Expected output of the two-dimensional vector-combine kernel:
//!
//! ```text
//! i           = global_id[0] * global_size[1] + global_id[1]
//! expected[i] = a[i] + b[i] + local_id[0] * local_size[1] + local_id[1]
//! a[i]        = 2i - 1
//! b[i]        = -i
//! ```
//!
//! The `local_id` terms make the result depend on the work-group
//! partitioning; [`partition_delta`] gives the exact difference between two
//! partitionings of the same global range.

use crate::error::{ConformanceError, Result};

/// First input generator
pub fn input_a(i: usize) -> i32 {
    (2 * i as i64 - 1) as i32
}

/// Second input generator
pub fn input_b(i: usize) -> i32 {
    (-(i as i64)) as i32
}

/// Host copy of the first input buffer
pub fn inputs_a(len: usize) -> Vec<i32> {
    (0..len).map(input_a).collect()
}

/// Host copy of the second input buffer
pub fn inputs_b(len: usize) -> Vec<i32> {
    (0..len).map(input_b).collect()
}

/// Position of one work-item in a two-dimensional launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItemCoordinate {
    pub global_id: [usize; 2],
    pub local_id: [usize; 2],
    pub group_id: [usize; 2],
}

/// Two-dimensional launch: global size, local size, global offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpace {
    pub global: [usize; 2],
    pub local: [usize; 2],
    pub offset: [usize; 2],
}

impl IndexSpace {
    pub fn new(global: [usize; 2], local: [usize; 2]) -> Self {
        Self {
            global,
            local,
            offset: [0, 0],
        }
    }

    pub fn with_offset(mut self, offset: [usize; 2]) -> Self {
        self.offset = offset;
        self
    }

    /// Check that the partitioning is well formed and every flattened index
    /// lands inside a buffer of `buffer_len` elements
    pub fn validate(&self, buffer_len: usize) -> Result<()> {
        for d in 0..2 {
            if self.global[d] == 0 || self.local[d] == 0 {
                return Err(ConformanceError::InvalidRange(format!(
                    "dimension {d} has a zero size (global {}, local {})",
                    self.global[d], self.local[d]
                )));
            }
            if self.global[d] % self.local[d] != 0 {
                return Err(ConformanceError::InvalidRange(format!(
                    "local size {} does not divide global size {} in dimension {d}",
                    self.local[d], self.global[d]
                )));
            }
        }

        let max_index = self
            .max_flat_index()
            .ok_or_else(|| ConformanceError::InvalidRange("flattened index overflows".to_string()))?;
        if max_index >= buffer_len {
            return Err(ConformanceError::InvalidRange(format!(
                "flattened index reaches {max_index}, buffer holds {buffer_len} elements"
            )));
        }
        Ok(())
    }

    fn max_flat_index(&self) -> Option<usize> {
        let last0 = self.offset[0].checked_add(self.global[0] - 1)?;
        let last1 = self.offset[1].checked_add(self.global[1] - 1)?;
        last0.checked_mul(self.global[1])?.checked_add(last1)
    }

    /// Every work-item, dimension 1 fastest
    pub fn coordinates(&self) -> impl Iterator<Item = WorkItemCoordinate> + '_ {
        (0..self.global[0]).flat_map(move |x| {
            (0..self.global[1]).map(move |y| {
                let rel = [x, y];
                WorkItemCoordinate {
                    global_id: [self.offset[0] + x, self.offset[1] + y],
                    local_id: [rel[0] % self.local[0], rel[1] % self.local[1]],
                    group_id: [rel[0] / self.local[0], rel[1] / self.local[1]],
                }
            })
        })
    }

    /// Flattened buffer index written by a work-item
    pub fn flat_index(&self, coord: &WorkItemCoordinate) -> usize {
        coord.global_id[0] * self.global[1] + coord.global_id[1]
    }

    /// Value the kernel writes for a work-item, with `int` wrap-around
    pub fn expected_value(&self, coord: &WorkItemCoordinate) -> i32 {
        let i = self.flat_index(coord);
        let local_term = (coord.local_id[0] * self.local[1] + coord.local_id[1]) as i64;
        (input_a(i) as i64 + input_b(i) as i64 + local_term) as i32
    }

    /// Whole output buffer after one dispatch into a zeroed buffer
    pub fn expected_buffer(&self, buffer_len: usize) -> Result<Vec<i32>> {
        self.validate(buffer_len)?;
        let mut out = vec![0; buffer_len];
        for coord in self.coordinates() {
            out[self.flat_index(&coord)] = self.expected_value(&coord);
        }
        Ok(out)
    }
}

/// `reference - alternate` per element, for two partitionings of one range
///
/// The alternate dispatch is correct exactly when
/// `alternate[i] == reference[i] - delta[i]` for every `i`.
pub fn partition_delta(reference: &IndexSpace, alternate: &IndexSpace, buffer_len: usize) -> Result<Vec<i32>> {
    if reference.global != alternate.global || reference.offset != alternate.offset {
        return Err(ConformanceError::InvalidRange(
            "partitionings cover different global ranges".to_string(),
        ));
    }
    let reference = reference.expected_buffer(buffer_len)?;
    let alternate = alternate.expected_buffer(buffer_len)?;
    Ok(reference
        .iter()
        .zip(&alternate)
        .map(|(r, a)| r.wrapping_sub(*a))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs() {
        assert_eq!(input_a(0), -1);
        assert_eq!(input_a(5), 9);
        assert_eq!(input_b(5), -5);
        assert_eq!(inputs_a(3), vec![-1, 1, 3]);
    }

    #[test]
    fn test_reference_values() {
        let space = IndexSpace::new([16, 64], [4, 8]);
        let out = space.expected_buffer(1024).unwrap();
        for (i, value) in out.iter().enumerate() {
            let (g0, g1) = (i / 64, i % 64);
            let expected = (i as i32 - 1) + ((g0 % 4) * 8 + g1 % 8) as i32;
            assert_eq!(*value, expected, "index {i}");
        }
    }

    #[test]
    fn test_partition_delta_is_sixteen_on_odd_blocks() {
        let reference = IndexSpace::new([16, 64], [4, 8]);
        let alternate = IndexSpace::new([16, 64], [2, 8]);
        let delta = partition_delta(&reference, &alternate, 1024).unwrap();
        for (i, d) in delta.iter().enumerate() {
            let expected = if (i / 128) % 2 == 1 { 16 } else { 0 };
            assert_eq!(*d, expected, "index {i}");
        }
    }

    #[test]
    fn test_coordinates_follow_offset() {
        let space = IndexSpace::new([2, 4], [1, 2]).with_offset([1, 0]);
        let coords: Vec<_> = space.coordinates().collect();
        assert_eq!(coords.len(), 8);
        assert_eq!(coords[0].global_id, [1, 0]);
        assert_eq!(coords[3].local_id, [0, 1]);
        assert_eq!(coords[3].group_id, [0, 1]);
        assert_eq!(space.flat_index(&coords[7]), 2 * 4 + 3);
        assert!(space.expected_buffer(12).is_ok());
        assert!(space.expected_buffer(11).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(IndexSpace::new([16, 64], [3, 8]).validate(1024).is_err());
        assert!(IndexSpace::new([16, 64], [4, 8]).validate(1023).is_err());
        assert!(IndexSpace::new([0, 64], [1, 8]).validate(1024).is_err());
        assert!(partition_delta(
            &IndexSpace::new([16, 64], [4, 8]),
            &IndexSpace::new([8, 64], [4, 8]),
            1024
        )
        .is_err());
    }
}
