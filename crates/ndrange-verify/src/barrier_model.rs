//! Barrier Kernel Model
//!
//! One pass of the neighborhood kernel over an offset range:
//!
//! ```text
//! PreBarrier   acc[i] = buf[i-1] + buf[i] + buf[i+1]     (every item reads)
//! ──────────── barrier: the whole work-group has read ────────────
//! PostBarrier  buf[i] = acc[i] / 3                       (every item writes)
//! ```
//!
//! The division truncates toward zero, as C integer division does, so a
//! negative sum rounds up. All reads see the pre-barrier snapshot. The range
//! must start at offset 1 or later and end one element before the buffer
//! end, so the `i-1` and `i+1` reads stay inside the buffer.

use crate::error::{ConformanceError, Result};

/// Smallest barrier buffer the scenario uses
pub const MIN_BARRIER_LEN: usize = 8;

/// Host copy of a barrier buffer: `buf[i] = 3i`
pub fn seed(len: usize) -> Vec<i32> {
    (0..len).map(|i| (3 * i) as i32).collect()
}

/// One-dimensional offset range of a barrier dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BarrierRange {
    pub offset: usize,
    pub global: usize,
    pub local: usize,
}

impl BarrierRange {
    /// Active buffer indices
    pub fn active(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.global
    }

    /// Check the range against a buffer of `len` elements
    ///
    /// Ordering between work-items only holds inside one work-group, so the
    /// whole range has to be a single group.
    pub fn validate(&self, len: usize) -> Result<()> {
        if len < MIN_BARRIER_LEN {
            return Err(ConformanceError::InvalidRange(format!(
                "barrier buffer holds {len} elements, at least {MIN_BARRIER_LEN} required"
            )));
        }
        if self.global == 0 || self.local == 0 {
            return Err(ConformanceError::InvalidRange("barrier range is empty".to_string()));
        }
        if self.offset == 0 {
            return Err(ConformanceError::InvalidRange(
                "barrier range starts at index 0 and would read index -1".to_string(),
            ));
        }
        match self.offset.checked_add(self.global) {
            Some(end) if end < len => {}
            _ => {
                return Err(ConformanceError::InvalidRange(format!(
                    "barrier range {}..{} reads past a buffer of {len} elements",
                    self.offset,
                    self.offset.saturating_add(self.global)
                )))
            }
        }
        if self.local != self.global {
            return Err(ConformanceError::InvalidRange(format!(
                "barrier range of {} items split into work-groups of {}: neighbor reads would cross groups",
                self.global, self.local
            )));
        }
        Ok(())
    }
}

/// Per work-item state across the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    PreBarrier,
    Accumulated(i32),
    PostBarrier,
}

/// Buffer contents after one barrier pass over `range`
pub fn expected_pass(snapshot: &[i32], range: &BarrierRange) -> Result<Vec<i32>> {
    range.validate(snapshot.len())?;

    let mut items = vec![BarrierPhase::PreBarrier; range.global];

    // Pre-barrier: every item reads the untouched snapshot
    for (item, gid) in items.iter_mut().zip(range.active()) {
        let acc = snapshot[gid - 1].wrapping_add(snapshot[gid]).wrapping_add(snapshot[gid + 1]);
        *item = BarrierPhase::Accumulated(acc);
    }

    // Post-barrier: every item writes its own slot
    let mut buffer = snapshot.to_vec();
    for (item, gid) in items.iter_mut().zip(range.active()) {
        if let BarrierPhase::Accumulated(acc) = *item {
            buffer[gid] = acc / 3;
            *item = BarrierPhase::PostBarrier;
        }
    }

    debug_assert!(items.iter().all(|item| *item == BarrierPhase::PostBarrier));
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: BarrierRange = BarrierRange {
        offset: 1,
        global: 6,
        local: 6,
    };

    #[test]
    fn test_linear_seed_is_a_fixed_point() {
        let seed = seed(8);
        assert_eq!(seed, vec![0, 3, 6, 9, 12, 15, 18, 21]);
        assert_eq!(expected_pass(&seed, &REFERENCE).unwrap(), seed);
    }

    #[test]
    fn test_reads_use_pre_barrier_snapshot() {
        let snapshot = vec![0, 9, 0, 0, 0, 0, 0, 0];
        let out = expected_pass(&snapshot, &REFERENCE).unwrap();
        // A sequential in-place pass would propagate the updated slot 1 into slot 2
        assert_eq!(out, vec![0, 3, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let snapshot = vec![-2, -2, -1, 0, 0, 0, 0, 0];
        let out = expected_pass(&snapshot, &REFERENCE).unwrap();
        assert_eq!(out[1], -1);
        assert_eq!(out[2], -1);
    }

    #[test]
    fn test_range_validation() {
        assert!(REFERENCE.validate(8).is_ok());
        assert!(REFERENCE.validate(7).is_err());

        let unshifted = BarrierRange { offset: 0, ..REFERENCE };
        assert!(unshifted.validate(8).unwrap_err().to_string().contains("index -1"));

        let past_end = BarrierRange { global: 7, local: 7, ..REFERENCE };
        assert!(past_end.validate(8).is_err());

        let split = BarrierRange { local: 3, ..REFERENCE };
        assert!(split.validate(8).is_err());
    }
}
