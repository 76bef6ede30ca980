//! Equivalence Verifier
//!
//! Exact integer comparison, lowest index first, stopping at the first
//! mismatch.

use serde::Serialize;
use std::fmt;

/// Which comparison produced a mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckKind {
    /// Vector-combine outputs (round trip, index model, partitioning)
    VectorCombine,
    /// Barrier kernel buffers
    Barrier,
}

/// First disagreement found by a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub check: CheckKind,
    pub index: usize,
    pub actual: i32,
    pub expected: i32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.check {
            CheckKind::VectorCombine => write!(
                f,
                "Check failed at offset {}, {} instead of {}",
                self.index, self.actual, self.expected
            ),
            CheckKind::Barrier => write!(f, "barrier kernel Failed at index {}", self.index),
        }
    }
}

impl std::error::Error for Mismatch {}

/// Lowest index where `actual` and `expected` differ
///
/// A length difference counts as a mismatch at the shorter length.
pub fn first_difference(actual: &[i32], expected: &[i32]) -> Option<usize> {
    actual
        .iter()
        .zip(expected)
        .position(|(a, e)| a != e)
        .or_else(|| (actual.len() != expected.len()).then(|| actual.len().min(expected.len())))
}

/// Outputs of the three vector-combine dispatches and what they must equal
pub struct VectorOutputs<'a> {
    /// Source-built program, reference partitioning
    pub source_built: &'a [i32],
    /// Binary-rebuilt program, reference partitioning
    pub binary_rebuilt: &'a [i32],
    /// Binary-rebuilt program, alternate partitioning
    pub repartitioned: &'a [i32],
    /// Index Model for the reference partitioning
    pub model: &'a [i32],
    /// `reference - alternate` per element
    pub partition_delta: &'a [i32],
}

/// Barrier buffers of both program instances and the model's pass
pub struct BarrierOutputs<'a> {
    pub source_built: &'a [i32],
    pub binary_rebuilt: &'a [i32],
    pub model: &'a [i32],
}

/// Fast-fail comparison of dispatch outputs against each other and the models
#[derive(Debug, Default, Clone, Copy)]
pub struct EquivalenceVerifier;

impl EquivalenceVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Per index: round trip, then index model, then partition sensitivity
    ///
    /// Returns the number of elements checked.
    pub fn verify_vectors(&self, out: &VectorOutputs<'_>) -> Result<usize, Mismatch> {
        let _span = ndrange_tracing::perf_span!("verify_vectors", elements = out.model.len());
        let len = out.model.len();
        let mismatch = |index, actual, expected| Mismatch {
            check: CheckKind::VectorCombine,
            index,
            actual,
            expected,
        };

        // Buffers shorter than the model fail at their first missing element
        for slice in [out.source_built, out.binary_rebuilt, out.repartitioned, out.partition_delta] {
            if slice.len() < len {
                return Err(mismatch(slice.len(), 0, out.model[slice.len()]));
            }
        }

        for i in 0..len {
            let reference = out.source_built[i];
            if out.binary_rebuilt[i] != reference {
                return Err(mismatch(i, out.binary_rebuilt[i], reference));
            }
            if reference != out.model[i] {
                return Err(mismatch(i, reference, out.model[i]));
            }
            let expected = reference.wrapping_sub(out.partition_delta[i]);
            if out.repartitioned[i] != expected {
                return Err(mismatch(i, out.repartitioned[i], expected));
            }
        }
        Ok(len)
    }

    /// Source-built against binary-rebuilt, then both against the model
    ///
    /// Returns the number of elements checked.
    pub fn verify_barrier(&self, out: &BarrierOutputs<'_>) -> Result<usize, Mismatch> {
        let mismatch = |index: usize, actual: &[i32], expected: &[i32]| Mismatch {
            check: CheckKind::Barrier,
            index,
            actual: actual.get(index).copied().unwrap_or(0),
            expected: expected.get(index).copied().unwrap_or(0),
        };

        if let Some(i) = first_difference(out.binary_rebuilt, out.source_built) {
            return Err(mismatch(i, out.binary_rebuilt, out.source_built));
        }
        if let Some(i) = first_difference(out.source_built, out.model) {
            return Err(mismatch(i, out.source_built, out.model));
        }
        Ok(out.model.len())
    }
}
