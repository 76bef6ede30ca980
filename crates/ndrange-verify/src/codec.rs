//! Binary Codec
//!
//! Extraction is two explicit phases, and each phase is its own type:
//!
//! ```text
//! BuiltProgram ──query_size──► PendingBinary ──fetch_into──► SerializedBinary
//!                              (sized buffer)                 (filled buffer)
//!
//! SerializedBinary ──reinstate──► UnbuiltProgram(BinaryRebuilt) ──build──► BuiltProgram
//! ```
//!
//! The destination buffer is allocated once from the size query and filled
//! in place by the content query. A reinstated program still has to be
//! built before kernels can be created from it.

use crate::resources::{BuiltProgram, Context, UnbuiltProgram};
use ndrange_runtime::{ProgramHandle, RuntimeError};
use ndrange_tracing::perf_event;

/// Failures of the extract/reinstate round trip
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Size query failed, usually because the program never built
    #[error("binary size query failed: {0}")]
    SizeQueryError(#[source] RuntimeError),

    /// Content query failed or disagreed with the size query
    #[error("binary content query failed: {0}")]
    ContentQueryError(#[source] RuntimeError),

    /// Runtime reported a zero-length binary
    #[error("program binary is empty")]
    EmptyBinary,

    /// Runtime refused the binary at reinstatement
    #[error("binary rejected by device: {0}")]
    InvalidBinaryError(#[source] RuntimeError),
}

/// Extracted device binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBinary {
    bytes: Vec<u8>,
}

impl SerializedBinary {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; extraction rejects empty binaries
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Size query done, destination allocated, content not fetched yet
#[derive(Debug)]
pub struct PendingBinary {
    program: ProgramHandle,
    buffer: Vec<u8>,
}

impl PendingBinary {
    /// Size reported by the size query
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Content query into the buffer allocated by the size query
    pub fn fetch_into(mut self, program: &BuiltProgram<'_>) -> Result<SerializedBinary, CodecError> {
        if program.handle() != self.program {
            return Err(CodecError::ContentQueryError(RuntimeError::invalid_handle(
                "program",
                program.handle().id(),
            )));
        }
        program
            .runtime()
            .program_binary_into(self.program, &mut self.buffer)
            .map_err(CodecError::ContentQueryError)?;

        perf_event!("binary_extracted", program = self.program.id(), size_bytes = self.buffer.len());
        Ok(SerializedBinary { bytes: self.buffer })
    }
}

/// Size query against a built program
pub fn query_size(program: &BuiltProgram<'_>) -> Result<PendingBinary, CodecError> {
    let size = program
        .runtime()
        .program_binary_size(program.handle())
        .map_err(CodecError::SizeQueryError)?;
    if size == 0 {
        return Err(CodecError::EmptyBinary);
    }
    Ok(PendingBinary {
        program: program.handle(),
        buffer: vec![0u8; size],
    })
}

/// Both extraction phases in order
pub fn extract(program: &BuiltProgram<'_>) -> Result<SerializedBinary, CodecError> {
    let _span = ndrange_tracing::perf_span!("extract_binary", program = program.handle().id());
    query_size(program)?.fetch_into(program)
}

/// Create an unbuilt program from an extracted binary
pub fn reinstate<'c>(context: &'c Context<'_>, binary: &SerializedBinary) -> Result<UnbuiltProgram<'c>, CodecError> {
    context
        .program_from_binary(binary.as_bytes())
        .map_err(CodecError::InvalidBinaryError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{select_device, ProgramOrigin};
    use ndrange_runtime::{ComputeRuntime, CpuRuntime, DeviceProfile};

    const SOURCE: &str = "__kernel void k(__global int *o) { o[get_global_id(0)] = 5; }";

    #[test]
    fn test_round_trip_produces_rebuilt_program() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let program = ctx.program_from_source(SOURCE).unwrap().build().unwrap();

        let pending = query_size(&program).unwrap();
        let size = pending.len();
        assert!(size > 0);
        let binary = pending.fetch_into(&program).unwrap();
        assert_eq!(binary.len(), size);
        assert!(!binary.is_empty());

        let reinstated = reinstate(&ctx, &binary).unwrap();
        assert_eq!(reinstated.origin(), ProgramOrigin::BinaryRebuilt);
        let rebuilt = reinstated.build().unwrap();
        assert_eq!(extract(&rebuilt).unwrap(), binary);
    }

    #[test]
    fn test_reinstated_program_needs_build() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let program = ctx.program_from_source(SOURCE).unwrap().build().unwrap();
        let binary = extract(&program).unwrap();

        let reinstated = reinstate(&ctx, &binary).unwrap();
        assert!(matches!(
            rt.create_kernel(reinstated.handle(), "k"),
            Err(RuntimeError::ProgramNotBuilt(_))
        ));
    }

    #[test]
    fn test_fetch_rejects_other_program() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let first = ctx.program_from_source(SOURCE).unwrap().build().unwrap();
        let second = ctx.program_from_source(SOURCE).unwrap().build().unwrap();

        let pending = query_size(&first).unwrap();
        assert!(matches!(pending.fetch_into(&second), Err(CodecError::ContentQueryError(_))));
    }

    #[test]
    fn test_foreign_and_corrupt_binaries_rejected() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let program = ctx.program_from_source(SOURCE).unwrap().build().unwrap();
        let binary = extract(&program).unwrap();

        let other = CpuRuntime::with_profile(DeviceProfile::reference().with_fingerprint(7));
        let other_ctx = Context::create(&other, select_device(&other).unwrap()).unwrap();
        assert!(matches!(
            reinstate(&other_ctx, &binary),
            Err(CodecError::InvalidBinaryError(RuntimeError::InvalidBinary(_)))
        ));

        let mut corrupt = binary.into_bytes();
        corrupt.truncate(corrupt.len() - 2);
        let corrupt = SerializedBinary { bytes: corrupt };
        assert!(matches!(reinstate(&ctx, &corrupt), Err(CodecError::InvalidBinaryError(_))));
    }
}
