//! Error types for verification runs
//!
//! Every variant names the step that failed. The first error aborts the
//! run; nothing is retried.

use crate::codec::CodecError;
use crate::resources::ProgramOrigin;
use crate::verifier::Mismatch;
use ndrange_runtime::RuntimeError;

/// Result type for verification operations
pub type Result<T> = std::result::Result<T, ConformanceError>;

/// Errors that end a verification run
#[derive(Debug, thiserror::Error)]
pub enum ConformanceError {
    /// No platform or device to run on
    #[error("platform unavailable: {reason}")]
    PlatformUnavailable { reason: String },

    /// Source or binary build rejected by the runtime
    #[error("{origin} program build failed: {log}")]
    BuildFailure { origin: ProgramOrigin, log: String },

    /// Size/content query failed or produced an empty binary
    #[error("binary extraction failed: {0}")]
    BinaryExtractionFailure(#[source] CodecError),

    /// Argument rejected by the kernel
    #[error("kernel '{kernel}': binding argument {index} failed: {source}")]
    ArgumentBindingFailure {
        kernel: String,
        index: u32,
        #[source]
        source: RuntimeError,
    },

    /// Enqueue, queue drain or transfer failed
    #[error("{step} failed: {source}")]
    DispatchFailure {
        step: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// Runtime call outside the dispatch path failed (context, queue, buffers)
    #[error("{step} failed: {source}")]
    Runtime {
        step: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// Computed value disagrees with the expected model
    #[error("{0}")]
    ResultMismatch(#[from] Mismatch),

    /// Rejected scenario configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Index range that the models cannot describe
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

impl ConformanceError {
    /// Wrap a runtime error raised by a setup step
    pub fn runtime(step: &'static str) -> impl FnOnce(RuntimeError) -> Self {
        move |source| Self::Runtime { step, source }
    }

    /// Wrap a runtime error raised while dispatching
    pub fn dispatch(step: &'static str) -> impl FnOnce(RuntimeError) -> Self {
        move |source| Self::DispatchFailure { step, source }
    }

    /// Short name of the failing step
    pub fn step(&self) -> &str {
        match self {
            Self::PlatformUnavailable { .. } => "select device",
            Self::BuildFailure { .. } => "build program",
            Self::BinaryExtractionFailure(_) => "extract binary",
            Self::ArgumentBindingFailure { .. } => "bind arguments",
            Self::DispatchFailure { step, .. } | Self::Runtime { step, .. } => *step,
            Self::ResultMismatch(_) => "verify results",
            Self::InvalidConfig(_) => "load configuration",
            Self::InvalidRange(_) => "validate range",
        }
    }
}

impl From<CodecError> for ConformanceError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidBinaryError(source) => Self::BuildFailure {
                origin: ProgramOrigin::BinaryRebuilt,
                log: source.to_string(),
            },
            other => Self::BinaryExtractionFailure(other),
        }
    }
}
