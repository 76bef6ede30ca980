//! Error types for runtime operations

use std::fmt;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur in the compute runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Handle unknown to the runtime or already released
    #[error("invalid {kind} handle: {id}")]
    InvalidHandle { kind: &'static str, id: u64 },

    /// No device behind the requested platform
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Program build failed; the log holds the diagnostics
    #[error("program build failed:\n{log}")]
    BuildFailure { log: String },

    /// Device binary rejected at program creation
    #[error("invalid binary: {0}")]
    InvalidBinary(String),

    /// Program used before a successful build
    #[error("program {0} is not built")]
    ProgramNotBuilt(u64),

    /// Program released while kernels created from it are alive
    #[error("program {program} still has {kernels} live kernel(s)")]
    ProgramInUse { program: u64, kernels: usize },

    /// Context released while objects created in it are alive
    #[error("context {context} still owns {objects} live object(s)")]
    ContextInUse { context: u64, objects: usize },

    /// Object belongs to a different context
    #[error("{kind} {id} does not belong to context {context}")]
    ContextMismatch { kind: &'static str, id: u64, context: u64 },

    /// Kernel name not present in the built program
    #[error("kernel '{0}' not found in program")]
    KernelNotFound(String),

    /// Argument index past the kernel's parameter list
    #[error("kernel '{kernel}': argument index {index} out of range (kernel has {count})")]
    InvalidArgIndex { kernel: String, index: u32, count: usize },

    /// Argument of the wrong kind for the parameter
    #[error("kernel '{kernel}': invalid value for argument {index}: {reason}")]
    InvalidArgValue { kernel: String, index: u32, reason: String },

    /// Scalar argument byte width differs from the parameter type
    #[error("kernel '{kernel}': argument {index} expects {expected} bytes, got {actual}")]
    InvalidArgSize {
        kernel: String,
        index: u32,
        expected: usize,
        actual: usize,
    },

    /// Enqueue with unbound arguments
    #[error("kernel '{kernel}': arguments {missing:?} are not set")]
    MissingKernelArgs { kernel: String, missing: Vec<u32> },

    /// Rejected NDRange or buffer creation parameters
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// Destination size disagrees with the binary size
    #[error("binary destination holds {actual} bytes, binary is {expected} bytes")]
    InvalidBinarySize { expected: usize, actual: usize },

    /// Invalid buffer creation parameters
    #[error("invalid buffer: {0}")]
    InvalidBuffer(String),

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// Access forbidden by the buffer's access flags
    #[error("access violation on buffer {buffer}: {reason}")]
    AccessViolation { buffer: u64, reason: String },

    /// Some work-items of a group exited while others waited at a barrier
    #[error("barrier divergence in work-group {group:?}: {waiting} of {lanes} work-items reached the barrier")]
    BarrierDivergence { group: [usize; 3], waiting: usize, lanes: usize },

    /// Division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Execution error with context
    #[error("execution error in kernel '{kernel}' at work-item {global_id:?}: {source}")]
    ExecutionError {
        kernel: String,
        global_id: [usize; 3],
        #[source]
        source: Box<RuntimeError>,
    },

    /// Kernel source failed to compile
    #[error("compile error: {0}")]
    Compile(#[from] crate::compiler::CompileError),

    /// Compiled module failed validation
    #[error("program error: {0}")]
    Program(#[from] crate::isa::ProgramError),
}

impl RuntimeError {
    /// Create an invalid handle error
    pub fn invalid_handle(kind: &'static str, id: u64) -> Self {
        Self::InvalidHandle { kind, id }
    }

    /// Create an access violation error
    pub fn access_violation(buffer: u64, reason: impl fmt::Display) -> Self {
        Self::AccessViolation {
            buffer,
            reason: reason.to_string(),
        }
    }

    /// Wrap an error raised while a work-item executed
    pub fn in_work_item(self, kernel: &str, global_id: [usize; 3]) -> Self {
        Self::ExecutionError {
            kernel: kernel.to_string(),
            global_id,
            source: Box::new(self),
        }
    }
}
