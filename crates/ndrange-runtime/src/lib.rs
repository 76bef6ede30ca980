//! Reference compute runtime for NDRange kernels
//!
//! This crate provides:
//! - **ComputeRuntime**: the narrow host interface (enumeration, programs,
//!   buffers, kernels, in-order queues, release)
//! - **Kernel compiler**: a C-like kernel dialect lowered to a register ISA
//! - **Device binaries**: the container a built program serializes to and is
//!   reinstated from
//! - **CPU device**: work-groups in parallel, work-items in lock-step barrier
//!   phases
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   kernel source text                    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ compiler (lexer → parser → codegen)
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              CompiledModule (register ISA)              │◄──┐
//! └─────────────────────┬───────────────────────────────────┘   │
//!                       │ binary::encode          binary::decode│
//!                       ▼                                       │
//! ┌─────────────────────────────────────────────────────────┐   │
//! │          device binary ("NDRB" + bincode payload)       │───┘
//! └─────────────────────────────────────────────────────────┘
//!                       │
//!                       ▼
//!               CpuRuntime (ComputeRuntime)
//! ```

pub mod binary;
pub mod compiler;
pub mod cpu;
pub mod error;
pub mod isa;
pub mod runtime;

// Re-export public API
pub use compiler::{compile, CompileError};
pub use cpu::{CpuRuntime, DeviceProfile, REFERENCE_FINGERPRINT};
pub use error::{Result, RuntimeError};
pub use isa::{CompiledModule, Instruction, KernelProgram, ProgramError, Type};
pub use runtime::{
    BuildStatus, ComputeRuntime, ContextHandle, DeviceId, DeviceInfo, KernelArg, KernelHandle, LaunchGeometry,
    MemAccess, MemFlags, MemHandle, NdRange, PlatformId, ProgramHandle, QueueHandle, WorkSize,
};
