//! Kernel ISA (Instruction Set Architecture)
//!
//! The compiler lowers kernel-language functions to this ISA and the CPU
//! device executes it. Compiled modules are what device binaries carry.
//!
//! # Architecture
//!
//! - **Register-based**: up to 256 registers per work-item, each a raw 64-bit value
//! - **Typed operations**: arithmetic and memory instructions name their [`Type`]
//! - **Argument-relative memory**: buffers are addressed by kernel argument slot and element index
//! - **Barriers**: `BarSync` splits a kernel into phases that a work-group runs in lock-step
//!
//! # Instruction Categories
//!
//! - **Memory**: LDG, STG, LDARG
//! - **Data Movement**: MOV, MOV_IMM, CVT
//! - **Arithmetic**: ADD, SUB, MUL, DIV, REM, NEG
//! - **Work-Item Queries**: SREG
//! - **Synchronization / Control**: BarSync, EXIT

mod instruction;
mod program;
mod types;

pub use instruction::{Instruction, InstructionCategory};
pub use program::{
    AddressSpace, CompiledModule, KernelParam, KernelProgram, ParamKind, ProgramError, ProgramResult,
};
pub use types::{MemoryFence, Register, Type, WorkItemQuery};
