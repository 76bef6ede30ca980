//! Kernel ISA instruction set
//!
//! - Memory (LDG, STG, LDARG)
//! - Data movement (MOV, MOV_IMM, CVT)
//! - Integer arithmetic (ADD, SUB, MUL, DIV, REM, NEG)
//! - Work-item queries (SREG)
//! - Synchronization and control (BarSync, EXIT)
//!
//! Buffer accesses address memory through a kernel argument slot and an
//! element index register. The slot is resolved against the arguments bound
//! when the kernel was enqueued, so a compiled program never embeds device
//! addresses and can be serialized as-is.

use super::types::{MemoryFence, Register, Type, WorkItemQuery};
use std::fmt;

/// Kernel ISA instruction
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Instruction {
    // ============================================================================================
    // Memory
    // ============================================================================================
    /// Load element `index` of the buffer bound to argument `arg`
    LDG {
        ty: Type,
        dst: Register,
        arg: u8,
        index: Register,
    },

    /// Store `src` to element `index` of the buffer bound to argument `arg`
    STG {
        ty: Type,
        src: Register,
        arg: u8,
        index: Register,
    },

    /// Load the scalar bound to argument `arg`
    LDARG { ty: Type, dst: Register, arg: u8 },

    // ============================================================================================
    // Data Movement
    // ============================================================================================
    /// Copy a register
    MOV { dst: Register, src: Register },

    /// Load an immediate value, normalized to `ty`
    #[allow(non_camel_case_types)]
    MOV_IMM { ty: Type, dst: Register, value: i64 },

    /// Convert `src` to `dst_ty`
    CVT { dst_ty: Type, dst: Register, src: Register },

    // ============================================================================================
    // Arithmetic
    // ============================================================================================
    /// dst = src1 + src2 (wrapping)
    ADD {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// dst = src1 - src2 (wrapping)
    SUB {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// dst = src1 * src2 (wrapping)
    MUL {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// dst = src1 / src2, truncating toward zero for signed types
    DIV {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// dst = src1 % src2
    REM {
        ty: Type,
        dst: Register,
        src1: Register,
        src2: Register,
    },

    /// dst = -src (wrapping)
    NEG { ty: Type, dst: Register, src: Register },

    // ============================================================================================
    // Work-Item Queries
    // ============================================================================================
    /// Read a work-item position value for dimension `dim`
    SREG {
        dst: Register,
        query: WorkItemQuery,
        dim: u8,
    },

    // ============================================================================================
    // Synchronization / Control
    // ============================================================================================
    /// Work-group barrier
    BarSync { fence: MemoryFence },

    /// Terminate the lane
    EXIT,
}

/// Instruction category for introspection and dispatch statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionCategory {
    Memory,
    DataMovement,
    Arithmetic,
    WorkItem,
    Synchronization,
    Control,
}

impl Instruction {
    /// Get the category of this instruction
    pub const fn category(&self) -> InstructionCategory {
        match self {
            Instruction::LDG { .. } | Instruction::STG { .. } | Instruction::LDARG { .. } => {
                InstructionCategory::Memory
            }
            Instruction::MOV { .. } | Instruction::MOV_IMM { .. } | Instruction::CVT { .. } => {
                InstructionCategory::DataMovement
            }
            Instruction::ADD { .. }
            | Instruction::SUB { .. }
            | Instruction::MUL { .. }
            | Instruction::DIV { .. }
            | Instruction::REM { .. }
            | Instruction::NEG { .. } => InstructionCategory::Arithmetic,
            Instruction::SREG { .. } => InstructionCategory::WorkItem,
            Instruction::BarSync { .. } => InstructionCategory::Synchronization,
            Instruction::EXIT => InstructionCategory::Control,
        }
    }

    /// Registers written by this instruction
    pub fn destination(&self) -> Option<Register> {
        match self {
            Instruction::LDG { dst, .. }
            | Instruction::LDARG { dst, .. }
            | Instruction::MOV { dst, .. }
            | Instruction::MOV_IMM { dst, .. }
            | Instruction::CVT { dst, .. }
            | Instruction::ADD { dst, .. }
            | Instruction::SUB { dst, .. }
            | Instruction::MUL { dst, .. }
            | Instruction::DIV { dst, .. }
            | Instruction::REM { dst, .. }
            | Instruction::NEG { dst, .. }
            | Instruction::SREG { dst, .. } => Some(*dst),
            Instruction::STG { .. } | Instruction::BarSync { .. } | Instruction::EXIT => None,
        }
    }

    /// Registers read by this instruction
    pub fn sources(&self) -> Vec<Register> {
        match self {
            Instruction::LDG { index, .. } => vec![*index],
            Instruction::STG { src, index, .. } => vec![*src, *index],
            Instruction::MOV { src, .. } | Instruction::CVT { src, .. } | Instruction::NEG { src, .. } => vec![*src],
            Instruction::ADD { src1, src2, .. }
            | Instruction::SUB { src1, src2, .. }
            | Instruction::MUL { src1, src2, .. }
            | Instruction::DIV { src1, src2, .. }
            | Instruction::REM { src1, src2, .. } => vec![*src1, *src2],
            Instruction::LDARG { .. }
            | Instruction::MOV_IMM { .. }
            | Instruction::SREG { .. }
            | Instruction::BarSync { .. }
            | Instruction::EXIT => Vec::new(),
        }
    }

    /// Kernel argument slot accessed by this instruction
    pub const fn argument_slot(&self) -> Option<u8> {
        match self {
            Instruction::LDG { arg, .. } | Instruction::STG { arg, .. } | Instruction::LDARG { arg, .. } => Some(*arg),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LDG { ty, dst, arg, index } => write!(f, "ldg.{ty} {dst}, arg{arg}[{index}]"),
            Instruction::STG { ty, src, arg, index } => write!(f, "stg.{ty} arg{arg}[{index}], {src}"),
            Instruction::LDARG { ty, dst, arg } => write!(f, "ldarg.{ty} {dst}, arg{arg}"),
            Instruction::MOV { dst, src } => write!(f, "mov {dst}, {src}"),
            Instruction::MOV_IMM { ty, dst, value } => write!(f, "mov.{ty} {dst}, #{value}"),
            Instruction::CVT { dst_ty, dst, src } => write!(f, "cvt.{dst_ty} {dst}, {src}"),
            Instruction::ADD { ty, dst, src1, src2 } => write!(f, "add.{ty} {dst}, {src1}, {src2}"),
            Instruction::SUB { ty, dst, src1, src2 } => write!(f, "sub.{ty} {dst}, {src1}, {src2}"),
            Instruction::MUL { ty, dst, src1, src2 } => write!(f, "mul.{ty} {dst}, {src1}, {src2}"),
            Instruction::DIV { ty, dst, src1, src2 } => write!(f, "div.{ty} {dst}, {src1}, {src2}"),
            Instruction::REM { ty, dst, src1, src2 } => write!(f, "rem.{ty} {dst}, {src1}, {src2}"),
            Instruction::NEG { ty, dst, src } => write!(f, "neg.{ty} {dst}, {src}"),
            Instruction::SREG { dst, query, dim } => write!(f, "sreg {dst}, %{query}.{dim}"),
            Instruction::BarSync { fence } => write!(f, "bar.sync {fence}"),
            Instruction::EXIT => write!(f, "exit"),
        }
    }
}
