//! Kernel-language compiler
//!
//! Compiles a C-like kernel dialect to the ISA:
//!
//! ```text
//! source ──► lexer ──► parser ──► codegen ──► CompiledModule
//! ```
//!
//! Supported subset:
//!
//! - `__kernel void` functions with `__global` / `__constant` pointer
//!   parameters and by-value integer scalars
//! - `int`, `unsigned int`, `long`, `ulong` and `size_t` with C conversion rules
//! - declarations, assignments, buffer stores, `+=` / `-=`, `barrier(...)`, `return`
//! - `+ - * / %`, unary minus, casts and the work-item builtins
//!
//! ```
//! use ndrange_runtime::compiler::compile;
//!
//! let module = compile("__kernel void fill(__global int *out) { out[get_global_id(0)] = 1; }").unwrap();
//! assert!(module.kernel("fill").is_some());
//! ```

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;

use crate::isa::CompiledModule;
use codegen::KernelCodegen;
use lexer::Span;
use std::collections::HashMap;

/// Compilation diagnostics, each tagged with a `line:column` position
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("{span}: unexpected character '{ch}'")]
    UnexpectedChar { ch: char, span: Span },

    #[error("{span}: invalid integer literal")]
    InvalidLiteral { span: Span },

    #[error("{span}: unterminated comment")]
    UnterminatedComment { span: Span },

    #[error("{span}: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String, span: Span },

    #[error("{span}: unknown type '{name}'")]
    UnknownType { name: String, span: Span },

    #[error("{span}: pointer parameter '{name}' needs an address space qualifier")]
    MissingAddressSpace { name: String, span: Span },

    #[error("{span}: address space qualifier on scalar parameter '{name}'")]
    InvalidQualifier { name: String, span: Span },

    #[error("{span}: use of undeclared identifier '{name}'")]
    UnknownIdentifier { name: String, span: Span },

    #[error("{span}: redefinition of '{name}'")]
    Redeclared { name: String, span: Span },

    #[error("{span}: cannot assign to '{name}'")]
    NotAssignable { name: String, span: Span },

    #[error("{span}: cannot store through read-only pointer '{name}'")]
    StoreToReadOnly { name: String, span: Span },

    #[error("{span}: '{name}' is not a pointer")]
    NotAPointer { name: String, span: Span },

    #[error("{span}: pointer '{name}' used as a value")]
    PointerAsValue { name: String, span: Span },

    #[error("{span}: call to unknown function '{name}'")]
    UnknownFunction { name: String, span: Span },

    #[error("{span}: '{name}' expects {expected} argument(s), found {found}")]
    BuiltinArity {
        name: String,
        expected: usize,
        found: usize,
        span: Span,
    },

    #[error("{span}: dimension argument of '{name}' must be the constant 0, 1 or 2")]
    InvalidDimension { name: String, span: Span },

    #[error("{span}: duplicate kernel '{name}'")]
    DuplicateKernel { name: String, span: Span },

    #[error("{span}: kernel '{kernel}' has too many parameters")]
    TooManyParameters { kernel: String, span: Span },

    #[error("{span}: kernel '{kernel}' needs more than 256 registers")]
    TooManyRegisters { kernel: String, span: Span },
}

impl CompileError {
    /// Build-log line for this diagnostic
    pub fn to_log_line(&self) -> String {
        format!("<source>:{self}")
    }
}

/// Compile a program source into a module holding all of its kernels
pub fn compile(source: &str) -> Result<CompiledModule, CompileError> {
    let kernels = parser::parse(source)?;

    let mut seen: HashMap<&str, Span> = HashMap::new();
    let mut module = CompiledModule::default();
    for kernel in &kernels {
        if seen.insert(kernel.name.as_str(), kernel.span).is_some() {
            return Err(CompileError::DuplicateKernel {
                name: kernel.name.clone(),
                span: kernel.span,
            });
        }
        let program = KernelCodegen::new(kernel).lower()?;
        tracing::trace!(kernel = %program.name, instructions = program.instructions.len(), "kernel_lowered");
        module.kernels.push(program);
    }

    Ok(module)
}
