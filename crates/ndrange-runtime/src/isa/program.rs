//! Compiled kernel containers
//!
//! A [`KernelProgram`] is one `__kernel` function lowered to the ISA together
//! with its parameter signature. A [`CompiledModule`] groups every kernel of a
//! program source and is the unit that gets serialized into device binaries.

use super::instruction::Instruction;
use super::types::Type;
use std::collections::HashSet;
use std::fmt;

/// Errors found when validating a compiled module
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProgramError {
    /// Two kernels share a name
    #[error("duplicate kernel '{0}'")]
    DuplicateKernel(String),

    /// Kernel has no instructions or does not end with EXIT
    #[error("kernel '{0}' does not terminate with exit")]
    MissingExit(String),

    /// Instruction references an argument slot past the parameter list
    #[error("kernel '{kernel}' instruction {index}: argument slot {slot} out of range")]
    InvalidArgSlot { kernel: String, index: usize, slot: u8 },

    /// Instruction uses an argument slot with the wrong parameter kind
    #[error("kernel '{kernel}' instruction {index}: argument slot {slot} has the wrong kind")]
    ArgKindMismatch { kernel: String, index: usize, slot: u8 },

    /// Store through a read-only parameter
    #[error("kernel '{kernel}' instruction {index}: store to read-only argument {slot}")]
    StoreToReadOnly { kernel: String, index: usize, slot: u8 },

    /// Register index not below the declared register count
    #[error("kernel '{kernel}' instruction {index}: register r{register} exceeds register count {count}")]
    RegisterOutOfRange {
        kernel: String,
        index: usize,
        register: u8,
        count: u16,
    },

    /// Work-item query with a dimension outside 0..=2
    #[error("kernel '{kernel}' instruction {index}: dimension {dim} out of range")]
    InvalidDimension { kernel: String, index: usize, dim: u8 },
}

/// Result type for program operations
pub type ProgramResult<T> = std::result::Result<T, ProgramError>;

// ================================================================================================
// Kernel Signature
// ================================================================================================

/// Address space of a pointer parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AddressSpace {
    /// `__global`
    Global,
    /// `__constant`
    Constant,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Global => write!(f, "__global"),
            AddressSpace::Constant => write!(f, "__constant"),
        }
    }
}

/// What a kernel parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ParamKind {
    /// Pointer to a buffer of `elem`
    Buffer {
        space: AddressSpace,
        elem: Type,
        read_only: bool,
    },
    /// By-value scalar
    Scalar { ty: Type },
}

impl ParamKind {
    /// Whether this parameter binds a memory object
    pub const fn is_buffer(&self) -> bool {
        matches!(self, ParamKind::Buffer { .. })
    }

    /// Byte width of a scalar argument, `None` for buffers
    pub const fn scalar_width(&self) -> Option<usize> {
        match self {
            ParamKind::Scalar { ty } => Some(ty.size_bytes()),
            ParamKind::Buffer { .. } => None,
        }
    }
}

/// Declared kernel parameter
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KernelParam {
    pub name: String,
    pub kind: ParamKind,
}

impl fmt::Display for KernelParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParamKind::Buffer { space, elem, read_only } => {
                let qual = if read_only { "const " } else { "" };
                write!(f, "{space} {qual}{}* {}", elem.c_name(), self.name)
            }
            ParamKind::Scalar { ty } => write!(f, "{} {}", ty.c_name(), self.name),
        }
    }
}

// ================================================================================================
// Kernel Program
// ================================================================================================

/// One kernel lowered to the ISA
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KernelProgram {
    /// Kernel function name
    pub name: String,

    /// Parameters in declaration order; argument slot `n` is `params[n]`
    pub params: Vec<KernelParam>,

    /// Registers used by each work-item
    pub register_count: u16,

    /// Instruction sequence, executed top to bottom
    pub instructions: Vec<Instruction>,
}

impl KernelProgram {
    /// Number of barrier instructions in the body
    pub fn barrier_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|inst| matches!(inst, Instruction::BarSync { .. }))
            .count()
    }

    /// Check the kernel's internal consistency
    pub fn validate(&self) -> ProgramResult<()> {
        if !matches!(self.instructions.last(), Some(Instruction::EXIT)) {
            return Err(ProgramError::MissingExit(self.name.clone()));
        }

        for (index, instruction) in self.instructions.iter().enumerate() {
            let registers = instruction.destination().into_iter().chain(instruction.sources());
            for register in registers {
                if u16::from(register.index()) >= self.register_count {
                    return Err(ProgramError::RegisterOutOfRange {
                        kernel: self.name.clone(),
                        index,
                        register: register.index(),
                        count: self.register_count,
                    });
                }
            }

            if let Instruction::SREG { dim, .. } = instruction {
                if *dim > 2 {
                    return Err(ProgramError::InvalidDimension {
                        kernel: self.name.clone(),
                        index,
                        dim: *dim,
                    });
                }
            }

            let Some(slot) = instruction.argument_slot() else {
                continue;
            };
            let param = self.params.get(slot as usize).ok_or_else(|| ProgramError::InvalidArgSlot {
                kernel: self.name.clone(),
                index,
                slot,
            })?;

            let kind_ok = match instruction {
                Instruction::LDARG { .. } => !param.kind.is_buffer(),
                _ => param.kind.is_buffer(),
            };
            if !kind_ok {
                return Err(ProgramError::ArgKindMismatch {
                    kernel: self.name.clone(),
                    index,
                    slot,
                });
            }

            if let (Instruction::STG { .. }, ParamKind::Buffer { read_only: true, .. }) = (instruction, param.kind) {
                return Err(ProgramError::StoreToReadOnly {
                    kernel: self.name.clone(),
                    index,
                    slot,
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for KernelProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        writeln!(f, ".kernel {}({}) regs={}", self.name, params.join(", "), self.register_count)?;
        for (pc, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "  {pc:4}: {instruction}")?;
        }
        Ok(())
    }
}

// ================================================================================================
// Compiled Module
// ================================================================================================

/// Every kernel compiled from one program source
///
/// Modules serialize with bincode; the device binary container wraps these
/// bytes with a header.
///
/// ```
/// use ndrange_runtime::isa::CompiledModule;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let module = CompiledModule::default();
/// let bytes = module.to_bytes()?;
/// assert_eq!(CompiledModule::from_bytes(&bytes)?, module);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompiledModule {
    pub kernels: Vec<KernelProgram>,
}

impl CompiledModule {
    /// Look up a kernel by name
    pub fn kernel(&self, name: &str) -> Option<&KernelProgram> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Kernel names in definition order
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }

    /// Validate every kernel and check names are unique
    pub fn validate(&self) -> ProgramResult<()> {
        let mut seen = HashSet::new();
        for kernel in &self.kernels {
            if !seen.insert(kernel.name.as_str()) {
                return Err(ProgramError::DuplicateKernel(kernel.name.clone()));
            }
            kernel.validate()?;
        }
        Ok(())
    }

    /// Serialize the module to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize a module from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
