//! Core types for the kernel ISA
//!
//! - Registers
//! - Integer data types and the C conversion rules between them
//! - Work-item queries (the special values a lane reads about its position)
//! - Barrier fence flags

use std::fmt;

// ================================================================================================
// Register Types
// ================================================================================================

/// Register identifier (0-255)
///
/// Registers hold raw 64-bit values. The instruction that writes a register
/// normalizes the value to the instruction's [`Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Register(pub u8);

impl Register {
    /// Create a new register
    pub const fn new(index: u8) -> Self {
        Register(index)
    }

    /// Get register index
    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ================================================================================================
// Data Types
// ================================================================================================

/// Integer type operated on by instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Type {
    /// `int`
    I32,
    /// `unsigned int` / `uint`
    U32,
    /// `long`
    I64,
    /// `size_t` / `ulong`
    U64,
}

impl Type {
    /// Size of this type in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            Type::I32 | Type::U32 => 4,
            Type::I64 | Type::U64 => 8,
        }
    }

    /// Is this a signed type?
    pub const fn is_signed(self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }

    /// Conversion rank used by [`Type::promote`]
    const fn rank(self) -> u8 {
        match self {
            Type::I32 | Type::U32 => 0,
            Type::I64 | Type::U64 => 1,
        }
    }

    /// Common type of a binary operation (C usual arithmetic conversions)
    ///
    /// The wider rank wins. At equal rank the unsigned type wins. A signed
    /// 64-bit operand absorbs an unsigned 32-bit one since it can represent
    /// every value of it.
    pub const fn promote(a: Type, b: Type) -> Type {
        if a.rank() != b.rank() {
            if a.rank() > b.rank() {
                a
            } else {
                b
            }
        } else if !a.is_signed() {
            a
        } else {
            b
        }
    }

    /// Truncate or extend a raw register value to this type
    ///
    /// 32-bit types are sign- or zero-extended into the 64-bit register.
    /// `U64` values keep their bit pattern.
    pub const fn normalize(self, raw: i64) -> i64 {
        match self {
            Type::I32 => raw as i32 as i64,
            Type::U32 => raw as u32 as i64,
            Type::I64 | Type::U64 => raw,
        }
    }

    /// Decode a little-endian element of this type
    pub fn decode(self, bytes: &[u8]) -> i64 {
        match self {
            Type::I32 => bytemuck::pod_read_unaligned::<i32>(&bytes[..4]) as i64,
            Type::U32 => bytemuck::pod_read_unaligned::<u32>(&bytes[..4]) as i64,
            Type::I64 => bytemuck::pod_read_unaligned::<i64>(&bytes[..8]),
            Type::U64 => bytemuck::pod_read_unaligned::<u64>(&bytes[..8]) as i64,
        }
    }

    /// Encode a register value as a little-endian element of this type
    pub fn encode(self, raw: i64, out: &mut [u8]) {
        match self {
            Type::I32 => out[..4].copy_from_slice(bytemuck::bytes_of(&(raw as i32))),
            Type::U32 => out[..4].copy_from_slice(bytemuck::bytes_of(&(raw as u32))),
            Type::I64 => out[..8].copy_from_slice(bytemuck::bytes_of(&raw)),
            Type::U64 => out[..8].copy_from_slice(bytemuck::bytes_of(&(raw as u64))),
        }
    }

    /// Kernel-language spelling of this type
    pub const fn c_name(self) -> &'static str {
        match self {
            Type::I32 => "int",
            Type::U32 => "unsigned int",
            Type::I64 => "long",
            Type::U64 => "size_t",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::I32 => "i32",
            Type::U32 => "u32",
            Type::I64 => "i64",
            Type::U64 => "u64",
        };
        write!(f, "{}", s)
    }
}

// ================================================================================================
// Work-Item Queries
// ================================================================================================

/// Built-in value a lane can read about its position in the index space
///
/// Every query except [`WorkItemQuery::WorkDim`] takes a dimension. For a
/// dimension at or beyond the launch's work dimension, ids and offsets read
/// as 0 and sizes read as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum WorkItemQuery {
    /// `get_global_id(d)` = offset + group_id * local_size + local_id
    GlobalId,
    /// `get_local_id(d)`
    LocalId,
    /// `get_global_size(d)`
    GlobalSize,
    /// `get_local_size(d)`
    LocalSize,
    /// `get_group_id(d)`
    GroupId,
    /// `get_num_groups(d)`
    NumGroups,
    /// `get_global_offset(d)`
    GlobalOffset,
    /// `get_work_dim()`
    WorkDim,
}

impl WorkItemQuery {
    /// Look up a query by its kernel-language builtin name
    pub fn from_builtin(name: &str) -> Option<Self> {
        match name {
            "get_global_id" => Some(Self::GlobalId),
            "get_local_id" => Some(Self::LocalId),
            "get_global_size" => Some(Self::GlobalSize),
            "get_local_size" => Some(Self::LocalSize),
            "get_group_id" => Some(Self::GroupId),
            "get_num_groups" => Some(Self::NumGroups),
            "get_global_offset" => Some(Self::GlobalOffset),
            "get_work_dim" => Some(Self::WorkDim),
            _ => None,
        }
    }

    /// Whether the builtin takes a dimension argument
    pub const fn takes_dimension(self) -> bool {
        !matches!(self, Self::WorkDim)
    }

    /// Result type of the builtin
    pub const fn result_type(self) -> Type {
        match self {
            Self::WorkDim => Type::U32,
            _ => Type::U64,
        }
    }
}

impl fmt::Display for WorkItemQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GlobalId => "global_id",
            Self::LocalId => "local_id",
            Self::GlobalSize => "global_size",
            Self::LocalSize => "local_size",
            Self::GroupId => "group_id",
            Self::NumGroups => "num_groups",
            Self::GlobalOffset => "global_offset",
            Self::WorkDim => "work_dim",
        };
        write!(f, "{}", s)
    }
}

// ================================================================================================
// Synchronization
// ================================================================================================

/// Memory fence requested by a barrier
///
/// Lanes of a work-group are resumed only after every lane reached the
/// barrier, so both fences give the same visibility on the CPU device. The
/// flag is kept so binaries preserve what the source asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MemoryFence {
    /// `CLK_LOCAL_MEM_FENCE`
    Local,
    /// `CLK_GLOBAL_MEM_FENCE`
    Global,
    /// Both flags
    LocalAndGlobal,
}

impl MemoryFence {
    /// Combine two fence flags (`|` in the kernel language)
    pub const fn union(self, other: MemoryFence) -> MemoryFence {
        match (self, other) {
            (MemoryFence::Local, MemoryFence::Local) => MemoryFence::Local,
            (MemoryFence::Global, MemoryFence::Global) => MemoryFence::Global,
            _ => MemoryFence::LocalAndGlobal,
        }
    }
}

impl fmt::Display for MemoryFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryFence::Local => write!(f, "local"),
            MemoryFence::Global => write!(f, "global"),
            MemoryFence::LocalAndGlobal => write!(f, "local|global"),
        }
    }
}

// ================================================================================================
// Tests
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let reg = Register::new(42);
        assert_eq!(reg.index(), 42);
        assert_eq!(reg.to_string(), "r42");
    }

    #[test]
    fn test_type_sizes() {
        assert_eq!(Type::I32.size_bytes(), 4);
        assert_eq!(Type::U32.size_bytes(), 4);
        assert_eq!(Type::I64.size_bytes(), 8);
        assert_eq!(Type::U64.size_bytes(), 8);
    }

    #[test]
    fn test_promotion_follows_c_rules() {
        assert_eq!(Type::promote(Type::I32, Type::I32), Type::I32);
        assert_eq!(Type::promote(Type::I32, Type::U32), Type::U32);
        assert_eq!(Type::promote(Type::U32, Type::I32), Type::U32);
        assert_eq!(Type::promote(Type::I32, Type::U64), Type::U64);
        assert_eq!(Type::promote(Type::U32, Type::I64), Type::I64);
        assert_eq!(Type::promote(Type::I64, Type::U64), Type::U64);
    }

    #[test]
    fn test_normalize_wraps_to_width() {
        assert_eq!(Type::I32.normalize(0x1_0000_0005), 5);
        assert_eq!(Type::I32.normalize(0xFFFF_FFFF), -1);
        assert_eq!(Type::U32.normalize(-1), 0xFFFF_FFFF);
        assert_eq!(Type::U64.normalize(-1), -1);
    }

    #[test]
    fn test_encode_decode_element() {
        let mut bytes = [0u8; 8];
        Type::I32.encode(-7, &mut bytes);
        assert_eq!(Type::I32.decode(&bytes), -7);

        Type::U32.encode(-1, &mut bytes);
        assert_eq!(Type::U32.decode(&bytes), 0xFFFF_FFFF);
    }

    #[test]
    fn test_work_item_query_lookup() {
        assert_eq!(WorkItemQuery::from_builtin("get_local_id"), Some(WorkItemQuery::LocalId));
        assert_eq!(WorkItemQuery::from_builtin("get_work_dim"), Some(WorkItemQuery::WorkDim));
        assert_eq!(WorkItemQuery::from_builtin("barrier"), None);
        assert!(!WorkItemQuery::WorkDim.takes_dimension());
        assert_eq!(WorkItemQuery::GlobalId.result_type(), Type::U64);
    }

    #[test]
    fn test_fence_union() {
        assert_eq!(MemoryFence::Local.union(MemoryFence::Local), MemoryFence::Local);
        assert_eq!(MemoryFence::Local.union(MemoryFence::Global), MemoryFence::LocalAndGlobal);
    }
}
