//! Handles and descriptors exchanged with a compute runtime

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a handle from a raw id
            pub const fn new(id: u64) -> Self {
                $name(id)
            }

            /// Get the internal ID
            pub const fn id(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Platform exposed by a runtime
    PlatformId,
    "platform"
);
define_handle!(
    /// Device of a platform
    DeviceId,
    "device"
);
define_handle!(
    /// Context bound to one device
    ContextHandle,
    "ctx"
);
define_handle!(
    /// In-order command queue
    QueueHandle,
    "queue"
);
define_handle!(
    /// Program object, built from source or from a device binary
    ProgramHandle,
    "prog"
);
define_handle!(
    /// Kernel object created from a built program
    KernelHandle,
    "kernel"
);
define_handle!(
    /// Device memory object
    MemHandle,
    "mem"
);

// ================================================================================================
// Memory Flags
// ================================================================================================

/// Kernel access mode of a memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccess {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

/// Buffer creation flags
///
/// Access modes constrain kernels only: host reads and writes through the
/// queue are always allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemFlags {
    pub access: MemAccess,
    /// Initialize the buffer from the host data passed at creation
    pub copy_host_ptr: bool,
}

impl MemFlags {
    pub const READ_WRITE: MemFlags = MemFlags {
        access: MemAccess::ReadWrite,
        copy_host_ptr: false,
    };
    pub const READ_ONLY: MemFlags = MemFlags {
        access: MemAccess::ReadOnly,
        copy_host_ptr: false,
    };
    pub const WRITE_ONLY: MemFlags = MemFlags {
        access: MemAccess::WriteOnly,
        copy_host_ptr: false,
    };
    pub const COPY_HOST_PTR: MemFlags = MemFlags {
        access: MemAccess::ReadWrite,
        copy_host_ptr: true,
    };

    /// Same access mode, initialized from host data
    pub const fn with_copy_host_ptr(self) -> Self {
        MemFlags {
            access: self.access,
            copy_host_ptr: true,
        }
    }

    /// Can kernels load from the buffer
    pub const fn kernel_readable(self) -> bool {
        !matches!(self.access, MemAccess::WriteOnly)
    }

    /// Can kernels store to the buffer
    pub const fn kernel_writable(self) -> bool {
        !matches!(self.access, MemAccess::ReadOnly)
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

// ================================================================================================
// Kernel Arguments
// ================================================================================================

/// Value bound to a kernel argument slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    /// Memory object for a pointer parameter
    Buffer(MemHandle),
    /// Raw little-endian bytes for a by-value parameter
    Scalar(Vec<u8>),
}

impl KernelArg {
    pub fn buffer(mem: MemHandle) -> Self {
        KernelArg::Buffer(mem)
    }

    pub fn int(value: i32) -> Self {
        KernelArg::Scalar(value.to_le_bytes().to_vec())
    }

    pub fn uint(value: u32) -> Self {
        KernelArg::Scalar(value.to_le_bytes().to_vec())
    }

    pub fn long(value: i64) -> Self {
        KernelArg::Scalar(value.to_le_bytes().to_vec())
    }

    pub fn ulong(value: u64) -> Self {
        KernelArg::Scalar(value.to_le_bytes().to_vec())
    }

    /// Byte width of the bound value (handle width for buffers)
    pub fn byte_width(&self) -> usize {
        match self {
            KernelArg::Buffer(_) => std::mem::size_of::<u64>(),
            KernelArg::Scalar(bytes) => bytes.len(),
        }
    }
}

// ================================================================================================
// Device Info
// ================================================================================================

/// Static description of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    /// Largest number of work-items in one work-group
    pub max_work_group_size: usize,
    /// Largest local size per dimension
    pub max_work_item_sizes: [usize; 3],
    /// Identity of the binary format this device accepts
    pub binary_fingerprint: u64,
}

/// Lifecycle state of a program object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Created, not built yet
    None,
    /// Last build succeeded
    Success,
    /// Last build failed; see the build log
    Error,
}
