//! Compute runtime trait
//!
//! The narrow host interface the verification layer consumes. Every method
//! takes `&self`; implementations synchronize internally so that scoped
//! resource guards can release their handles on drop while other guards are
//! still alive.
//!
//! # Capability Groups
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ComputeRuntime                          │
//! │  platforms / devices / device_info          (enumeration)    │
//! │  create_context / create_command_queue      (setup)          │
//! │  create_program_with_{source,binary}        (programs)       │
//! │  build_program / program_build_log                           │
//! │  program_binary_size / program_binary_into  (introspection)  │
//! │  create_buffer                              (memory)         │
//! │  create_kernel / set_kernel_arg             (kernels)        │
//! │  enqueue_nd_range                           (dispatch)       │
//! │  enqueue_write_buffer / enqueue_read_buffer (transfers)      │
//! │  finish                                     (queue drain)    │
//! │  release_*                                  (lifetimes)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use super::ndrange::NdRange;
use super::types::{
    BuildStatus, ContextHandle, DeviceId, DeviceInfo, KernelArg, KernelHandle, MemFlags, MemHandle, PlatformId,
    ProgramHandle, QueueHandle,
};
use crate::error::Result;

/// Host-side interface to a compute device
pub trait ComputeRuntime: Send + Sync {
    // ============================================================================================
    // Enumeration
    // ============================================================================================

    /// Available platforms
    fn platforms(&self) -> Result<Vec<PlatformId>>;

    /// Devices of a platform
    fn devices(&self, platform: PlatformId) -> Result<Vec<DeviceId>>;

    /// Static device description
    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo>;

    // ============================================================================================
    // Context and Queue
    // ============================================================================================

    /// Create a context bound to one device
    fn create_context(&self, device: DeviceId) -> Result<ContextHandle>;

    /// Create an in-order command queue
    fn create_command_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle>;

    // ============================================================================================
    // Programs
    // ============================================================================================

    /// Create an unbuilt program from kernel source
    fn create_program_with_source(&self, context: ContextHandle, source: &str) -> Result<ProgramHandle>;

    /// Create an unbuilt program from a device binary
    ///
    /// The binary is checked against `device` here; malformed or foreign
    /// binaries fail with [`crate::RuntimeError::InvalidBinary`].
    fn create_program_with_binary(&self, context: ContextHandle, device: DeviceId, binary: &[u8])
        -> Result<ProgramHandle>;

    /// Compile and link a program
    ///
    /// On failure the diagnostics are available from [`Self::program_build_log`].
    fn build_program(&self, program: ProgramHandle) -> Result<()>;

    /// Build state of a program
    fn program_build_status(&self, program: ProgramHandle) -> Result<BuildStatus>;

    /// Diagnostics of the last build (empty when none)
    fn program_build_log(&self, program: ProgramHandle) -> Result<String>;

    /// Size in bytes of the program's device binary
    ///
    /// Fails with [`crate::RuntimeError::ProgramNotBuilt`] before a successful build.
    fn program_binary_size(&self, program: ProgramHandle) -> Result<usize>;

    /// Copy the device binary into `dst`, which must be exactly
    /// [`Self::program_binary_size`] bytes long
    fn program_binary_into(&self, program: ProgramHandle, dst: &mut [u8]) -> Result<()>;

    // ============================================================================================
    // Memory
    // ============================================================================================

    /// Allocate a buffer of `size` bytes
    ///
    /// With [`MemFlags::copy_host_ptr`] set, `host_data` must be provided and
    /// be exactly `size` bytes long.
    fn create_buffer(
        &self,
        context: ContextHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemHandle>;

    /// Size in bytes of a buffer
    fn buffer_size(&self, mem: MemHandle) -> Result<usize>;

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Create a kernel object from a built program
    fn create_kernel(&self, program: ProgramHandle, name: &str) -> Result<KernelHandle>;

    /// Number of declared kernel parameters
    fn kernel_arg_count(&self, kernel: KernelHandle) -> Result<usize>;

    /// Bind argument `index` (declaration order)
    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, arg: KernelArg) -> Result<()>;

    // ============================================================================================
    // Commands
    // ============================================================================================

    /// Validate and enqueue a kernel launch
    ///
    /// Arguments are captured at enqueue time. Execution happens when the
    /// queue is flushed by [`Self::finish`] or a blocking transfer.
    fn enqueue_nd_range(&self, queue: QueueHandle, kernel: KernelHandle, range: &NdRange) -> Result<()>;

    /// Blocking write of `data` into the buffer at byte `offset`
    fn enqueue_write_buffer(&self, queue: QueueHandle, mem: MemHandle, offset: usize, data: &[u8]) -> Result<()>;

    /// Blocking read from the buffer at byte `offset` into `dst`
    fn enqueue_read_buffer(&self, queue: QueueHandle, mem: MemHandle, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Block until every enqueued command completed
    fn finish(&self, queue: QueueHandle) -> Result<()>;

    // ============================================================================================
    // Release
    // ============================================================================================

    fn release_mem_object(&self, mem: MemHandle) -> Result<()>;

    fn release_kernel(&self, kernel: KernelHandle) -> Result<()>;

    /// Fails with [`crate::RuntimeError::ProgramInUse`] while kernels are alive
    fn release_program(&self, program: ProgramHandle) -> Result<()>;

    /// Launches still pending on the queue are discarded, not executed
    fn release_command_queue(&self, queue: QueueHandle) -> Result<()>;

    /// Fails with [`crate::RuntimeError::ContextInUse`] while objects created in it are alive
    fn release_context(&self, context: ContextHandle) -> Result<()>;
}
