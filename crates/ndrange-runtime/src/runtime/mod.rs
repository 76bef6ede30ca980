//! Host interface of a compute runtime
//!
//! - [`ComputeRuntime`]: the trait a device implementation provides
//! - Handle newtypes and descriptors ([`types`])
//! - Launch ranges and their resolved geometry ([`ndrange`])

pub mod ndrange;
mod traits;
pub mod types;

pub use ndrange::{LaunchGeometry, NdRange, WorkSize};
pub use traits::ComputeRuntime;
pub use types::{
    BuildStatus, ContextHandle, DeviceId, DeviceInfo, KernelArg, KernelHandle, MemAccess, MemFlags, MemHandle,
    PlatformId, ProgramHandle, QueueHandle,
};
