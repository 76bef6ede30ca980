//! Scoped runtime objects
//!
//! Every handle obtained from the runtime lives in a guard that releases it
//! on drop, on every exit path. Objects created from another object borrow
//! it, so the borrow checker enforces the release order:
//!
//! ```text
//! Context ─┬─ Queue
//!          ├─ DeviceBuffer
//!          └─ UnbuiltProgram ──build──► BuiltProgram ─── Kernel
//! ```

use crate::error::{ConformanceError, Result};
use ndrange_runtime::{
    ComputeRuntime, ContextHandle, DeviceId, KernelArg, KernelHandle, MemFlags, MemHandle, ProgramHandle, QueueHandle,
    Result as RuntimeResult,
};
use std::fmt;

// ================================================================================================
// Scoped Handles
// ================================================================================================

/// Runtime handle with a matching release call
pub trait RuntimeHandle: Copy + fmt::Display {
    const KIND: &'static str;

    fn release(self, runtime: &dyn ComputeRuntime) -> RuntimeResult<()>;
}

macro_rules! impl_runtime_handle {
    ($handle:ty, $kind:literal, $release:ident) => {
        impl RuntimeHandle for $handle {
            const KIND: &'static str = $kind;

            fn release(self, runtime: &dyn ComputeRuntime) -> RuntimeResult<()> {
                runtime.$release(self)
            }
        }
    };
}

impl_runtime_handle!(ContextHandle, "context", release_context);
impl_runtime_handle!(QueueHandle, "queue", release_command_queue);
impl_runtime_handle!(ProgramHandle, "program", release_program);
impl_runtime_handle!(KernelHandle, "kernel", release_kernel);
impl_runtime_handle!(MemHandle, "mem", release_mem_object);

/// Handle released when the guard drops
pub struct Scoped<'a, H: RuntimeHandle> {
    runtime: &'a dyn ComputeRuntime,
    handle: H,
}

impl<'a, H: RuntimeHandle> Scoped<'a, H> {
    fn new(runtime: &'a dyn ComputeRuntime, handle: H) -> Self {
        Self { runtime, handle }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    pub fn runtime(&self) -> &'a dyn ComputeRuntime {
        self.runtime
    }
}

impl<H: RuntimeHandle> Drop for Scoped<'_, H> {
    fn drop(&mut self) {
        match self.handle.release(self.runtime) {
            Ok(()) => tracing::trace!(kind = H::KIND, handle = %self.handle, "released"),
            Err(e) => tracing::warn!(kind = H::KIND, handle = %self.handle, error = %e, "release failed"),
        }
    }
}

impl<H: RuntimeHandle + fmt::Debug> fmt::Debug for Scoped<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}

// ================================================================================================
// Context and Queue
// ================================================================================================

/// Pick the first device of the first platform
pub fn select_device(runtime: &dyn ComputeRuntime) -> Result<DeviceId> {
    let unavailable = |reason: String| ConformanceError::PlatformUnavailable { reason };

    let platform = runtime
        .platforms()
        .map_err(|e| unavailable(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| unavailable("no platforms".to_string()))?;
    runtime
        .devices(platform)
        .map_err(|e| unavailable(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| unavailable(format!("no devices on {platform}")))
}

/// Context bound to one device
pub struct Context<'a> {
    scoped: Scoped<'a, ContextHandle>,
    device: DeviceId,
}

impl<'a> Context<'a> {
    pub fn create(runtime: &'a dyn ComputeRuntime, device: DeviceId) -> Result<Self> {
        let handle = runtime
            .create_context(device)
            .map_err(ConformanceError::runtime("create context"))?;
        Ok(Self {
            scoped: Scoped::new(runtime, handle),
            device,
        })
    }

    pub fn runtime(&self) -> &'a dyn ComputeRuntime {
        self.scoped.runtime
    }

    pub fn handle(&self) -> ContextHandle {
        self.scoped.handle
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn create_queue(&self) -> Result<Queue<'_>> {
        let handle = self
            .runtime()
            .create_command_queue(self.handle(), self.device)
            .map_err(ConformanceError::runtime("create command queue"))?;
        Ok(Queue {
            scoped: Scoped::new(self.runtime(), handle),
        })
    }

    /// Program created from kernel source, not built yet
    pub fn program_from_source(&self, source: &str) -> Result<UnbuiltProgram<'_>> {
        let handle = self
            .runtime()
            .create_program_with_source(self.handle(), source)
            .map_err(ConformanceError::runtime("create program from source"))?;
        Ok(UnbuiltProgram {
            scoped: Scoped::new(self.runtime(), handle),
            origin: ProgramOrigin::SourceBuilt,
        })
    }

    /// Program created from a device binary, not built yet
    pub(crate) fn program_from_binary(&self, binary: &[u8]) -> RuntimeResult<UnbuiltProgram<'_>> {
        let handle = self
            .runtime()
            .create_program_with_binary(self.handle(), self.device, binary)?;
        Ok(UnbuiltProgram {
            scoped: Scoped::new(self.runtime(), handle),
            origin: ProgramOrigin::BinaryRebuilt,
        })
    }

    /// Allocate `len` elements of `i32`
    pub fn create_buffer(&self, flags: MemFlags, len: usize, host_data: Option<&[i32]>) -> Result<DeviceBuffer<'_>> {
        let bytes = len.checked_mul(std::mem::size_of::<i32>()).ok_or_else(|| {
            ConformanceError::InvalidRange(format!("buffer of {len} elements overflows the address space"))
        })?;
        let handle = self
            .runtime()
            .create_buffer(self.handle(), flags, bytes, host_data.map(bytemuck::cast_slice))
            .map_err(ConformanceError::runtime("create buffer"))?;
        Ok(DeviceBuffer {
            scoped: Scoped::new(self.runtime(), handle),
            len,
        })
    }
}

/// In-order command queue
pub struct Queue<'a> {
    scoped: Scoped<'a, QueueHandle>,
}

impl Queue<'_> {
    pub fn handle(&self) -> QueueHandle {
        self.scoped.handle
    }
}

/// Device buffer of `i32` elements
pub struct DeviceBuffer<'a> {
    scoped: Scoped<'a, MemHandle>,
    len: usize,
}

impl DeviceBuffer<'_> {
    pub fn handle(&self) -> MemHandle {
        self.scoped.handle
    }

    /// Length in elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Argument value binding this buffer
    pub fn as_arg(&self) -> KernelArg {
        KernelArg::Buffer(self.handle())
    }
}

// ================================================================================================
// Programs and Kernels
// ================================================================================================

/// Lifecycle origin of a built program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ProgramOrigin {
    /// Compiled from kernel source
    SourceBuilt,
    /// Reinstated from an extracted device binary
    BinaryRebuilt,
}

impl fmt::Display for ProgramOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramOrigin::SourceBuilt => write!(f, "source-built"),
            ProgramOrigin::BinaryRebuilt => write!(f, "binary-rebuilt"),
        }
    }
}

/// Program that must be built before kernels can be created from it
pub struct UnbuiltProgram<'a> {
    scoped: Scoped<'a, ProgramHandle>,
    origin: ProgramOrigin,
}

impl<'a> UnbuiltProgram<'a> {
    pub fn handle(&self) -> ProgramHandle {
        self.scoped.handle
    }

    pub fn origin(&self) -> ProgramOrigin {
        self.origin
    }

    /// Compile and link; the build log becomes the error on failure
    pub fn build(self) -> Result<BuiltProgram<'a>> {
        let runtime = self.scoped.runtime;
        let handle = self.scoped.handle;
        let origin = self.origin.to_string();
        let _span = ndrange_tracing::perf_span!("build_program", origin = origin.as_str(), program = handle.id());

        if let Err(e) = runtime.build_program(handle) {
            let log = match runtime.program_build_log(handle) {
                Ok(log) if !log.is_empty() => log,
                _ => e.to_string(),
            };
            return Err(ConformanceError::BuildFailure {
                origin: self.origin,
                log,
            });
        }

        tracing::debug!(origin = %self.origin, program = %handle, "program built");
        Ok(BuiltProgram {
            scoped: self.scoped,
            origin: self.origin,
        })
    }
}

/// Successfully built program
pub struct BuiltProgram<'a> {
    scoped: Scoped<'a, ProgramHandle>,
    origin: ProgramOrigin,
}

impl<'a> BuiltProgram<'a> {
    pub fn handle(&self) -> ProgramHandle {
        self.scoped.handle
    }

    pub fn origin(&self) -> ProgramOrigin {
        self.origin
    }

    pub fn runtime(&self) -> &'a dyn ComputeRuntime {
        self.scoped.runtime
    }

    /// Kernel object for the named entry point
    pub fn create_kernel(&self, name: &str) -> Result<Kernel<'_>> {
        let handle = self
            .runtime()
            .create_kernel(self.handle(), name)
            .map_err(ConformanceError::runtime("create kernel"))?;
        Ok(Kernel {
            scoped: Scoped::new(self.runtime(), handle),
            name: name.to_string(),
            origin: self.origin,
        })
    }
}

/// Kernel object created from a built program
pub struct Kernel<'a> {
    scoped: Scoped<'a, KernelHandle>,
    name: String,
    origin: ProgramOrigin,
}

impl Kernel<'_> {
    pub fn handle(&self) -> KernelHandle {
        self.scoped.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> ProgramOrigin {
        self.origin
    }

    /// Bind argument `index`; the index is the kernel's parameter position
    pub fn set_arg(&self, index: u32, arg: KernelArg) -> Result<()> {
        self.scoped
            .runtime
            .set_kernel_arg(self.handle(), index, arg)
            .map_err(|source| ConformanceError::ArgumentBindingFailure {
                kernel: self.name.clone(),
                index,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndrange_runtime::{CpuRuntime, RuntimeError};

    #[test]
    fn test_guards_release_in_order() {
        let rt = CpuRuntime::new();
        let device = select_device(&rt).unwrap();
        let (ctx_handle, program_handle, kernel_handle, mem_handle) = {
            let ctx = Context::create(&rt, device).unwrap();
            let buffer = ctx.create_buffer(MemFlags::READ_WRITE, 4, None).unwrap();
            let program = ctx
                .program_from_source("__kernel void k(__global int *o) { o[get_global_id(0)] = 1; }")
                .unwrap()
                .build()
                .unwrap();
            let kernel = program.create_kernel("k").unwrap();
            kernel.set_arg(0, buffer.as_arg()).unwrap();
            (ctx.handle(), program.handle(), kernel.handle(), buffer.handle())
        };

        assert!(matches!(rt.release_kernel(kernel_handle), Err(RuntimeError::InvalidHandle { .. })));
        assert!(matches!(rt.release_program(program_handle), Err(RuntimeError::InvalidHandle { .. })));
        assert!(matches!(rt.release_mem_object(mem_handle), Err(RuntimeError::InvalidHandle { .. })));
        assert!(matches!(rt.release_context(ctx_handle), Err(RuntimeError::InvalidHandle { .. })));
    }

    #[test]
    fn test_build_failure_carries_log() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let program = ctx.program_from_source("__kernel void k(__global int *o) { o[0] = x; }").unwrap();
        let handle = program.handle();
        match program.build() {
            Err(ConformanceError::BuildFailure { origin, log }) => {
                assert_eq!(origin, ProgramOrigin::SourceBuilt);
                assert!(log.contains("'x'"), "{log}");
            }
            _ => panic!("expected build failure"),
        }
        // The failed program was released with its guard
        assert!(matches!(
            rt.program_build_status(handle),
            Err(RuntimeError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_binding_failure_names_the_argument() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let program = ctx
            .program_from_source("__kernel void k(__global int *o) { o[0] = 1; }")
            .unwrap()
            .build()
            .unwrap();
        let kernel = program.create_kernel("k").unwrap();
        match kernel.set_arg(0, KernelArg::int(3)) {
            Err(ConformanceError::ArgumentBindingFailure { kernel, index, .. }) => {
                assert_eq!(kernel, "k");
                assert_eq!(index, 0);
            }
            _ => panic!("expected binding failure"),
        }
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        assert!(matches!(
            ctx.create_buffer(MemFlags::READ_WRITE, usize::MAX, None),
            Err(ConformanceError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(ProgramOrigin::SourceBuilt.to_string(), "source-built");
        assert_eq!(ProgramOrigin::BinaryRebuilt.to_string(), "binary-rebuilt");
    }
}
