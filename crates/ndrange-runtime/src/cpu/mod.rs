//! CPU device
//!
//! Reference implementation of [`ComputeRuntime`]. Kernels are compiled to
//! the register ISA and interpreted on the host.
//!
//! # Architecture
//!
//! ```text
//! CpuRuntime
//! ├── DeviceProfile  - limits and binary fingerprint of the device
//! ├── ObjectTable    - contexts, queues, programs, kernels, pending launches
//! ├── MemoryManager  - buffers with access flags
//! └── CpuExecutor    - rayon over work-groups, lock-step barrier phases
//! ```
//!
//! Lock order is object table first, then memory. Launches execute with the
//! object table unlocked.
//!
//! # Usage
//!
//! ```rust
//! use ndrange_runtime::{ComputeRuntime, CpuRuntime, KernelArg, MemFlags, NdRange, WorkSize};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = CpuRuntime::new();
//! let device = rt.devices(rt.platforms()?[0])?[0];
//! let ctx = rt.create_context(device)?;
//! let queue = rt.create_command_queue(ctx, device)?;
//!
//! let program = rt.create_program_with_source(ctx, "__kernel void fill(__global int *out) { out[get_global_id(0)] = 7; }")?;
//! rt.build_program(program)?;
//! let kernel = rt.create_kernel(program, "fill")?;
//!
//! let out = rt.create_buffer(ctx, MemFlags::WRITE_ONLY, 16, None)?;
//! rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(out))?;
//! rt.enqueue_nd_range(queue, kernel, &NdRange::new(WorkSize::one(4)))?;
//!
//! let mut bytes = [0u8; 16];
//! rt.enqueue_read_buffer(queue, out, 0, &mut bytes)?;
//! assert_eq!(&bytes[..4], &7i32.to_le_bytes());
//! # Ok(())
//! # }
//! ```

mod executor;
pub(crate) mod memory;
mod objects;

use crate::binary;
use crate::compiler::compile;
use crate::error::{Result, RuntimeError};
use crate::isa::{CompiledModule, ParamKind};
use crate::runtime::{
    BuildStatus, ComputeRuntime, ContextHandle, DeviceId, DeviceInfo, KernelArg, KernelHandle, MemFlags, MemHandle,
    NdRange, PlatformId, ProgramHandle, QueueHandle,
};
use executor::CpuExecutor;
use memory::MemoryManager;
use ndrange_tracing::{perf_span, performance};
use objects::{BuildState, ContextState, KernelState, ObjectTable, PendingLaunch, ProgramOrigin, ProgramState, QueueState};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;

/// Platform exposed by the CPU runtime
const CPU_PLATFORM: PlatformId = PlatformId(1);

/// The single device of the CPU platform
const CPU_DEVICE: DeviceId = DeviceId(1);

/// Fingerprint of binaries produced by the reference profile
pub const REFERENCE_FINGERPRINT: u64 = fnv1a(b"ndrange-cpu/isa-v1");

const fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

// ================================================================================================
// Device Profile
// ================================================================================================

/// Limits and identity of the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    info: DeviceInfo,
}

impl DeviceProfile {
    /// Reference CPU device: work-groups up to 256 items, binaries tagged
    /// with [`REFERENCE_FINGERPRINT`]
    pub fn reference() -> Self {
        Self {
            info: DeviceInfo {
                name: "ndrange reference CPU".to_string(),
                vendor: "ndrange".to_string(),
                version: format!("ndrange-cpu {}", env!("CARGO_PKG_VERSION")),
                max_work_group_size: 256,
                max_work_item_sizes: [256, 256, 64],
                binary_fingerprint: REFERENCE_FINGERPRINT,
            },
        }
    }

    /// Same device, accepting and producing binaries with another fingerprint
    pub fn with_fingerprint(mut self, fingerprint: u64) -> Self {
        self.info.binary_fingerprint = fingerprint;
        self
    }

    /// Same device with a different work-group size limit
    pub fn with_max_work_group_size(mut self, size: usize) -> Self {
        self.info.max_work_group_size = size;
        self
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::reference()
    }
}

// ================================================================================================
// CPU Runtime
// ================================================================================================

/// CPU implementation of [`ComputeRuntime`]
///
/// Cloning shares the device state.
#[derive(Clone)]
pub struct CpuRuntime {
    profile: Arc<DeviceProfile>,
    objects: Arc<Mutex<ObjectTable>>,
    memory: Arc<RwLock<MemoryManager>>,
}

impl CpuRuntime {
    /// Create a runtime exposing the reference device
    pub fn new() -> Self {
        Self::with_profile(DeviceProfile::reference())
    }

    /// Create a runtime exposing a custom device
    pub fn with_profile(profile: DeviceProfile) -> Self {
        Self {
            profile: Arc::new(profile),
            objects: Arc::new(Mutex::new(ObjectTable::new())),
            memory: Arc::new(RwLock::new(MemoryManager::new())),
        }
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    fn check_device(&self, device: DeviceId) -> Result<()> {
        if device == CPU_DEVICE {
            Ok(())
        } else {
            Err(RuntimeError::invalid_handle("device", device.id()))
        }
    }

    /// Run every launch waiting in `queue`, in enqueue order
    ///
    /// The queue is drained before the first launch runs, so an execution
    /// error leaves it empty.
    fn flush(&self, queue: QueueHandle) -> Result<()> {
        let pending = std::mem::take(&mut self.objects.lock().queue_mut(queue)?.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let executor = CpuExecutor::new(Arc::clone(&self.memory));
        for launch in &pending {
            let start = Instant::now();
            executor.execute(launch)?;
            performance::record_dispatch(
                &launch.kernel.name,
                launch.geometry.total_work_items(),
                launch.geometry.total_groups(),
                start.elapsed().as_micros() as u64,
            );
        }
        Ok(())
    }

    /// Queue context, checked against the buffer's context
    fn transfer_target(&self, queue: QueueHandle, mem: MemHandle) -> Result<()> {
        let context = self.objects.lock().queue(queue)?.context;
        let buffer_context = self.memory.read().buffer_context(mem)?;
        if buffer_context != context {
            return Err(RuntimeError::ContextMismatch {
                kind: "mem",
                id: mem.id(),
                context: context.id(),
            });
        }
        Ok(())
    }
}

impl Default for CpuRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of compiling a program, computed without holding the object table
enum BuildOutcome {
    Built { module: CompiledModule, binary: Vec<u8> },
    Failed { log: String },
}

fn build_from_source(source: &str, fingerprint: u64) -> BuildOutcome {
    let module = match compile(source) {
        Ok(module) => module,
        Err(e) => return BuildOutcome::Failed { log: e.to_log_line() },
    };
    if let Err(e) = module.validate() {
        return BuildOutcome::Failed { log: e.to_string() };
    }
    match binary::encode(&module, fingerprint) {
        Ok(binary) => BuildOutcome::Built { module, binary },
        Err(e) => BuildOutcome::Failed { log: e.to_string() },
    }
}

impl ComputeRuntime for CpuRuntime {
    fn platforms(&self) -> Result<Vec<PlatformId>> {
        Ok(vec![CPU_PLATFORM])
    }

    fn devices(&self, platform: PlatformId) -> Result<Vec<DeviceId>> {
        if platform != CPU_PLATFORM {
            return Err(RuntimeError::DeviceNotFound(format!("no devices on {platform}")));
        }
        Ok(vec![CPU_DEVICE])
    }

    fn device_info(&self, device: DeviceId) -> Result<DeviceInfo> {
        self.check_device(device)?;
        Ok(self.profile.info.clone())
    }

    fn create_context(&self, device: DeviceId) -> Result<ContextHandle> {
        self.check_device(device)?;
        let mut objects = self.objects.lock();
        let handle = ContextHandle(objects.allocate_id());
        objects.contexts.insert(handle.id(), ContextState { device });
        tracing::debug!(context = %handle, device = %device, "context created");
        Ok(handle)
    }

    fn create_command_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        self.check_device(device)?;
        let mut objects = self.objects.lock();
        if objects.context(context)?.device != device {
            return Err(RuntimeError::ContextMismatch {
                kind: "device",
                id: device.id(),
                context: context.id(),
            });
        }
        let handle = QueueHandle(objects.allocate_id());
        objects.queues.insert(
            handle.id(),
            QueueState {
                context,
                pending: Vec::new(),
            },
        );
        Ok(handle)
    }

    // ============================================================================================
    // Programs
    // ============================================================================================

    fn create_program_with_source(&self, context: ContextHandle, source: &str) -> Result<ProgramHandle> {
        let mut objects = self.objects.lock();
        objects.context(context)?;
        let handle = ProgramHandle(objects.allocate_id());
        objects.programs.insert(
            handle.id(),
            ProgramState {
                context,
                origin: ProgramOrigin::Source(source.to_string()),
                build: BuildState::NotBuilt,
                live_kernels: 0,
            },
        );
        Ok(handle)
    }

    fn create_program_with_binary(
        &self,
        context: ContextHandle,
        device: DeviceId,
        binary: &[u8],
    ) -> Result<ProgramHandle> {
        self.check_device(device)?;
        let module = binary::decode(binary, self.profile.info.binary_fingerprint)
            .map_err(|e| RuntimeError::InvalidBinary(e.to_string()))?;

        let mut objects = self.objects.lock();
        if objects.context(context)?.device != device {
            return Err(RuntimeError::ContextMismatch {
                kind: "device",
                id: device.id(),
                context: context.id(),
            });
        }
        let handle = ProgramHandle(objects.allocate_id());
        objects.programs.insert(
            handle.id(),
            ProgramState {
                context,
                origin: ProgramOrigin::Binary {
                    module,
                    bytes: binary.to_vec(),
                },
                build: BuildState::NotBuilt,
                live_kernels: 0,
            },
        );
        tracing::debug!(program = %handle, size_bytes = binary.len(), "program created from binary");
        Ok(handle)
    }

    fn build_program(&self, program: ProgramHandle) -> Result<()> {
        let _span = perf_span!("cpu_build_program", program = program.id());

        let origin = {
            let objects = self.objects.lock();
            let state = objects.program(program)?;
            if state.live_kernels > 0 {
                return Err(RuntimeError::ProgramInUse {
                    program: program.id(),
                    kernels: state.live_kernels,
                });
            }
            match &state.origin {
                ProgramOrigin::Source(source) => ProgramOrigin::Source(source.clone()),
                ProgramOrigin::Binary { module, bytes } => ProgramOrigin::Binary {
                    module: module.clone(),
                    bytes: bytes.clone(),
                },
            }
        };

        let outcome = match origin {
            ProgramOrigin::Source(source) => build_from_source(&source, self.profile.info.binary_fingerprint),
            ProgramOrigin::Binary { module, bytes } => match module.validate() {
                Ok(()) => BuildOutcome::Built { module, binary: bytes },
                Err(e) => BuildOutcome::Failed { log: e.to_string() },
            },
        };

        let mut objects = self.objects.lock();
        let state = objects.program_mut(program)?;
        match outcome {
            BuildOutcome::Built { module, binary } => {
                tracing::debug!(
                    program = %program,
                    kernels = module.kernels.len(),
                    binary_bytes = binary.len(),
                    "program built"
                );
                state.build = BuildState::Built {
                    module: Arc::new(module),
                    binary,
                };
                Ok(())
            }
            BuildOutcome::Failed { log } => {
                tracing::debug!(program = %program, log = %log, "program build failed");
                state.build = BuildState::Failed { log: log.clone() };
                Err(RuntimeError::BuildFailure { log })
            }
        }
    }

    fn program_build_status(&self, program: ProgramHandle) -> Result<BuildStatus> {
        let objects = self.objects.lock();
        Ok(match objects.program(program)?.build {
            BuildState::NotBuilt => BuildStatus::None,
            BuildState::Failed { .. } => BuildStatus::Error,
            BuildState::Built { .. } => BuildStatus::Success,
        })
    }

    fn program_build_log(&self, program: ProgramHandle) -> Result<String> {
        let objects = self.objects.lock();
        Ok(match &objects.program(program)?.build {
            BuildState::Failed { log } => log.clone(),
            _ => String::new(),
        })
    }

    fn program_binary_size(&self, program: ProgramHandle) -> Result<usize> {
        let objects = self.objects.lock();
        match &objects.program(program)?.build {
            BuildState::Built { binary, .. } => Ok(binary.len()),
            _ => Err(RuntimeError::ProgramNotBuilt(program.id())),
        }
    }

    fn program_binary_into(&self, program: ProgramHandle, dst: &mut [u8]) -> Result<()> {
        let objects = self.objects.lock();
        match &objects.program(program)?.build {
            BuildState::Built { binary, .. } if binary.len() == dst.len() => {
                dst.copy_from_slice(binary);
                Ok(())
            }
            BuildState::Built { binary, .. } => Err(RuntimeError::InvalidBinarySize {
                expected: binary.len(),
                actual: dst.len(),
            }),
            _ => Err(RuntimeError::ProgramNotBuilt(program.id())),
        }
    }

    // ============================================================================================
    // Memory
    // ============================================================================================

    fn create_buffer(
        &self,
        context: ContextHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemHandle> {
        let objects = self.objects.lock();
        objects.context(context)?;
        self.memory.write().allocate_buffer(context, flags, size, host_data)
    }

    fn buffer_size(&self, mem: MemHandle) -> Result<usize> {
        self.memory.read().buffer_size(mem)
    }

    // ============================================================================================
    // Kernels
    // ============================================================================================

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> Result<KernelHandle> {
        let mut objects = self.objects.lock();
        let state = objects.program_mut(program)?;
        let code = match &state.build {
            BuildState::Built { module, .. } => module
                .kernel(name)
                .cloned()
                .ok_or_else(|| RuntimeError::KernelNotFound(name.to_string()))?,
            _ => return Err(RuntimeError::ProgramNotBuilt(program.id())),
        };
        state.live_kernels += 1;

        let handle = KernelHandle(objects.allocate_id());
        let args = vec![None; code.params.len()];
        objects.kernels.insert(
            handle.id(),
            KernelState {
                program,
                code: Arc::new(code),
                args,
            },
        );
        Ok(handle)
    }

    fn kernel_arg_count(&self, kernel: KernelHandle) -> Result<usize> {
        Ok(self.objects.lock().kernel(kernel)?.code.params.len())
    }

    fn set_kernel_arg(&self, kernel: KernelHandle, index: u32, arg: KernelArg) -> Result<()> {
        let mut objects = self.objects.lock();
        let context = objects.kernel_context(kernel)?;
        let state = objects.kernel_mut(kernel)?;
        let name = &state.code.name;

        let param = state
            .code
            .params
            .get(index as usize)
            .ok_or_else(|| RuntimeError::InvalidArgIndex {
                kernel: name.clone(),
                index,
                count: state.code.params.len(),
            })?;

        match (param.kind, &arg) {
            (ParamKind::Buffer { .. }, KernelArg::Buffer(mem)) => {
                if self.memory.read().buffer_context(*mem)? != context {
                    return Err(RuntimeError::ContextMismatch {
                        kind: "mem",
                        id: mem.id(),
                        context: context.id(),
                    });
                }
            }
            (ParamKind::Scalar { ty }, KernelArg::Scalar(bytes)) => {
                if bytes.len() != ty.size_bytes() {
                    return Err(RuntimeError::InvalidArgSize {
                        kernel: name.clone(),
                        index,
                        expected: ty.size_bytes(),
                        actual: bytes.len(),
                    });
                }
            }
            (ParamKind::Buffer { .. }, KernelArg::Scalar(_)) => {
                return Err(RuntimeError::InvalidArgValue {
                    kernel: name.clone(),
                    index,
                    reason: format!("parameter '{}' expects a memory object", param.name),
                })
            }
            (ParamKind::Scalar { .. }, KernelArg::Buffer(_)) => {
                return Err(RuntimeError::InvalidArgValue {
                    kernel: name.clone(),
                    index,
                    reason: format!("parameter '{}' expects a scalar value", param.name),
                })
            }
        }

        state.args[index as usize] = Some(arg);
        Ok(())
    }

    // ============================================================================================
    // Commands
    // ============================================================================================

    fn enqueue_nd_range(&self, queue: QueueHandle, kernel: KernelHandle, range: &NdRange) -> Result<()> {
        let mut objects = self.objects.lock();
        let queue_context = objects.queue(queue)?.context;
        if objects.kernel_context(kernel)? != queue_context {
            return Err(RuntimeError::ContextMismatch {
                kind: "kernel",
                id: kernel.id(),
                context: queue_context.id(),
            });
        }

        let state = objects.kernel(kernel)?;
        let missing: Vec<u32> = state
            .args
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.is_none())
            .map(|(i, _)| i as u32)
            .collect();
        if !missing.is_empty() {
            return Err(RuntimeError::MissingKernelArgs {
                kernel: state.code.name.clone(),
                missing,
            });
        }

        let geometry = range.resolve(&self.profile.info)?;
        let launch = PendingLaunch {
            kernel: Arc::clone(&state.code),
            args: state.args.iter().flatten().cloned().collect(),
            geometry,
        };
        tracing::debug!(
            kernel = %launch.kernel.name,
            global = ?launch.geometry.global,
            local = ?launch.geometry.local,
            offset = ?launch.geometry.offset,
            "launch enqueued"
        );
        objects.queue_mut(queue)?.pending.push(launch);
        Ok(())
    }

    fn enqueue_write_buffer(&self, queue: QueueHandle, mem: MemHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.transfer_target(queue, mem)?;
        self.flush(queue)?;

        let start = Instant::now();
        self.memory.write().copy_to_buffer(mem, offset, data)?;
        performance::record_transfer(data.len(), "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn enqueue_read_buffer(&self, queue: QueueHandle, mem: MemHandle, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.transfer_target(queue, mem)?;
        self.flush(queue)?;

        let start = Instant::now();
        self.memory.read().copy_from_buffer(mem, offset, dst)?;
        performance::record_transfer(dst.len(), "D2H", start.elapsed().as_micros() as u64);
        Ok(())
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        self.flush(queue)
    }

    // ============================================================================================
    // Release
    // ============================================================================================

    fn release_mem_object(&self, mem: MemHandle) -> Result<()> {
        self.memory.write().free_buffer(mem)
    }

    fn release_kernel(&self, kernel: KernelHandle) -> Result<()> {
        let mut objects = self.objects.lock();
        let state = objects
            .kernels
            .remove(&kernel.id())
            .ok_or_else(|| RuntimeError::invalid_handle("kernel", kernel.id()))?;
        if let Some(program) = objects.programs.get_mut(&state.program.id()) {
            program.live_kernels = program.live_kernels.saturating_sub(1);
        }
        Ok(())
    }

    fn release_program(&self, program: ProgramHandle) -> Result<()> {
        let mut objects = self.objects.lock();
        let live_kernels = objects.program(program)?.live_kernels;
        if live_kernels > 0 {
            return Err(RuntimeError::ProgramInUse {
                program: program.id(),
                kernels: live_kernels,
            });
        }
        objects.programs.remove(&program.id());
        Ok(())
    }

    fn release_command_queue(&self, queue: QueueHandle) -> Result<()> {
        let state = self
            .objects
            .lock()
            .queues
            .remove(&queue.id())
            .ok_or_else(|| RuntimeError::invalid_handle("queue", queue.id()))?;
        if !state.pending.is_empty() {
            tracing::debug!(queue = %queue, discarded = state.pending.len(), "pending launches discarded");
        }
        Ok(())
    }

    fn release_context(&self, context: ContextHandle) -> Result<()> {
        let mut objects = self.objects.lock();
        objects.context(context)?;
        let live = objects.objects_in_context(context) + self.memory.read().buffers_in_context(context);
        if live > 0 {
            return Err(RuntimeError::ContextInUse {
                context: context.id(),
                objects: live,
            });
        }
        objects.contexts.remove(&context.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::WorkSize;

    const VEC_ADD: &str = "
        __kernel void vecAdd(__global const int *a, __global const int *b, __global int *c) {
            int i = get_global_id(0) * get_global_size(1) + get_global_id(1);
            c[i] = a[i] + b[i] + get_local_id(0) * get_local_size(1) + get_local_id(1);
        }";

    const BARRIER: &str = "
        __kernel void smooth(global int *buffer) {
            private int a = buffer[get_global_id(0) - 1] + buffer[get_global_id(0)] + buffer[get_global_id(0) + 1];
            barrier(CLK_LOCAL_MEM_FENCE);
            buffer[get_global_id(0)] = a / 3;
        }";

    struct Setup {
        rt: CpuRuntime,
        ctx: ContextHandle,
        queue: QueueHandle,
    }

    fn setup() -> Setup {
        let rt = CpuRuntime::new();
        let device = rt.devices(rt.platforms().unwrap()[0]).unwrap()[0];
        let ctx = rt.create_context(device).unwrap();
        let queue = rt.create_command_queue(ctx, device).unwrap();
        Setup { rt, ctx, queue }
    }

    fn built(s: &Setup, source: &str) -> ProgramHandle {
        let program = s.rt.create_program_with_source(s.ctx, source).unwrap();
        s.rt.build_program(program).unwrap();
        program
    }

    fn ints(values: &[i32]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }

    fn read_ints(s: &Setup, mem: MemHandle, len: usize) -> Vec<i32> {
        let mut bytes = vec![0u8; len * 4];
        s.rt.enqueue_read_buffer(s.queue, mem, 0, &mut bytes).unwrap();
        bytemuck::cast_slice(&bytes).to_vec()
    }

    fn run_vec_add(s: &Setup, program: ProgramHandle, local: WorkSize) -> Vec<i32> {
        let n = 1024;
        let a: Vec<i32> = (0..n).map(|i| 2 * i - 1).collect();
        let b: Vec<i32> = (0..n).map(|i| -i).collect();
        let a_mem = s.rt.create_buffer(s.ctx, MemFlags::READ_ONLY, 4096, None).unwrap();
        let b_mem = s.rt.create_buffer(s.ctx, MemFlags::READ_ONLY, 4096, None).unwrap();
        let c_mem = s.rt.create_buffer(s.ctx, MemFlags::WRITE_ONLY, 4096, None).unwrap();
        s.rt.enqueue_write_buffer(s.queue, a_mem, 0, &ints(&a)).unwrap();
        s.rt.enqueue_write_buffer(s.queue, b_mem, 0, &ints(&b)).unwrap();

        let kernel = s.rt.create_kernel(program, "vecAdd").unwrap();
        for (i, mem) in [a_mem, b_mem, c_mem].into_iter().enumerate() {
            s.rt.set_kernel_arg(kernel, i as u32, KernelArg::Buffer(mem)).unwrap();
        }
        s.rt
            .enqueue_nd_range(s.queue, kernel, &NdRange::new(WorkSize::two(16, 64)).with_local(local))
            .unwrap();
        s.rt.finish(s.queue).unwrap();
        let out = read_ints(s, c_mem, 1024);

        s.rt.release_kernel(kernel).unwrap();
        for mem in [a_mem, b_mem, c_mem] {
            s.rt.release_mem_object(mem).unwrap();
        }
        out
    }

    fn binary_of(s: &Setup, program: ProgramHandle) -> Vec<u8> {
        let size = s.rt.program_binary_size(program).unwrap();
        let mut bytes = vec![0u8; size];
        s.rt.program_binary_into(program, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_vec_add_values() {
        let s = setup();
        let program = built(&s, VEC_ADD);
        let out = run_vec_add(&s, program, WorkSize::two(4, 8));
        for (i, value) in out.iter().enumerate() {
            let (g0, g1) = (i / 64, i % 64);
            let expected = (i as i32 - 1) + ((g0 % 4) * 8 + g1 % 8) as i32;
            assert_eq!(*value, expected, "index {i}");
        }
    }

    #[test]
    fn test_binary_rebuild_is_equivalent() {
        let s = setup();
        let source_built = built(&s, VEC_ADD);
        let bytes = binary_of(&s, source_built);
        assert_eq!(&bytes[..4], b"NDRB");

        let device = s.rt.devices(CPU_PLATFORM).unwrap()[0];
        let rebuilt = s.rt.create_program_with_binary(s.ctx, device, &bytes).unwrap();
        assert_eq!(s.rt.program_build_status(rebuilt).unwrap(), BuildStatus::None);
        assert!(matches!(
            s.rt.create_kernel(rebuilt, "vecAdd"),
            Err(RuntimeError::ProgramNotBuilt(_))
        ));
        s.rt.build_program(rebuilt).unwrap();
        assert_eq!(binary_of(&s, rebuilt), bytes);

        let local = WorkSize::two(4, 8);
        assert_eq!(run_vec_add(&s, source_built, local), run_vec_add(&s, rebuilt, local));
    }

    #[test]
    fn test_foreign_binary_rejected() {
        let s = setup();
        let program = built(&s, VEC_ADD);
        let bytes = binary_of(&s, program);

        let other = CpuRuntime::with_profile(DeviceProfile::reference().with_fingerprint(42));
        let ctx = other.create_context(CPU_DEVICE).unwrap();
        assert!(matches!(
            other.create_program_with_binary(ctx, CPU_DEVICE, &bytes),
            Err(RuntimeError::InvalidBinary(_))
        ));
        assert!(matches!(
            s.rt.create_program_with_binary(s.ctx, CPU_DEVICE, &bytes[..8]),
            Err(RuntimeError::InvalidBinary(_))
        ));
    }

    #[test]
    fn test_binary_introspection_errors() {
        let s = setup();
        let program = s.rt.create_program_with_source(s.ctx, VEC_ADD).unwrap();
        assert!(matches!(
            s.rt.program_binary_size(program),
            Err(RuntimeError::ProgramNotBuilt(_))
        ));
        s.rt.build_program(program).unwrap();
        let size = s.rt.program_binary_size(program).unwrap();
        let mut short = vec![0u8; size - 1];
        assert!(matches!(
            s.rt.program_binary_into(program, &mut short),
            Err(RuntimeError::InvalidBinarySize { .. })
        ));
    }

    #[test]
    fn test_build_failure_log() {
        let s = setup();
        let program = s
            .rt
            .create_program_with_source(s.ctx, "__kernel void k(__global int *a) { a[0] = b; }")
            .unwrap();
        let err = s.rt.build_program(program).unwrap_err();
        assert!(matches!(err, RuntimeError::BuildFailure { .. }));
        assert_eq!(s.rt.program_build_status(program).unwrap(), BuildStatus::Error);
        let log = s.rt.program_build_log(program).unwrap();
        assert!(log.contains("undeclared identifier 'b'"), "{log}");
    }

    #[test]
    fn test_barrier_pass() {
        let s = setup();
        let program = built(&s, BARRIER);
        let seed: Vec<i32> = (0..8).map(|i| 3 * i).collect();
        let buf = s
            .rt
            .create_buffer(s.ctx, MemFlags::COPY_HOST_PTR, 32, Some(&ints(&seed)))
            .unwrap();
        let kernel = s.rt.create_kernel(program, "smooth").unwrap();
        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(buf)).unwrap();
        let range = NdRange::new(WorkSize::one(6))
            .with_local(WorkSize::one(6))
            .with_offset(WorkSize::one(1));
        s.rt.enqueue_nd_range(s.queue, kernel, &range).unwrap();
        assert_eq!(read_ints(&s, buf, 8), seed);
    }

    #[test]
    fn test_barrier_without_offset_fails_and_drains_queue() {
        let s = setup();
        let program = built(&s, BARRIER);
        let buf = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 32, None).unwrap();
        let kernel = s.rt.create_kernel(program, "smooth").unwrap();
        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(buf)).unwrap();
        s.rt.enqueue_nd_range(s.queue, kernel, &NdRange::new(WorkSize::one(6))).unwrap();

        let err = s.rt.finish(s.queue).unwrap_err();
        assert!(matches!(err, RuntimeError::ExecutionError { .. }), "{err}");
        s.rt.finish(s.queue).unwrap();
    }

    #[test]
    fn test_argument_binding_errors() {
        let s = setup();
        let program = built(&s, "__kernel void k(__global int *out, int n) { out[0] = n; }");
        let kernel = s.rt.create_kernel(program, "k").unwrap();
        let out = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 4, None).unwrap();
        assert_eq!(s.rt.kernel_arg_count(kernel).unwrap(), 2);

        assert!(matches!(
            s.rt.set_kernel_arg(kernel, 2, KernelArg::int(1)),
            Err(RuntimeError::InvalidArgIndex { count: 2, .. })
        ));
        assert!(matches!(
            s.rt.set_kernel_arg(kernel, 0, KernelArg::int(1)),
            Err(RuntimeError::InvalidArgValue { .. })
        ));
        assert!(matches!(
            s.rt.set_kernel_arg(kernel, 1, KernelArg::Buffer(out)),
            Err(RuntimeError::InvalidArgValue { .. })
        ));
        assert!(matches!(
            s.rt.set_kernel_arg(kernel, 1, KernelArg::long(1)),
            Err(RuntimeError::InvalidArgSize { expected: 4, actual: 8, .. })
        ));
        assert!(matches!(
            s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(MemHandle(999))),
            Err(RuntimeError::InvalidHandle { kind: "mem", .. })
        ));

        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(out)).unwrap();
        let range = NdRange::new(WorkSize::one(1));
        match s.rt.enqueue_nd_range(s.queue, kernel, &range) {
            Err(RuntimeError::MissingKernelArgs { missing, .. }) => assert_eq!(missing, vec![1]),
            other => panic!("expected missing args, got {other:?}"),
        }

        s.rt.set_kernel_arg(kernel, 1, KernelArg::int(-5)).unwrap();
        s.rt.enqueue_nd_range(s.queue, kernel, &range).unwrap();
        assert_eq!(read_ints(&s, out, 1), vec![-5]);
    }

    #[test]
    fn test_arguments_captured_at_enqueue() {
        let s = setup();
        let program = built(&s, "__kernel void k(__global int *out, int n) { out[0] = n; }");
        let kernel = s.rt.create_kernel(program, "k").unwrap();
        let out = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 4, None).unwrap();
        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(out)).unwrap();
        s.rt.set_kernel_arg(kernel, 1, KernelArg::int(1)).unwrap();
        s.rt.enqueue_nd_range(s.queue, kernel, &NdRange::new(WorkSize::one(1))).unwrap();
        s.rt.set_kernel_arg(kernel, 1, KernelArg::int(2)).unwrap();
        assert_eq!(read_ints(&s, out, 1), vec![1]);
    }

    #[test]
    fn test_release_rules() {
        let s = setup();
        let program = built(&s, VEC_ADD);
        let kernel = s.rt.create_kernel(program, "vecAdd").unwrap();
        let mem = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 4, None).unwrap();

        assert!(matches!(
            s.rt.release_program(program),
            Err(RuntimeError::ProgramInUse { kernels: 1, .. })
        ));
        assert!(matches!(
            s.rt.build_program(program),
            Err(RuntimeError::ProgramInUse { .. })
        ));
        assert!(matches!(
            s.rt.release_context(s.ctx),
            Err(RuntimeError::ContextInUse { objects: 3, .. })
        ));

        s.rt.release_kernel(kernel).unwrap();
        s.rt.release_program(program).unwrap();
        s.rt.release_mem_object(mem).unwrap();
        s.rt.release_command_queue(s.queue).unwrap();
        s.rt.release_context(s.ctx).unwrap();

        assert!(matches!(
            s.rt.release_kernel(kernel),
            Err(RuntimeError::InvalidHandle { kind: "kernel", .. })
        ));
        assert!(matches!(
            s.rt.release_context(s.ctx),
            Err(RuntimeError::InvalidHandle { kind: "context", .. })
        ));
    }

    #[test]
    fn test_release_discards_pending_launches() {
        let s = setup();
        let program = built(&s, "__kernel void k(__global int *out) { out[get_global_id(0)] = 7; }");
        let kernel = s.rt.create_kernel(program, "k").unwrap();
        let out = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 16, None).unwrap();
        let small = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 4, None).unwrap();

        // Would run out of bounds if executed
        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(small)).unwrap();
        s.rt.enqueue_nd_range(s.queue, kernel, &NdRange::new(WorkSize::one(4))).unwrap();
        s.rt.set_kernel_arg(kernel, 0, KernelArg::Buffer(out)).unwrap();
        s.rt.enqueue_nd_range(s.queue, kernel, &NdRange::new(WorkSize::one(4))).unwrap();
        s.rt.release_mem_object(small).unwrap();
        s.rt.release_command_queue(s.queue).unwrap();

        let device = s.rt.devices(CPU_PLATFORM).unwrap()[0];
        let queue = s.rt.create_command_queue(s.ctx, device).unwrap();
        let mut bytes = vec![0u8; 16];
        s.rt.enqueue_read_buffer(queue, out, 0, &mut bytes).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, i32>(&bytes), &[0, 0, 0, 0]);

        assert!(matches!(
            s.rt.release_command_queue(s.queue),
            Err(RuntimeError::InvalidHandle { kind: "queue", .. })
        ));
    }

    #[test]
    fn test_unknown_kernel_and_launch_config() {
        let s = setup();
        let program = built(&s, VEC_ADD);
        assert!(matches!(
            s.rt.create_kernel(program, "missing"),
            Err(RuntimeError::KernelNotFound(_))
        ));

        let kernel = s.rt.create_kernel(program, "vecAdd").unwrap();
        let mem = s.rt.create_buffer(s.ctx, MemFlags::READ_WRITE, 16, None).unwrap();
        for i in 0..3 {
            s.rt.set_kernel_arg(kernel, i, KernelArg::Buffer(mem)).unwrap();
        }
        let range = NdRange::new(WorkSize::two(16, 64)).with_local(WorkSize::two(3, 8));
        assert!(matches!(
            s.rt.enqueue_nd_range(s.queue, kernel, &range),
            Err(RuntimeError::InvalidLaunchConfig(_))
        ));
    }
}
