//! Object table for the CPU device
//!
//! Tracks contexts, command queues, programs and kernels, the references
//! between them, and the launches waiting in each queue.

use crate::error::{Result, RuntimeError};
use crate::isa::{CompiledModule, KernelProgram};
use crate::runtime::{ContextHandle, DeviceId, KernelArg, KernelHandle, LaunchGeometry, ProgramHandle, QueueHandle};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct ContextState {
    pub device: DeviceId,
}

/// Launch recorded by `enqueue_nd_range`, with arguments captured at enqueue
pub(crate) struct PendingLaunch {
    pub kernel: Arc<KernelProgram>,
    pub args: Vec<KernelArg>,
    pub geometry: LaunchGeometry,
}

pub(crate) struct QueueState {
    pub context: ContextHandle,
    pub pending: Vec<PendingLaunch>,
}

/// Where a program's code comes from
pub(crate) enum ProgramOrigin {
    Source(String),
    Binary { module: CompiledModule, bytes: Vec<u8> },
}

pub(crate) enum BuildState {
    NotBuilt,
    Failed { log: String },
    Built { module: Arc<CompiledModule>, binary: Vec<u8> },
}

pub(crate) struct ProgramState {
    pub context: ContextHandle,
    pub origin: ProgramOrigin,
    pub build: BuildState,
    pub live_kernels: usize,
}

pub(crate) struct KernelState {
    pub program: ProgramHandle,
    pub code: Arc<KernelProgram>,
    pub args: Vec<Option<KernelArg>>,
}

/// Every non-memory object of the device
#[derive(Default)]
pub(crate) struct ObjectTable {
    next_id: u64,
    pub contexts: HashMap<u64, ContextState>,
    pub queues: HashMap<u64, QueueState>,
    pub programs: HashMap<u64, ProgramState>,
    pub kernels: HashMap<u64, KernelState>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn context(&self, handle: ContextHandle) -> Result<&ContextState> {
        self.contexts
            .get(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("context", handle.id()))
    }

    pub fn queue(&self, handle: QueueHandle) -> Result<&QueueState> {
        self.queues
            .get(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("queue", handle.id()))
    }

    pub fn queue_mut(&mut self, handle: QueueHandle) -> Result<&mut QueueState> {
        self.queues
            .get_mut(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("queue", handle.id()))
    }

    pub fn program(&self, handle: ProgramHandle) -> Result<&ProgramState> {
        self.programs
            .get(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("program", handle.id()))
    }

    pub fn program_mut(&mut self, handle: ProgramHandle) -> Result<&mut ProgramState> {
        self.programs
            .get_mut(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("program", handle.id()))
    }

    pub fn kernel(&self, handle: KernelHandle) -> Result<&KernelState> {
        self.kernels
            .get(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("kernel", handle.id()))
    }

    pub fn kernel_mut(&mut self, handle: KernelHandle) -> Result<&mut KernelState> {
        self.kernels
            .get_mut(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("kernel", handle.id()))
    }

    /// Context owning a kernel, through its program
    pub fn kernel_context(&self, handle: KernelHandle) -> Result<ContextHandle> {
        let kernel = self.kernel(handle)?;
        Ok(self.program(kernel.program)?.context)
    }

    /// Queues and programs still referencing a context
    pub fn objects_in_context(&self, context: ContextHandle) -> usize {
        let queues = self.queues.values().filter(|q| q.context == context).count();
        let programs = self.programs.values().filter(|p| p.context == context).count();
        queues + programs
    }
}
