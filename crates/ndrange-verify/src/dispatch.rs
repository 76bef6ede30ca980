//! Dispatch Engine
//!
//! Orchestrates one program variant at a time:
//! build-or-reinstate → create kernel → bind arguments by position →
//! enqueue → drain the queue → read results.
//!
//! Launches only record work. Results are read after [`DispatchEngine::finish`]
//! (or through a blocking read, which drains the queue first).

use crate::codec::{self, SerializedBinary};
use crate::error::{ConformanceError, Result};
use crate::resources::{BuiltProgram, Context, DeviceBuffer, Kernel, Queue};
use ndrange_runtime::{KernelArg, MemFlags, NdRange, WorkSize};
use ndrange_tracing::{perf_span, timed_block};

/// Launch extents: global size, optional local size, optional global offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRange {
    pub global: Vec<usize>,
    pub local: Option<Vec<usize>>,
    pub offset: Option<Vec<usize>>,
}

impl LaunchRange {
    pub fn new(global: &[usize]) -> Self {
        Self {
            global: global.to_vec(),
            local: None,
            offset: None,
        }
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn with_offset(mut self, offset: &[usize]) -> Self {
        self.offset = Some(offset.to_vec());
        self
    }

    fn to_nd_range(&self) -> Result<NdRange> {
        let size = |dims: &[usize]| WorkSize::new(dims).map_err(|e| ConformanceError::InvalidRange(e.to_string()));

        let mut range = NdRange::new(size(&self.global)?);
        if let Some(local) = &self.local {
            range = range.with_local(size(local)?);
        }
        if let Some(offset) = &self.offset {
            range = range.with_offset(size(offset)?);
        }
        Ok(range)
    }
}

/// Host-side driver for one context and its in-order queue
pub struct DispatchEngine<'c> {
    context: &'c Context<'c>,
    queue: Queue<'c>,
    enqueued: usize,
}

impl<'c> DispatchEngine<'c> {
    pub fn new(context: &'c Context<'c>) -> Result<Self> {
        Ok(Self {
            context,
            queue: context.create_queue()?,
            enqueued: 0,
        })
    }

    pub fn context(&self) -> &'c Context<'c> {
        self.context
    }

    /// Launches recorded so far
    pub fn enqueued(&self) -> usize {
        self.enqueued
    }

    // ============================================================================================
    // Programs
    // ============================================================================================

    /// Build a program from kernel source
    pub fn build_from_source(&self, source: &str) -> Result<BuiltProgram<'c>> {
        self.context.program_from_source(source)?.build()
    }

    /// Extract the device binary of a built program
    pub fn extract(&self, program: &BuiltProgram<'_>) -> Result<SerializedBinary> {
        Ok(codec::extract(program)?)
    }

    /// Reinstate a binary and build it
    pub fn rebuild_from_binary(&self, binary: &SerializedBinary) -> Result<BuiltProgram<'c>> {
        codec::reinstate(self.context, binary)?.build()
    }

    // ============================================================================================
    // Buffers
    // ============================================================================================

    /// Kernel-read-only buffer filled by a blocking write
    pub fn input_buffer(&self, data: &[i32]) -> Result<DeviceBuffer<'c>> {
        let buffer = self.context.create_buffer(MemFlags::READ_ONLY, data.len(), None)?;
        self.write(&buffer, data)?;
        Ok(buffer)
    }

    /// Kernel-write-only buffer of `len` zeroed elements
    pub fn output_buffer(&self, len: usize) -> Result<DeviceBuffer<'c>> {
        self.context.create_buffer(MemFlags::WRITE_ONLY, len, None)
    }

    /// Read-write buffer initialized from host data at creation
    pub fn host_copy_buffer(&self, data: &[i32]) -> Result<DeviceBuffer<'c>> {
        self.context
            .create_buffer(MemFlags::COPY_HOST_PTR, data.len(), Some(data))
    }

    /// Blocking host-to-device write
    pub fn write(&self, buffer: &DeviceBuffer<'_>, data: &[i32]) -> Result<()> {
        self.context
            .runtime()
            .enqueue_write_buffer(self.queue.handle(), buffer.handle(), 0, bytemuck::cast_slice(data))
            .map_err(ConformanceError::dispatch("write buffer"))
    }

    /// Blocking device-to-host read of the whole buffer
    pub fn read(&self, buffer: &DeviceBuffer<'_>) -> Result<Vec<i32>> {
        let mut out = vec![0i32; buffer.len()];
        self.context
            .runtime()
            .enqueue_read_buffer(
                self.queue.handle(),
                buffer.handle(),
                0,
                bytemuck::cast_slice_mut(&mut out),
            )
            .map_err(ConformanceError::dispatch("read buffer"))?;
        Ok(out)
    }

    // ============================================================================================
    // Launches
    // ============================================================================================

    /// Bind `args` in order, argument `i` to parameter `i`
    pub fn bind(&self, kernel: &Kernel<'_>, args: &[KernelArg]) -> Result<()> {
        for (index, arg) in args.iter().enumerate() {
            kernel.set_arg(index as u32, arg.clone())?;
        }
        Ok(())
    }

    /// Record a launch on the queue
    pub fn enqueue(&mut self, kernel: &Kernel<'_>, range: &LaunchRange) -> Result<()> {
        let nd_range = range.to_nd_range()?;
        self.context
            .runtime()
            .enqueue_nd_range(self.queue.handle(), kernel.handle(), &nd_range)
            .map_err(ConformanceError::dispatch("enqueue kernel"))?;
        self.enqueued += 1;
        tracing::debug!(kernel = kernel.name(), origin = %kernel.origin(), range = %nd_range, "kernel enqueued");
        Ok(())
    }

    /// Bind, then enqueue
    pub fn dispatch(&mut self, kernel: &Kernel<'_>, args: &[KernelArg], range: &LaunchRange) -> Result<()> {
        self.bind(kernel, args)?;
        self.enqueue(kernel, range)
    }

    /// Block until every recorded launch completed
    pub fn finish(&mut self) -> Result<()> {
        let _span = perf_span!("finish_queue", launches = self.enqueued);
        let (result, duration_us) = timed_block!("finish_queue", {
            self.context.runtime().finish(self.queue.handle())
        });
        result.map_err(ConformanceError::dispatch("finish queue"))?;
        tracing::debug!(launches = self.enqueued, duration_us, "queue drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::select_device;
    use ndrange_runtime::{CpuRuntime, RuntimeError};

    const FILL: &str = "__kernel void fill(__global int *out, int value) {
        out[get_global_id(0)] = value + get_global_id(0);
    }";

    #[test]
    fn test_dispatch_and_read() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let mut engine = DispatchEngine::new(&ctx).unwrap();
        let program = engine.build_from_source(FILL).unwrap();
        let kernel = program.create_kernel("fill").unwrap();
        let out = engine.output_buffer(8).unwrap();

        engine
            .dispatch(
                &kernel,
                &[out.as_arg(), KernelArg::int(100)],
                &LaunchRange::new(&[4]).with_offset(&[2]),
            )
            .unwrap();
        engine.finish().unwrap();
        assert_eq!(engine.enqueued(), 1);
        assert_eq!(engine.read(&out).unwrap(), vec![0, 0, 102, 103, 104, 105, 0, 0]);
    }

    #[test]
    fn test_rebuilt_program_dispatches_identically() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let mut engine = DispatchEngine::new(&ctx).unwrap();
        let source_built = engine.build_from_source(FILL).unwrap();
        let binary = engine.extract(&source_built).unwrap();
        let rebuilt = engine.rebuild_from_binary(&binary).unwrap();

        let mut results = Vec::new();
        for program in [&source_built, &rebuilt] {
            let kernel = program.create_kernel("fill").unwrap();
            let out = engine.output_buffer(16).unwrap();
            engine
                .dispatch(&kernel, &[out.as_arg(), KernelArg::int(-3)], &LaunchRange::new(&[16]))
                .unwrap();
            engine.finish().unwrap();
            results.push(engine.read(&out).unwrap());
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn test_failures_map_to_steps() {
        let rt = CpuRuntime::new();
        let ctx = Context::create(&rt, select_device(&rt).unwrap()).unwrap();
        let mut engine = DispatchEngine::new(&ctx).unwrap();
        let program = engine.build_from_source(FILL).unwrap();
        let kernel = program.create_kernel("fill").unwrap();
        let out = engine.output_buffer(4).unwrap();

        let err = engine.enqueue(&kernel, &LaunchRange::new(&[4])).unwrap_err();
        assert!(matches!(
            err,
            ConformanceError::DispatchFailure {
                step: "enqueue kernel",
                source: RuntimeError::MissingKernelArgs { .. }
            }
        ));

        let err = engine.bind(&kernel, &[KernelArg::int(1)]).unwrap_err();
        assert!(matches!(err, ConformanceError::ArgumentBindingFailure { index: 0, .. }));

        // Out-of-bounds stores surface from the queue drain
        engine
            .dispatch(&kernel, &[out.as_arg(), KernelArg::int(0)], &LaunchRange::new(&[8]))
            .unwrap();
        let err = engine.finish().unwrap_err();
        assert_eq!(err.step(), "finish queue");

        let err = engine
            .enqueue(&kernel, &LaunchRange::new(&[1, 2, 3, 4]))
            .unwrap_err();
        assert!(matches!(err, ConformanceError::InvalidRange(_)));
    }
}
