//! Reference verification scenario
//!
//! ```text
//! vector source ─build─► program1 ─extract─► binary ─reinstate+build─► program2
//! barrier source ─build─► b_program1 ─extract─► binary ─reinstate+build─► b_program2
//!
//! kernel1 (program1,  local L)      ─► c1 ┐
//! kernel2 (program2,  local L)      ─► c2 ├─ finish ─ read ─ verify vectors
//! kernel3 (program2,  local L_alt)  ─► c3 ┘
//! b_kernel1 (b_program1) ─► bb1 ┐
//! b_kernel2 (b_program2) ─► bb2 ┴─ finish ─ read ─ verify barrier
//! ```
//!
//! Every launch is recorded before the single queue drain. Every runtime
//! object is scoped to [`run`] and released on return, on success and on
//! every error path.

use crate::barrier_model;
use crate::config::ScenarioConfig;
use crate::dispatch::{DispatchEngine, LaunchRange};
use crate::error::{ConformanceError, Result};
use crate::index_model::{self, partition_delta};
use crate::resources::{select_device, Context};
use crate::sources::KernelSources;
use crate::verifier::{BarrierOutputs, EquivalenceVerifier, VectorOutputs};
use ndrange_runtime::ComputeRuntime;
use ndrange_tracing::perf_span;
use serde::Serialize;

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub device: String,
    /// Extracted binary size of the vector-combine program
    pub vector_binary_bytes: usize,
    /// Extracted binary size of the barrier program
    pub barrier_binary_bytes: usize,
    /// Elements compared across the three vector outputs
    pub vector_elements: usize,
    /// Elements compared across the two barrier buffers
    pub barrier_elements: usize,
    pub dispatches: usize,
    pub config: ScenarioConfig,
}

/// Run the whole scenario against `runtime`
pub fn run(runtime: &dyn ComputeRuntime, config: &ScenarioConfig, sources: &KernelSources) -> Result<VerificationReport> {
    let _span = perf_span!("verification_scenario", buffer_len = config.buffer_len);
    config.validate()?;

    let reference = config.reference_space();
    let alternate = config.alternate_space();
    let barrier_range = config.barrier_range();

    let device = select_device(runtime)?;
    let device_name = runtime
        .device_info(device)
        .map_err(ConformanceError::runtime("query device info"))?
        .name;
    tracing::info!(device = device_name.as_str(), "device selected");

    let context = Context::create(runtime, device)?;
    let mut engine = DispatchEngine::new(&context)?;

    // Programs: source-built, extracted, binary-rebuilt
    let program1 = engine.build_from_source(sources.vector_combine)?;
    let vector_binary = engine.extract(&program1)?;
    let program2 = engine.rebuild_from_binary(&vector_binary)?;

    let b_program1 = engine.build_from_source(sources.barrier)?;
    let barrier_binary = engine.extract(&b_program1)?;
    let b_program2 = engine.rebuild_from_binary(&barrier_binary)?;
    tracing::debug!(
        vector_bytes = vector_binary.len(),
        barrier_bytes = barrier_binary.len(),
        "binaries round-tripped"
    );

    // Buffers
    let len = config.buffer_len;
    let a = engine.input_buffer(&index_model::inputs_a(len))?;
    let b = engine.input_buffer(&index_model::inputs_b(len))?;
    let c1 = engine.output_buffer(len)?;
    let c2 = engine.output_buffer(len)?;
    let c3 = engine.output_buffer(len)?;

    let seed = barrier_model::seed(config.barrier_len);
    let bb1 = engine.host_copy_buffer(&seed)?;
    let bb2 = engine.host_copy_buffer(&seed)?;

    // Kernels
    let kernel1 = program1.create_kernel(sources.vector_combine_kernel)?;
    let kernel2 = program2.create_kernel(sources.vector_combine_kernel)?;
    let kernel3 = program2.create_kernel(sources.vector_combine_kernel)?;
    let b_kernel1 = b_program1.create_kernel(sources.barrier_kernel)?;
    let b_kernel2 = b_program2.create_kernel(sources.barrier_kernel)?;

    // Launches
    let vector_range = LaunchRange::new(&reference.global).with_local(&reference.local);
    let alternate_range = LaunchRange::new(&alternate.global).with_local(&alternate.local);
    let barrier_launch = LaunchRange::new(&[barrier_range.global])
        .with_local(&[barrier_range.local])
        .with_offset(&[barrier_range.offset]);

    engine.dispatch(&kernel1, &[a.as_arg(), b.as_arg(), c1.as_arg()], &vector_range)?;
    engine.dispatch(&kernel2, &[a.as_arg(), b.as_arg(), c2.as_arg()], &vector_range)?;
    engine.dispatch(&kernel3, &[a.as_arg(), b.as_arg(), c3.as_arg()], &alternate_range)?;
    engine.dispatch(&b_kernel1, &[bb1.as_arg()], &barrier_launch)?;
    engine.dispatch(&b_kernel2, &[bb2.as_arg()], &barrier_launch)?;
    engine.finish()?;

    let c1 = engine.read(&c1)?;
    let c2 = engine.read(&c2)?;
    let c3 = engine.read(&c3)?;
    let bb1 = engine.read(&bb1)?;
    let bb2 = engine.read(&bb2)?;

    // Verification
    let model = reference.expected_buffer(len)?;
    let delta = partition_delta(&reference, &alternate, len)?;
    let barrier_model = barrier_model::expected_pass(&seed, &barrier_range)?;

    let verifier = EquivalenceVerifier::new();
    let vector_elements = verifier.verify_vectors(&VectorOutputs {
        source_built: &c1,
        binary_rebuilt: &c2,
        repartitioned: &c3,
        model: &model,
        partition_delta: &delta,
    })?;
    let barrier_elements = verifier.verify_barrier(&BarrierOutputs {
        source_built: &bb1,
        binary_rebuilt: &bb2,
        model: &barrier_model,
    })?;

    let report = VerificationReport {
        device: device_name,
        vector_binary_bytes: vector_binary.len(),
        barrier_binary_bytes: barrier_binary.len(),
        vector_elements,
        barrier_elements,
        dispatches: engine.enqueued(),
        config: config.clone(),
    };
    tracing::info!(
        vector_elements = report.vector_elements,
        barrier_elements = report.barrier_elements,
        dispatches = report.dispatches,
        "verification passed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ProgramOrigin;
    use crate::verifier::{CheckKind, Mismatch};
    use ndrange_runtime::CpuRuntime;

    #[test]
    fn test_reference_scenario_passes() {
        let rt = CpuRuntime::new();
        let report = run(&rt, &ScenarioConfig::default(), &KernelSources::default()).unwrap();
        assert_eq!(report.vector_elements, 1024);
        assert_eq!(report.barrier_elements, 8);
        assert_eq!(report.dispatches, 5);
        assert!(report.vector_binary_bytes > 0);
        assert!(report.barrier_binary_bytes > 0);
    }

    #[test]
    fn test_partition_blind_kernel_fails_at_first_local_term() {
        let sources = KernelSources {
            vector_combine: "__kernel void vecAdd(__constant int *a, __constant int *b, __global int *c) {
                unsigned int i = get_global_id(0) * get_global_size(1) + get_global_id(1);
                c[i] = a[i] + b[i];
            }",
            ..KernelSources::default()
        };
        let err = run(&CpuRuntime::new(), &ScenarioConfig::default(), &sources).unwrap_err();
        assert!(matches!(
            err,
            ConformanceError::ResultMismatch(Mismatch {
                check: CheckKind::VectorCombine,
                index: 1,
                actual: 0,
                expected: 1,
            })
        ));
        assert_eq!(err.to_string(), "Check failed at offset 1, 0 instead of 1");
    }

    #[test]
    fn test_wrong_barrier_pass_reported() {
        let sources = KernelSources {
            barrier: "__kernel void barrier_kernel(global int *buffer) {
                private int a = buffer[get_global_id(0) - 1] + buffer[get_global_id(0)] + buffer[get_global_id(0) + 1];
                barrier(CLK_LOCAL_MEM_FENCE);
                buffer[get_global_id(0)] = a / 2;
            }",
            ..KernelSources::default()
        };
        let err = run(&CpuRuntime::new(), &ScenarioConfig::default(), &sources).unwrap_err();
        assert_eq!(err.to_string(), "barrier kernel Failed at index 1");
    }

    #[test]
    fn test_build_failure_names_origin() {
        let sources = KernelSources {
            barrier: "__kernel void barrier_kernel(global int *buffer) { buffer[0] = missing; }",
            ..KernelSources::default()
        };
        let err = run(&CpuRuntime::new(), &ScenarioConfig::default(), &sources).unwrap_err();
        match err {
            ConformanceError::BuildFailure { origin, log } => {
                assert_eq!(origin, ProgramOrigin::SourceBuilt);
                assert!(log.contains("missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_device_work() {
        let config = ScenarioConfig {
            buffer_len: 512,
            ..ScenarioConfig::default()
        };
        let err = run(&CpuRuntime::new(), &config, &KernelSources::default()).unwrap_err();
        assert!(matches!(err, ConformanceError::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_buffer_rejected_as_config_error() {
        let config = ScenarioConfig {
            buffer_len: usize::MAX / 2,
            ..ScenarioConfig::default()
        };
        match run(&CpuRuntime::new(), &config, &KernelSources::default()) {
            Err(ConformanceError::InvalidConfig(msg)) => assert!(msg.contains("exceeds the maximum")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("oversized buffer accepted"),
        }
    }

    #[test]
    fn test_alternate_partitionings() {
        let config = ScenarioConfig {
            global: [8, 32],
            local: [8, 4],
            alt_local: [1, 32],
            buffer_len: 256,
            ..ScenarioConfig::default()
        };
        let report = run(&CpuRuntime::new(), &config, &KernelSources::default()).unwrap();
        assert_eq!(report.vector_elements, 256);
    }
}
