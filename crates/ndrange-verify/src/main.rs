//! Verification run against the reference CPU device
//!
//! Exit code 0 when every check passes. On the first failure, one diagnostic
//! line goes to stdout and the exit code is 1.

use ndrange_runtime::CpuRuntime;
use ndrange_tracing::{init_global_tracing, TracingConfig};
use ndrange_verify::{scenario, KernelSources, Result, ScenarioConfig, VerificationReport};
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = init_global_tracing(&TracingConfig::from_env()) {
        eprintln!("tracing disabled: {e}");
    }

    match verify() {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(json) => tracing::info!(report = json.as_str(), "all checks passed"),
                Err(e) => tracing::warn!(error = %e, "report serialization failed"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{e}");
            tracing::error!(error = %e, "verification failed");
            ExitCode::FAILURE
        }
    }
}

fn verify() -> Result<VerificationReport> {
    let config = ScenarioConfig::from_env()?;
    let runtime = CpuRuntime::new();
    scenario::run(&runtime, &config, &KernelSources::default())
}
