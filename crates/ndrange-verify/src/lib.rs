//! # ndrange-verify
//!
//! Conformance check for compute runtimes: a program compiled from source and
//! the same program reinstated from its extracted device binary must produce
//! bit-identical results, and a kernel with a work-group barrier must see
//! every pre-barrier read complete before any post-barrier write.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ scenario::run                                                 │
//! │   config ─► resources (scoped handles) ─► DispatchEngine      │
//! │                    │                         │                │
//! │                 codec                   launches, finish      │
//! │         (size query, content query,          │                │
//! │           reinstate from binary)             ▼                │
//! │                                      EquivalenceVerifier      │
//! │                                 ▲                      ▲      │
//! │                           index_model           barrier_model │
//! └───────────────────────────────────────────────────────────────┘
//!                               │
//!                   &dyn ndrange_runtime::ComputeRuntime
//! ```
//!
//! ## Example
//!
//! ```
//! use ndrange_runtime::CpuRuntime;
//! use ndrange_verify::{scenario, KernelSources, ScenarioConfig};
//!
//! let runtime = CpuRuntime::new();
//! let report = scenario::run(&runtime, &ScenarioConfig::default(), &KernelSources::default())?;
//! assert_eq!(report.dispatches, 5);
//! # Ok::<(), ndrange_verify::ConformanceError>(())
//! ```

pub mod barrier_model;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod index_model;
pub mod resources;
pub mod scenario;
pub mod sources;
pub mod verifier;

pub use codec::{CodecError, SerializedBinary};
pub use config::ScenarioConfig;
pub use dispatch::{DispatchEngine, LaunchRange};
pub use error::{ConformanceError, Result};
pub use index_model::IndexSpace;
pub use resources::{select_device, Context, ProgramOrigin};
pub use scenario::{run, VerificationReport};
pub use sources::KernelSources;
pub use verifier::{CheckKind, EquivalenceVerifier, Mismatch};
