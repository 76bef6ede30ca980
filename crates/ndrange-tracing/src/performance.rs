//! Performance-focused tracing utilities
//!
//! RAII timers for builds and dispatches plus standard events for buffer
//! transfers and kernel launches.
//!
//! ## Example
//!
//! ```rust
//! use ndrange_tracing::performance::{PerformanceSpan, record_transfer};
//!
//! let span = PerformanceSpan::new("build_program", Some(100));
//! // ... do work ...
//! drop(span); // Logs only if duration > 100μs
//!
//! record_transfer(4096, "H2D", 12);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(true);

// u64::MAX encodes "no threshold".
static THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply process-wide performance span settings.
///
/// Called by [`crate::init_global_tracing`]; spans created before this call
/// use the defaults (enabled, no threshold).
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently emit completion events.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        t => Some(t),
    }
}

/// RAII guard that measures span duration and logs it on drop.
///
/// The span is logged only if performance tracing is enabled and the
/// duration reaches the threshold (the explicit one, or the global one set
/// through [`configure`]).
///
/// ```rust
/// use ndrange_tracing::performance::PerformanceSpan;
///
/// {
///     let _span = PerformanceSpan::new("enqueue", Some(1000));
///     // ... operation code ...
/// } // Logged only if duration > 1000μs
/// ```
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Create a new performance span with optional threshold filtering.
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        Self::from_span(tracing::debug_span!("perf", name = %span_name), threshold_us)
    }

    /// Wrap an existing span (used by `perf_span!` to carry extra fields).
    pub fn from_span(span: tracing::Span, threshold_us: Option<u64>) -> Self {
        Self {
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    /// Elapsed time since span creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Enter this span's context.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }

        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record a host/device transfer with bandwidth.
///
/// `direction` is `"H2D"` (host to device) or `"D2H"` (device to host).
pub fn record_transfer(bytes: usize, direction: &str, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        bytes = bytes,
        direction = direction,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth_mbps,
        "data_transfer"
    );
}

/// Record a completed kernel dispatch.
pub fn record_dispatch(kernel: &str, work_items: usize, work_groups: usize, duration_us: u64) {
    let items_per_sec = if duration_us > 0 {
        (work_items as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };

    tracing::debug!(
        event = "dispatch",
        kernel = kernel,
        work_items = work_items,
        work_groups = work_groups,
        duration_us = duration_us,
        items_per_sec = items_per_sec,
        "kernel_dispatch"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleepy", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
    }

    #[test]
    fn explicit_threshold_wins_over_global() {
        let span = PerformanceSpan::new("thresholded", Some(5));
        assert_eq!(span.threshold_us, Some(5));
    }

    #[test]
    fn record_helpers_handle_zero_duration() {
        record_transfer(4096, "H2D", 0);
        record_dispatch("vecAdd", 1024, 32, 0);
    }
}
