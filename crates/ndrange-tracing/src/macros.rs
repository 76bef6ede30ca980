//! Convenience macros for performance tracing

/// Create a performance span with automatic field capture.
///
/// Returns a [`crate::performance::PerformanceSpan`] guard that logs the
/// elapsed time, together with the given fields, when dropped.
///
/// ```rust
/// use ndrange_tracing::perf_span;
///
/// {
///     let _span = perf_span!("enqueue_nd_range", kernel = "vecAdd", work_items = 1024);
///     // ... operation code ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        let span = tracing::debug_span!(
            "perf",
            name = $name,
            $($field = $value),+
        );
        $crate::performance::PerformanceSpan::from_span(span, None)
    }};
}

/// Emit a standardized performance event at debug level.
///
/// ```rust
/// use ndrange_tracing::perf_event;
///
/// perf_event!("binary_extracted", size_bytes = 512, kernels = 1);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Run a block and return `(result, duration_us)`.
///
/// ```rust
/// use ndrange_tracing::timed_block;
///
/// let (sum, duration_us) = timed_block!("sum", { (1..=100).sum::<i32>() });
/// assert_eq!(sum, 5050);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_perf_span_macro() {
        let _span = perf_span!("test_operation");
    }

    #[test]
    fn test_perf_span_with_fields() {
        let _span = perf_span!("test_operation", size = 1024, kernel = "barrier_kernel");
    }

    #[test]
    fn test_perf_event_macro() {
        perf_event!("test_event", metric1 = 100, metric2 = "value");
    }

    #[test]
    fn test_timed_block_macro() {
        let (result, duration_us) = timed_block!("test_block", {
            thread::sleep(Duration::from_millis(5));
            42
        });
        assert_eq!(result, 42);
        assert!(duration_us >= 5_000);
    }
}
