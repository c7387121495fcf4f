//! Convenience macros for performance tracing

/// Create a [`crate::performance::PerformanceSpan`] with optional fields.
///
/// ```rust
/// use eager_tracing::perf_span;
///
/// {
///     let _span = perf_span!("resolve", handle = 7, remote = false);
///     // ... work ...
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::debug!(event = $name, $($field = $value),+);
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Run a block and return `(result, duration_us)`, logging the duration at debug.
///
/// ```rust
/// use eager_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
