//! Per-tool dispatch metrics with bounded duration buffers.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Fixed-capacity circular buffer of recent durations (milliseconds).
///
/// Bounding is mandatory: once full, the oldest sample is overwritten.
#[derive(Debug, Clone)]
pub(crate) struct RingBuffer {
    buf: Vec<f64>,
    capacity: usize,
    head: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity.min(1024)), capacity, head: 0 }
    }

    fn push(&mut self, value: f64) {
        if self.buf.len() < self.capacity {
            self.buf.push(value);
        } else {
            self.buf[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    /// Copy out the live samples. Percentiles are computed over this
    /// snapshot, not the live buffer.
    fn snapshot(&self) -> Vec<f64> {
        self.buf.clone()
    }
}

#[derive(Debug)]
struct ToolMetric {
    calls: u64,
    errors: u64,
    durations: RingBuffer,
}

/// Aggregates for one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMetricsSnapshot {
    /// Total dispatches.
    pub calls: u64,
    /// Dispatches that ended in error.
    pub errors: u64,
    /// Mean duration over the retained samples, in milliseconds.
    pub mean_duration_ms: f64,
    /// 95th-percentile duration over the retained samples, in
    /// milliseconds.
    pub p95_duration_ms: f64,
    /// How many duration samples are currently retained.
    pub samples: usize,
}

/// Copy-on-snapshot view of all tool metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Aggregates keyed by tool name.
    pub tools: HashMap<String, ToolMetricsSnapshot>,
}

/// Mutable metrics state owned by the pipeline.
pub(crate) struct MetricsState {
    buffer_size: usize,
    tools: HashMap<String, ToolMetric>,
}

impl MetricsState {
    pub(crate) fn new(buffer_size: usize) -> Self {
        Self { buffer_size, tools: HashMap::new() }
    }

    pub(crate) fn record(&mut self, tool: &str, duration: Duration, is_error: bool) {
        let metric = self.tools.entry(tool.to_string()).or_insert_with(|| ToolMetric {
            calls: 0,
            errors: 0,
            durations: RingBuffer::new(self.buffer_size),
        });
        metric.calls += 1;
        if is_error {
            metric.errors += 1;
        }
        metric.durations.push(duration.as_secs_f64() * 1000.0);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let tools = self
            .tools
            .iter()
            .map(|(name, metric)| {
                let samples = metric.durations.snapshot();
                (name.clone(), ToolMetricsSnapshot {
                    calls: metric.calls,
                    errors: metric.errors,
                    mean_duration_ms: mean(&samples),
                    p95_duration_ms: percentile(&samples, 0.95),
                    samples: metric.durations.len(),
                })
            })
            .collect();
        MetricsSnapshot { tools }
    }

    pub(crate) fn clear(&mut self) {
        self.tools.clear();
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Nearest-rank percentile over a snapshot copy.
fn percentile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
