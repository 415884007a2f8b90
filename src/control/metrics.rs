//! 循环统计 (loop metrics)
use std::time::Duration;

use tracing::info;

/// Running sums of inference and capture time over the inference outputs
/// adopted since the last flush.
#[derive(Debug, Default, Clone)]
pub struct LoopMetrics {
    total_inference: Duration,
    total_capture: Duration,
    samples: u32,
}

/// 平均耗时 (ms)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsReport {
    pub avg_inference_ms: f64,
    pub avg_capture_ms: f64,
    pub samples: u32,
}

impl LoopMetrics {
    pub fn record(&mut self, inference: Duration, capture: Duration) {
        self.total_inference += inference;
        self.total_capture += capture;
        self.samples += 1;
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn report(&self) -> Option<MetricsReport> {
        if self.samples == 0 {
            return None;
        }
        let n = self.samples as f64;
        Some(MetricsReport {
            avg_inference_ms: self.total_inference.as_secs_f64() * 1000.0 / n,
            avg_capture_ms: self.total_capture.as_secs_f64() * 1000.0 / n,
            samples: self.samples,
        })
    }

    /// Logs the averages (if any samples arrived) and starts over.
    pub fn flush(&mut self) -> Option<MetricsReport> {
        let report = self.report();
        if let Some(r) = report {
            info!(
                avg_inference_ms = r.avg_inference_ms,
                avg_capture_ms = r.avg_capture_ms,
                samples = r.samples,
                "📊 loop metrics"
            );
        }
        *self = Self::default();
        report
    }
}
