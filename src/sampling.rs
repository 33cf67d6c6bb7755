//! Threshold detection over polled sensor readings.
//!
//! Raw single readings are noisy, so analog checks decide on a short trailing moving
//! average instead:
//!
//! - [`SampleSeries`] - running count/total/min/max of every reading in one phase
//! - [`CircularWindow`] - fixed-size window of the most recent readings
//! - [`sample_until`] - polls a sampling function until the windowed average satisfies
//!   a predicate, the sampling call fails, or the iteration cap is reached
//!
//! The iteration cap times the inter-sample delay bounds the total wait of a phase.

use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::device::{DeviceRpc, Field, Method, Status};

/// Default moving-average window.
pub const DEFAULT_WINDOW: usize = 5;

/// Returned by [`SampleSeries::mean`] on an empty series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("division by zero: mean of an empty sample series")]
pub struct DivisionByZero;

// =============================================================================
// SampleSeries
// =============================================================================

/// Aggregate of the scalar readings taken during one sampling phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSeries {
    count: usize,
    total: f64,
    min: f64,
    max: f64,
}

impl Default for SampleSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSeries {
    pub fn new() -> Self {
        Self {
            count: 0,
            total: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Records one observation.
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mean(&self) -> Result<f64, DivisionByZero> {
        if self.count == 0 {
            return Err(DivisionByZero);
        }
        Ok(self.total / self.count as f64)
    }

    /// Serializable snapshot, or `None` for an empty series.
    pub fn summary(&self) -> Option<SampleSummary> {
        let mean = self.mean().ok()?;
        Some(SampleSummary {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
        })
    }

    /// Operator-facing summary block.
    pub fn render(&self, indent: usize, units: &str) -> Vec<String> {
        let pad = " ".repeat(indent);
        let Some(summary) = self.summary() else {
            return vec![format!("{pad}Samples   0")];
        };
        vec![
            format!("{pad}Samples   {}", summary.count),
            format!("{pad}Min       {:.2}{units}", summary.min),
            format!("{pad}Max       {:.2}{units}", summary.max),
            format!("{pad}Mean      {:.2}{units}", summary.mean),
        ]
    }
}

/// Statistical summary of a non-empty [`SampleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Number of readings
    pub count: usize,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Average value
    pub mean: f64,
}

// =============================================================================
// CircularWindow
// =============================================================================

/// Fixed-capacity window; write `i` lands in slot `i mod capacity`.
#[derive(Debug, Clone)]
pub struct CircularWindow {
    slots: Vec<f64>,
    written: usize,
}

impl CircularWindow {
    /// Creates a window of `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0.0; capacity.max(1)],
            written: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, value: f64) {
        let slot = self.written % self.slots.len();
        self.slots[slot] = value;
        self.written += 1;
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Mean of every slot, defined once the window has been filled.
    pub fn mean(&self) -> Option<f64> {
        if self.written < self.slots.len() {
            return None;
        }
        Some(self.slots.iter().sum::<f64>() / self.slots.len() as f64)
    }

    /// Slots written so far, in slot order.
    pub fn recent(&self) -> &[f64] {
        &self.slots[..self.written.min(self.slots.len())]
    }
}

// =============================================================================
// sample_until
// =============================================================================

/// Bounds for one [`sample_until`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerParams {
    /// Hard iteration cap.
    pub max_samples: usize,
    /// Moving-average window size.
    pub window: usize,
    /// Pause between readings.
    pub delay: Duration,
}

impl SamplerParams {
    pub fn new(max_samples: usize, delay: Duration) -> Self {
        Self {
            max_samples,
            window: DEFAULT_WINDOW,
            delay,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }
}

/// How a [`sample_until`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleResult {
    /// The moving average satisfied the predicate at this iteration index.
    Satisfied { index: usize },
    /// `max_samples` readings were taken without satisfying the predicate.
    Exhausted,
    /// The sampling call returned a non-OK status; not retried.
    DeviceError(Status),
}

/// Result plus every reading taken before the run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutcome {
    pub result: SampleResult,
    pub series: SampleSeries,
}

impl SampleOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self.result, SampleResult::Satisfied { .. })
    }

    /// Human-readable reason for a non-satisfied run.
    pub fn failure_detail(&self, params: &SamplerParams) -> Option<String> {
        match self.result {
            SampleResult::Satisfied { .. } => None,
            SampleResult::Exhausted => Some(format!(
                "threshold not reached within {} samples ({:.1}s)",
                params.max_samples,
                params.delay.as_secs_f64() * params.max_samples as f64
            )),
            SampleResult::DeviceError(status) => {
                Some(format!("sampling failed with status {status}"))
            }
        }
    }
}

/// Polls `sample` until the trailing moving average satisfies `predicate`.
///
/// For iteration `i` in `0..max_samples`: a failed sample ends the run immediately.
/// Otherwise the value is recorded in the series and in window slot `i mod window`;
/// from `i >= window` onward the window mean is tested and the first satisfying
/// index ends the run. The predicate is never called before then.
pub async fn sample_until<S, Fut, P>(
    params: SamplerParams,
    mut sample: S,
    mut predicate: P,
) -> SampleOutcome
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<f64, Status>>,
    P: FnMut(f64) -> bool,
{
    let mut series = SampleSeries::new();
    let mut window = CircularWindow::new(params.window);
    let window_size = window.capacity();

    for i in 0..params.max_samples {
        let value = match sample().await {
            Ok(value) => value,
            Err(status) => {
                debug!(index = i, %status, "sampling call failed; stopping");
                return SampleOutcome {
                    result: SampleResult::DeviceError(status),
                    series,
                };
            }
        };

        window.push(value);
        series.update(value);
        trace!(index = i, value, recent = ?window.recent(), "sample");

        if i >= window_size {
            if let Some(average) = window.mean() {
                if predicate(average) {
                    debug!(index = i, average, "moving average satisfied predicate");
                    return SampleOutcome {
                        result: SampleResult::Satisfied { index: i },
                        series,
                    };
                }
            }
        }

        if i + 1 < params.max_samples && !params.delay.is_zero() {
            sleep(params.delay).await;
        }
    }

    SampleOutcome {
        result: SampleResult::Exhausted,
        series,
    }
}

/// Takes exactly `samples` readings with no stopping condition.
pub async fn collect_baseline<S, Fut>(samples: usize, delay: Duration, sample: S) -> SampleOutcome
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<f64, Status>>,
{
    sample_until(SamplerParams::new(samples, delay), sample, |_| false).await
}

/// Calls `method` once and extracts `field` from the response.
///
/// A response without the requested field is reported as [`Status::Internal`].
pub async fn read_field(device: &dyn DeviceRpc, method: Method, field: Field) -> Result<f64, Status> {
    let (status, response) = device.call(method).await;
    if !status.is_ok() {
        return Err(status);
    }
    response.field(field).ok_or_else(|| {
        debug!(%method, field = field.as_str(), "response is missing field");
        Status::Internal
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    fn scripted(values: &[f64]) -> impl FnMut() -> std::future::Ready<Result<f64, Status>> {
        let mut queue: VecDeque<f64> = values.iter().copied().collect();
        move || std::future::ready(queue.pop_front().ok_or(Status::Unavailable))
    }

    fn params(max_samples: usize) -> SamplerParams {
        SamplerParams::new(max_samples, Duration::ZERO)
    }

    #[test]
    fn test_series_tracks_min_max_mean() {
        let mut series = SampleSeries::new();
        assert_eq!(series.mean(), Err(DivisionByZero));
        for v in [4.0, -2.0, 10.0] {
            series.update(v);
        }
        assert_eq!(series.count(), 3);
        assert_eq!(series.min(), -2.0);
        assert_eq!(series.max(), 10.0);
        assert_eq!(series.mean(), Ok(4.0));
    }

    #[test]
    fn test_series_render_shows_mean() {
        let mut series = SampleSeries::new();
        series.update(1.0);
        series.update(3.0);
        let lines = series.render(4, "lux");
        assert_eq!(lines[0], "    Samples   2");
        assert_eq!(lines[3], "    Mean      2.00lux");
        assert_eq!(SampleSeries::new().render(0, ""), vec!["Samples   0"]);
    }

    #[test]
    fn test_window_mean_requires_full_window() {
        let mut window = CircularWindow::new(3);
        window.push(1.0);
        window.push(2.0);
        assert_eq!(window.mean(), None);
        window.push(3.0);
        assert_eq!(window.mean(), Some(2.0));
        window.push(9.0);
        assert_eq!(window.recent(), &[9.0, 2.0, 3.0]);
        assert_eq!(window.mean(), Some(14.0 / 3.0));
    }

    #[tokio::test]
    async fn test_predicate_not_evaluated_before_window() {
        let calls = Cell::new(0usize);
        let outcome = sample_until(params(5), scripted(&[1.0; 5]), |_| {
            calls.set(calls.get() + 1);
            true
        })
        .await;
        assert_eq!(calls.get(), 0);
        assert_eq!(outcome.result, SampleResult::Exhausted);
        assert_eq!(outcome.series.count(), 5);
    }

    #[tokio::test]
    async fn test_fewer_samples_than_window_never_succeeds() {
        let calls = Cell::new(0usize);
        let outcome = sample_until(params(3), scripted(&[100.0; 10]), |_| {
            calls.set(calls.get() + 1);
            true
        })
        .await;
        assert_eq!(calls.get(), 0);
        assert_eq!(outcome.result, SampleResult::Exhausted);
        assert_eq!(outcome.series.count(), 3);
    }

    #[tokio::test]
    async fn test_stale_values_delay_detection() {
        let values = [5.0, 5.0, 5.0, 5.0, 5.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        let outcome = sample_until(params(10), scripted(&values), |avg| avg > 95.0).await;
        assert_eq!(outcome.result, SampleResult::Satisfied { index: 9 });
        assert_eq!(outcome.series.count(), 10);
    }

    #[tokio::test]
    async fn test_earliest_satisfying_index_wins() {
        let values = [5.0, 5.0, 5.0, 5.0, 5.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        let seen = Cell::new(Vec::new());
        let outcome = sample_until(params(10), scripted(&values), |avg| {
            let mut v = seen.take();
            v.push(avg);
            seen.set(v);
            avg > 50.0
        })
        .await;
        // windows at 5, 6, 7: [100,5,5,5,5], [100,100,5,5,5], [100,100,100,5,5]
        assert_eq!(seen.take(), vec![24.0, 43.0, 62.0]);
        assert_eq!(outcome.result, SampleResult::Satisfied { index: 7 });
        assert_eq!(outcome.series.count(), 8);
    }

    #[tokio::test]
    async fn test_exhaustion_records_every_sample() {
        let outcome = sample_until(params(12), scripted(&[1.0; 12]), |avg| avg > 2.0).await;
        assert_eq!(outcome.result, SampleResult::Exhausted);
        assert_eq!(outcome.series.count(), 12);
        assert!(outcome.failure_detail(&params(12)).is_some());
    }

    #[tokio::test]
    async fn test_sampling_failure_stops_immediately() {
        // Queue runs dry after 4 readings.
        let calls = Cell::new(0usize);
        let outcome = sample_until(params(50), scripted(&[1.0; 4]), |_| {
            calls.set(calls.get() + 1);
            false
        })
        .await;
        assert_eq!(outcome.result, SampleResult::DeviceError(Status::Unavailable));
        assert_eq!(outcome.series.count(), 4);
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn test_window_of_one() {
        let outcome = sample_until(
            params(10).with_window(1),
            scripted(&[0.0, 0.0, 7.0, 0.0]),
            |avg| avg > 5.0,
        )
        .await;
        assert_eq!(outcome.result, SampleResult::Satisfied { index: 2 });
    }

    #[tokio::test]
    async fn test_baseline_takes_exact_count() {
        let outcome = collect_baseline(5, Duration::ZERO, scripted(&[2.0; 8])).await;
        assert_eq!(outcome.result, SampleResult::Exhausted);
        assert_eq!(outcome.series.count(), 5);
        assert_eq!(outcome.series.mean(), Ok(2.0));
    }

    #[tokio::test]
    async fn test_read_field_from_device() {
        use crate::device::MockDevice;

        let device = MockDevice::new()
            .with_values(Method::SampleLtr559Light, [12.5])
            .with_failure(Method::SampleLtr559Prox, Status::Unavailable);
        assert_eq!(
            read_field(&device, Method::SampleLtr559Light, Field::Lux).await,
            Ok(12.5)
        );
        assert_eq!(
            read_field(&device, Method::SampleLtr559Light, Field::Value).await,
            Err(Status::Internal)
        );
        assert_eq!(
            read_field(&device, Method::SampleLtr559Prox, Field::Value).await,
            Err(Status::Unavailable)
        );
    }
}
