//! Hardware checks run against the device under test.
//!
//! Each check implements [`HardwareTest`]. The runner holds a homogeneous list of
//! `Box<dyn HardwareTest>` and calls [`HardwareTest::run`] on each in turn.
//!
//! - [`ButtonsTest`] - discrete digital inputs, via [`crate::event_waiter::EventWaiter`]
//! - [`LedTest`] - visual output confirmed by the operator
//! - [`Ltr559Test`] - two-phase analog proximity and ambient light checks
//! - [`Bme688Test`] - two-phase analog gas and temperature checks, each gated by the operator
//!
//! # Lifecycle
//!
//! ```text
//! NotRun -> Running -> {Pass, Fail, Skip} x N subchecks -> Passed | Failed
//! ```
//!
//! A check never returns an error. Device failures become failed subchecks, and any
//! planned subcheck that did not get to run is recorded as skipped, so every subcheck
//! has exactly one outcome once `run` returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::FactoryConfig;
use crate::console::Console;
use crate::device::{DeviceRpc, Field, Method, TestType};
use crate::indicator::{Color, Indicator};
use crate::sampling::{
    collect_baseline, read_field, sample_until, SampleResult, SampleSummary, SamplerParams,
};

pub mod bme688;
pub mod buttons;
pub mod led;
pub mod ltr559;

pub use bme688::Bme688Test;
pub use buttons::ButtonsTest;
pub use led::LedTest;
pub use ltr559::Ltr559Test;

// =============================================================================
// Outcome bookkeeping
// =============================================================================

/// Result of one subcheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestOutcome {
    Pass,
    Fail,
    Skip,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Pass => "PASS",
            TestOutcome::Fail => "FAIL",
            TestOutcome::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named entry in a check's outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub name: String,
    pub outcome: TestOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<SampleSummary>,
}

impl OutcomeRecord {
    pub fn new(name: impl Into<String>, outcome: TestOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            detail: None,
            samples: None,
        }
    }

    pub fn pass(name: impl Into<String>) -> Self {
        Self::new(name, TestOutcome::Pass)
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, TestOutcome::Fail).with_detail(detail)
    }

    pub fn skip(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, TestOutcome::Skip).with_detail(reason)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_samples(mut self, samples: Option<SampleSummary>) -> Self {
        self.samples = samples;
        self
    }
}

/// Where a check is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    NotRun,
    Running,
    Passed,
    Failed,
    /// The run was interrupted while this check was executing.
    Interrupted,
}

/// Pass/fail/skip counters and the ordered outcome log of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub state: TestState,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<OutcomeRecord>,
    #[serde(skip)]
    planned: Vec<String>,
}

impl TestRecord {
    /// `planned` lists every subcheck the check can report, in order.
    pub fn new(name: impl Into<String>, planned: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            state: TestState::NotRun,
            passed: 0,
            failed: 0,
            skipped: 0,
            outcomes: Vec::new(),
            planned: planned.into_iter().collect(),
        }
    }

    pub fn push(&mut self, entry: OutcomeRecord) {
        match entry.outcome {
            TestOutcome::Pass => self.passed += 1,
            TestOutcome::Fail => self.failed += 1,
            TestOutcome::Skip => self.skipped += 1,
        }
        self.outcomes.push(entry);
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn planned(&self) -> &[String] {
        &self.planned
    }

    pub fn has_outcome(&self, name: &str) -> bool {
        self.outcomes.iter().any(|o| o.name == name)
    }

    /// Records `Skip` for every planned subcheck that has no outcome yet.
    pub fn skip_unreported(&mut self, reason: &str) {
        let missing: Vec<String> = self
            .planned
            .iter()
            .filter(|name| !self.has_outcome(name))
            .cloned()
            .collect();
        for name in missing {
            self.push(OutcomeRecord::skip(name, reason));
        }
    }

    /// Closes a record whose check was cut short by an interrupt. Planned subchecks
    /// without an outcome are skipped with the reason "interrupted".
    pub fn interrupt(&mut self) {
        self.skip_unreported("interrupted");
        self.state = TestState::Interrupted;
    }

    fn begin(&mut self) {
        self.state = TestState::Running;
    }

    fn finish(&mut self) {
        self.state = if self.success() {
            TestState::Passed
        } else {
            TestState::Failed
        };
    }
}

// =============================================================================
// Test context and trait
// =============================================================================

/// Collaborators borrowed by a check for the duration of one run.
pub struct TestContext<'a> {
    pub device: &'a dyn DeviceRpc,
    pub console: &'a dyn Console,
    pub config: &'a FactoryConfig,
}

impl<'a> TestContext<'a> {
    pub fn new(
        device: &'a dyn DeviceRpc,
        console: &'a dyn Console,
        config: &'a FactoryConfig,
    ) -> Self {
        Self {
            device,
            console,
            config,
        }
    }

    pub fn indicator(&self) -> Indicator<'_> {
        Indicator::new(self.device, &self.config.indicator)
    }

    /// Logs the entry, prints it immediately, and flashes the indicator for pass/fail.
    pub async fn report(&self, record: &mut TestRecord, entry: OutcomeRecord) {
        let line = match &entry.detail {
            Some(detail) if entry.outcome != TestOutcome::Pass => {
                format!("{}: {}: {}", entry.outcome, entry.name, detail)
            }
            _ => format!("{}: {}", entry.outcome, entry.name),
        };
        self.console.print(&line);
        tracing::info!(test = %record.name, subcheck = %entry.name, outcome = %entry.outcome, "subcheck complete");

        let flash = match entry.outcome {
            TestOutcome::Pass => Some(Color::GREEN),
            TestOutcome::Fail => Some(Color::RED),
            TestOutcome::Skip => None,
        };
        record.push(entry);
        if let Some(color) = flash {
            self.indicator().blink(color).await;
        }
    }

    pub async fn pass(&self, record: &mut TestRecord, name: &str) {
        self.report(record, OutcomeRecord::pass(name)).await;
    }

    pub async fn fail(&self, record: &mut TestRecord, name: &str, detail: impl Into<String>) {
        self.report(record, OutcomeRecord::fail(name, detail)).await;
    }

    pub async fn skip(&self, record: &mut TestRecord, name: &str, reason: impl Into<String>) {
        self.report(record, OutcomeRecord::skip(name, reason)).await;
    }

    /// Enters a device-side test mode. A non-OK status is recorded as a failed
    /// `<subcheck>` and `false` is returned.
    pub async fn start_test(&self, record: &mut TestRecord, test: TestType, subcheck: &str) -> bool {
        self.test_mode_call(record, Method::StartTest(test), subcheck).await
    }

    /// Leaves a device-side test mode; see [`TestContext::start_test`].
    pub async fn end_test(&self, record: &mut TestRecord, test: TestType, subcheck: &str) -> bool {
        self.test_mode_call(record, Method::EndTest(test), subcheck).await
    }

    async fn test_mode_call(&self, record: &mut TestRecord, method: Method, subcheck: &str) -> bool {
        let (status, _) = self.device.call(method).await;
        if status.is_ok() {
            return true;
        }
        let detail = match method {
            Method::StartTest(test) | Method::EndTest(test) => {
                format!("{} {} failed with status {}", method, test.as_str(), status)
            }
            _ => format!("{method} failed with status {status}"),
        };
        self.fail(record, subcheck, detail).await;
        false
    }

    pub fn sampler(&self, max_samples: usize, delay: std::time::Duration) -> SamplerParams {
        SamplerParams::new(max_samples, delay).with_window(self.config.sampling.window)
    }
}

/// One hardware check.
#[async_trait]
pub trait HardwareTest: Send {
    fn record(&self) -> &TestRecord;

    fn record_mut(&mut self) -> &mut TestRecord;

    /// Drives the device through this check's subchecks, recording each outcome.
    async fn execute(&mut self, ctx: &TestContext<'_>);

    fn name(&self) -> &str {
        &self.record().name
    }

    /// Runs the check once. Returns `true` iff no subcheck failed.
    async fn run(&mut self, ctx: &TestContext<'_>) -> bool {
        self.record_mut().begin();
        self.execute(ctx).await;
        let record = self.record_mut();
        record.skip_unreported("not run");
        record.finish();
        record.success()
    }
}

/// The production suite, in execution order.
pub fn default_suite(config: &FactoryConfig) -> Vec<Box<dyn HardwareTest>> {
    vec![
        Box::new(LedTest::new()),
        Box::new(ButtonsTest::new(&config.buttons)),
        Box::new(Ltr559Test::new()),
        Box::new(Bme688Test::new()),
    ]
}

// =============================================================================
// Analog phase helpers
// =============================================================================

/// One sampled phase of an analog check.
pub(crate) struct AnalogPhase<'p> {
    pub subcheck: &'p str,
    pub method: Method,
    pub field: Field,
    pub units: &'p str,
    pub params: SamplerParams,
}

/// Takes `phase.params.max_samples` unconditioned readings and prints their summary.
///
/// Returns the baseline mean. On a sampling failure, `phase.subcheck` is recorded as
/// failed and `None` is returned.
pub(crate) async fn baseline(
    ctx: &TestContext<'_>,
    record: &mut TestRecord,
    phase: AnalogPhase<'_>,
) -> Option<f64> {
    ctx.console.print("Getting initial sensor readings");
    let device = ctx.device;
    let (method, field) = (phase.method, phase.field);
    let outcome = collect_baseline(phase.params.max_samples, phase.params.delay, || {
        read_field(device, method, field)
    })
    .await;

    let mean = match (outcome.result, outcome.series.mean()) {
        (SampleResult::DeviceError(status), _) => {
            let detail = format!("baseline sampling failed with status {status}");
            ctx.fail(record, phase.subcheck, detail).await;
            return None;
        }
        (_, Ok(mean)) => mean,
        (_, Err(e)) => {
            ctx.fail(record, phase.subcheck, format!("baseline unavailable: {e}"))
                .await;
            return None;
        }
    };

    ctx.console.print(" DONE");
    for line in outcome.series.render(4, phase.units) {
        ctx.console.print(&line);
    }
    Some(mean)
}

/// Runs [`sample_until`] for one phase, prints the series, and records the outcome.
pub(crate) async fn analog_phase<P>(
    ctx: &TestContext<'_>,
    record: &mut TestRecord,
    phase: AnalogPhase<'_>,
    predicate: P,
) -> bool
where
    P: FnMut(f64) -> bool + Send,
{
    let device = ctx.device;
    let (method, field) = (phase.method, phase.field);
    ctx.console.print("Reading sensor");
    let outcome = sample_until(phase.params, || read_field(device, method, field), predicate).await;

    for line in outcome.series.render(4, phase.units) {
        ctx.console.print(&line);
    }

    let summary = outcome.series.summary();
    match outcome.failure_detail(&phase.params) {
        None => {
            ctx.report(record, OutcomeRecord::pass(phase.subcheck).with_samples(summary))
                .await;
            true
        }
        Some(detail) => {
            ctx.report(
                record,
                OutcomeRecord::fail(phase.subcheck, detail).with_samples(summary),
            )
            .await;
            false
        }
    }
}
