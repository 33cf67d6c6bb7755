//! Sequential suite execution.
//!
//! The runner owns the operator-facing frame of a run: banner, test listing, ready
//! prompt, a numbered banner per check, and the final report card. Checks run strictly
//! one after another, so the device and its indicator are only ever driven by one
//! check at a time.
//!
//! Every step races against an interrupt future (Ctrl-C in the binary). When the
//! interrupt wins, the running check's future is dropped, which cancels any event
//! subscription it held, the indicator is cleared best-effort, and a partial report
//! is produced.

use std::future::Future;
use tracing::{info, warn};

use crate::checks::{HardwareTest, TestContext};
use crate::config::FactoryConfig;
use crate::console::Console;
use crate::device::{DeviceRpc, Method, Response, Status};
use crate::error::{FactoryError, FactoryResult};
use crate::indicator::clear_indicator;
use crate::report::{RunMetadata, SuiteReport};

const TITLE: &str = "Enviro+ Factory Tests";

/// Reads the device's flash id. Fails if the factory service is missing or the
/// device does not answer.
pub async fn query_device_info(device: &dyn DeviceRpc) -> FactoryResult<u64> {
    match device.call_checked(Method::GetDeviceInfo).await? {
        Response::DeviceInfo { flash_id } => Ok(flash_id),
        other => {
            warn!(?other, "unexpected GetDeviceInfo response");
            Err(FactoryError::Rpc {
                method: Method::GetDeviceInfo,
                status: Status::Internal,
            })
        }
    }
}

pub struct TestRunner<'a> {
    config: &'a FactoryConfig,
    console: &'a dyn Console,
}

impl<'a> TestRunner<'a> {
    pub fn new(config: &'a FactoryConfig, console: &'a dyn Console) -> Self {
        Self { config, console }
    }

    fn print_banner(&self, text: &str) {
        let rule = "=".repeat(text.len());
        self.console.blank();
        self.console.print(&rule);
        self.console.print(text);
        self.console.print(&rule);
    }

    /// Runs `tests` in order and returns the report, already printed.
    ///
    /// `interrupt` completing ends the run early with a partial report.
    pub async fn run<I>(
        &self,
        device: &dyn DeviceRpc,
        tests: Vec<Box<dyn HardwareTest>>,
        metadata: RunMetadata,
        interrupt: I,
    ) -> SuiteReport
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        self.print_banner(TITLE);
        for line in metadata.render() {
            self.console.print(&line);
        }

        self.console.blank();
        self.console
            .print(&format!("{} tests will be performed:", tests.len()));
        for test in &tests {
            self.console.print(&format!("  - {}", test.name()));
        }

        let mut report = SuiteReport::new(metadata);

        let ready = tokio::select! {
            biased;
            _ = &mut interrupt => false,
            _ = self.console.prompt_enter("Press Enter when you are ready to begin", "") => true,
        };

        if ready {
            self.console.print("Starting hardware tests.");
            let ctx = TestContext::new(device, self.console, self.config);
            let total = tests.len();

            for (index, mut test) in tests.into_iter().enumerate() {
                self.print_banner(&format!(
                    "[{}/{}] Running test {}",
                    index + 1,
                    total,
                    test.name()
                ));

                let finished = tokio::select! {
                    biased;
                    _ = &mut interrupt => None,
                    ok = test.run(&ctx) => Some(ok),
                };

                match finished {
                    Some(ok) => {
                        let record = test.record();
                        info!(
                            test = %record.name,
                            ok,
                            passed = record.passed,
                            failed = record.failed,
                            skipped = record.skipped,
                            "test complete"
                        );
                        report.add_test(record.clone());
                    }
                    None => {
                        let record = test.record_mut();
                        record.interrupt();
                        warn!(test = %record.name, "test interrupted");
                        report.add_test(record.clone());
                        report.mark_interrupted();
                        break;
                    }
                }
            }
        } else {
            report.mark_interrupted();
        }

        if report.interrupted {
            self.handle_interrupt(device).await;
        }

        report.mark_completed();
        for line in report.render_text() {
            self.console.print(&line);
        }
        report
    }

    async fn handle_interrupt(&self, device: &dyn DeviceRpc) {
        let status = clear_indicator(device).await;
        if !status.is_ok() {
            warn!(%status, "could not clear indicator after interrupt");
        }
        self.console.blank();
        self.console.print("Ctrl-C detected, exiting.");
    }
}
