//! Discrete button check.
//!
//! For each configured button the operator is asked to press it, then a press event
//! and a release event must each arrive within the configured bound.

use async_trait::async_trait;
use tokio::time::Duration;

use super::{HardwareTest, TestContext, TestRecord};
use crate::config::ButtonsConfig;
use crate::device::{EventField, TestType};
use crate::event_waiter::{EventMatcher, EventWaiter};

const SETUP: &str = "buttons_setup";
const TEARDOWN: &str = "buttons_teardown";

pub struct ButtonsTest {
    record: TestRecord,
    buttons: Vec<(String, EventField)>,
    timeout: Duration,
}

impl ButtonsTest {
    /// Labels that do not name a button are ignored; [`ButtonsConfig`] validation
    /// rejects them before a run.
    pub fn new(config: &ButtonsConfig) -> Self {
        let buttons: Vec<(String, EventField)> = config
            .buttons
            .iter()
            .filter_map(|label| {
                EventField::button(label).map(|field| (label.to_ascii_uppercase(), field))
            })
            .collect();
        let planned = buttons.iter().map(|(label, _)| subcheck_name(label));
        Self {
            record: TestRecord::new("Buttons", planned.collect::<Vec<_>>()),
            buttons,
            timeout: config.timeout(),
        }
    }

    async fn test_button(&mut self, ctx: &TestContext<'_>, waiter: &EventWaiter, index: usize) {
        let (label, field) = self.buttons[index].clone();
        let name = subcheck_name(&label);
        ctx.console.prompt_action(&format!("Press Button {label}"));

        for matcher in [EventMatcher::pressed(field), EventMatcher::released(field)] {
            let outcome = waiter.arm_and_wait(matcher, self.timeout).await;
            if let Some(detail) = outcome.failure_detail() {
                ctx.fail(&mut self.record, &name, detail).await;
                return;
            }
        }
        ctx.pass(&mut self.record, &name).await;
    }
}

fn subcheck_name(label: &str) -> String {
    format!("button_{}", label.to_ascii_lowercase())
}

#[async_trait]
impl HardwareTest for ButtonsTest {
    fn record(&self) -> &TestRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut TestRecord {
        &mut self.record
    }

    async fn execute(&mut self, ctx: &TestContext<'_>) {
        // Subscribe before entering test mode so no early event is lost.
        let mut waiter = match EventWaiter::attach(ctx.device) {
            Ok(waiter) => waiter,
            Err(e) => {
                ctx.fail(&mut self.record, SETUP, e.to_string()).await;
                return;
            }
        };

        if !ctx.start_test(&mut self.record, TestType::Buttons, SETUP).await {
            return;
        }

        for index in 0..self.buttons.len() {
            self.test_button(ctx, &waiter, index).await;
        }

        ctx.end_test(&mut self.record, TestType::Buttons, TEARDOWN).await;
        waiter.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::TestOutcome;
    use crate::config::FactoryConfig;
    use crate::console::ScriptedConsole;
    use crate::device::{DeviceEvent, Method, MockDevice, Status};

    fn fast_config() -> FactoryConfig {
        let mut config = FactoryConfig::default();
        config.indicator.blink_ms = 0;
        config.buttons.timeout_secs = 0.3;
        config.buttons.buttons = vec!["A".into(), "B".into()];
        config
    }

    fn script(fields: &[EventField]) -> Vec<(Duration, DeviceEvent)> {
        let step = Duration::from_millis(20);
        fields
            .iter()
            .flat_map(|&field| {
                [
                    (step, DeviceEvent::with(field, true)),
                    (step, DeviceEvent::with(field, false)),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_buttons_pass() {
        let config = fast_config();
        let device = MockDevice::new().with_event_script(script(&[EventField::ButtonA, EventField::ButtonB]));
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = ButtonsTest::new(&config.buttons);
        assert!(test.run(&ctx).await);

        let record = test.record();
        assert_eq!(record.passed, 2);
        assert_eq!(record.outcomes[0].name, "button_a");
        assert!(console.saw(">>> Press Button B"));
        assert_eq!(device.call_count("factory.Factory/EndTest"), 1);
        assert_eq!(device.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_release_times_out() {
        let config = fast_config();
        // A is pressed but never released; B is never touched
        let device = MockDevice::new()
            .with_event_script([(Duration::from_millis(20), DeviceEvent::with(EventField::ButtonA, true))]);
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = ButtonsTest::new(&config.buttons);
        assert!(!test.run(&ctx).await);

        let record = test.record();
        assert_eq!(record.failed, 2);
        assert_eq!(
            record.outcomes[0].detail.as_deref(),
            Some("No device response detected within 0.3s")
        );
        assert!(console.saw("FAIL: button_a"));
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_setup_failure() {
        let config = fast_config();
        let device = MockDevice::new().with_subscribe_failure("stream refused");
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = ButtonsTest::new(&config.buttons);
        assert!(!test.run(&ctx).await);

        let record = test.record();
        assert_eq!(record.outcomes[0].name, SETUP);
        assert_eq!(
            record.outcomes[0].detail.as_deref(),
            Some("Event subscription error: stream refused")
        );
        // never entered test mode
        assert_eq!(device.call_count("factory.Factory/StartTest"), 0);
    }

    #[tokio::test]
    async fn test_start_failure_skips_buttons() {
        let config = fast_config();
        let device = MockDevice::new()
            .with_failure(Method::StartTest(TestType::Buttons), Status::FailedPrecondition);
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = ButtonsTest::new(&config.buttons);
        assert!(!test.run(&ctx).await);

        let record = test.record();
        assert_eq!(record.outcomes[0].name, SETUP);
        assert_eq!(record.outcomes[0].outcome, TestOutcome::Fail);
        assert_eq!(record.skipped, 2);
        assert_eq!(device.call_count("factory.Factory/EndTest"), 0);
        assert_eq!(device.subscriber_count(), 0);
    }
}
