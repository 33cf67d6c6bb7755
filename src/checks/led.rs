//! Indicator LED check. The operator confirms each colour by eye.

use async_trait::async_trait;

use super::{HardwareTest, TestContext, TestRecord};
use crate::indicator::Color;

const SETUP: &str = "led_setup";
const TEARDOWN: &str = "led_teardown";

/// Colours shown, in order.
pub const LED_COLORS: [Color; 5] = [Color::WHITE, Color::RED, Color::GREEN, Color::BLUE, Color::OFF];

pub struct LedTest {
    record: TestRecord,
}

impl LedTest {
    pub fn new() -> Self {
        Self {
            record: TestRecord::new("LED", LED_COLORS.iter().map(subcheck_name).collect::<Vec<_>>()),
        }
    }

    async fn check_color(&mut self, ctx: &TestContext<'_>, color: Color) {
        let name = subcheck_name(&color);
        let status = ctx.indicator().set(color).await;
        if !status.is_ok() {
            ctx.fail(
                &mut self.record,
                &name,
                format!("SetRgb {color} failed with status {status}"),
            )
            .await;
            return;
        }

        if ctx
            .console
            .prompt_yes_no(&format!("Is the Enviro+ LED {color}?"))
            .await
        {
            ctx.pass(&mut self.record, &name).await;
        } else {
            ctx.fail(&mut self.record, &name, "operator did not confirm colour")
                .await;
        }
    }
}

impl Default for LedTest {
    fn default() -> Self {
        Self::new()
    }
}

fn subcheck_name(color: &Color) -> String {
    format!("led_{}", color.name)
}

#[async_trait]
impl HardwareTest for LedTest {
    fn record(&self) -> &TestRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut TestRecord {
        &mut self.record
    }

    async fn execute(&mut self, ctx: &TestContext<'_>) {
        let status = ctx.indicator().clear().await;
        if !status.is_ok() {
            ctx.fail(
                &mut self.record,
                SETUP,
                format!("clearing LED failed with status {status}"),
            )
            .await;
            return;
        }

        for color in LED_COLORS {
            self.check_color(ctx, color).await;
        }

        let status = ctx.indicator().clear().await;
        if !status.is_ok() {
            ctx.fail(
                &mut self.record,
                TEARDOWN,
                format!("clearing LED failed with status {status}"),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::TestOutcome;
    use crate::config::FactoryConfig;
    use crate::console::ScriptedConsole;
    use crate::device::{Method, MockDevice, Status};

    fn fast_config() -> FactoryConfig {
        let mut config = FactoryConfig::default();
        config.indicator.blink_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_all_colors_confirmed() {
        let config = fast_config();
        let device = MockDevice::new();
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = LedTest::new();
        assert!(test.run(&ctx).await);
        assert_eq!(test.record().passed, 5);
        assert!(console.saw(">>> Is the Enviro+ LED blue? [Y/n] y"));
        assert_eq!(device.indicator(), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_operator_rejects_one_color() {
        let config = fast_config();
        let device = MockDevice::new();
        let console = ScriptedConsole::with_answers([true, false, true, true, true]);
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = LedTest::new();
        assert!(!test.run(&ctx).await);

        let record = test.record();
        assert_eq!((record.passed, record.failed), (4, 1));
        assert_eq!(record.outcomes[1].name, "led_red");
        assert_eq!(record.outcomes[1].outcome, TestOutcome::Fail);
    }

    #[tokio::test]
    async fn test_clear_failure_aborts() {
        let config = fast_config();
        let device = MockDevice::new().with_failure(
            Method::SetRgb {
                hex: 0,
                brightness: 0,
            },
            Status::Unavailable,
        );
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = LedTest::new();
        assert!(!test.run(&ctx).await);

        let record = test.record();
        assert_eq!(record.outcomes[0].name, SETUP);
        assert_eq!(record.skipped, 5);
        assert!(console.transcript().iter().all(|l| !l.contains("Is the Enviro+ LED")));
    }
}
