//! BME688 gas resistance and temperature check.
//!
//! Both halves need something the operator may not have to hand (an alcohol-based
//! solution, or a warm fingertip), so each is gated by a `[Y/n]` question. Declining
//! records the half's subchecks as skipped. The halves are independent: a failed gas
//! half still leaves the temperature half to run.

use async_trait::async_trait;

use super::{analog_phase, baseline, AnalogPhase, HardwareTest, TestContext, TestRecord};
use crate::device::{Field, Method, TestType};

const GAS_POOR: &str = "bme688_gas_resistance_poor";
const GAS_NORMAL: &str = "bme688_gas_resistance_normal";
const TEMP_HOT: &str = "bme688_temperature_hot";
const TEMP_NORMAL: &str = "bme688_temperature_normal";

const BEGIN_MEASURING: &str = "Press Enter to begin measuring...";

pub struct Bme688Test {
    record: TestRecord,
}

impl Bme688Test {
    pub fn new() -> Self {
        Self {
            record: TestRecord::new("BME688", [GAS_POOR, GAS_NORMAL, TEMP_HOT, TEMP_NORMAL].map(String::from)),
        }
    }

    /// Asks `question`; on "no" records every name in `subchecks` as skipped.
    async fn gate(&mut self, ctx: &TestContext<'_>, question: &str, subchecks: &[&str]) -> bool {
        if ctx.console.prompt_yes_no(question).await {
            return true;
        }
        for name in subchecks {
            ctx.skip(&mut self.record, name, "declined by operator").await;
        }
        false
    }

    async fn test_gas(&mut self, ctx: &TestContext<'_>) -> bool {
        let cfg = &ctx.config.bme688;
        let phase = |subcheck, params| AnalogPhase {
            subcheck,
            method: Method::AirSensorMeasure,
            field: Field::GasResistance,
            units: "Ohms",
            params,
        };

        ctx.console.print("Measuring gas resistance baseline");
        if baseline(
            ctx,
            &mut self.record,
            phase(GAS_POOR, ctx.sampler(cfg.baseline_samples, cfg.delay())),
        )
        .await
        .is_none()
        {
            return false;
        }

        let params = ctx.sampler(cfg.max_samples, cfg.delay());
        ctx.console
            .prompt_enter("Move the alcohol close to the BME688 sensor", BEGIN_MEASURING)
            .await;
        let poor = cfg.poor_gas_threshold;
        if !analog_phase(ctx, &mut self.record, phase(GAS_POOR, params), |avg| avg < poor).await {
            return false;
        }

        ctx.console
            .prompt_enter("Move the alcohol away from the BME688 sensor", BEGIN_MEASURING)
            .await;
        let normal = cfg.normal_gas_threshold;
        analog_phase(ctx, &mut self.record, phase(GAS_NORMAL, params), |avg| avg > normal).await
    }

    async fn test_temperature(&mut self, ctx: &TestContext<'_>) -> bool {
        let cfg = &ctx.config.bme688;
        let phase = |subcheck, params| AnalogPhase {
            subcheck,
            method: Method::AirSensorMeasure,
            field: Field::Temperature,
            units: "C",
            params,
        };

        ctx.console.print("Measuring temperature baseline");
        let Some(base) = baseline(
            ctx,
            &mut self.record,
            phase(TEMP_HOT, ctx.sampler(cfg.baseline_samples, cfg.delay())),
        )
        .await
        else {
            return false;
        };

        let params = ctx.sampler(cfg.max_samples, cfg.delay());
        ctx.console
            .prompt_enter("Place your finger on the BME688 sensor", BEGIN_MEASURING)
            .await;
        let hot = base + cfg.hot_delta_c;
        if !analog_phase(ctx, &mut self.record, phase(TEMP_HOT, params), |avg| avg > hot).await {
            return false;
        }

        let params = ctx.sampler(cfg.cooldown_max_samples, cfg.delay());
        ctx.console
            .prompt_enter("Remove your finger from the BME688 sensor", BEGIN_MEASURING)
            .await;
        let tolerance = cfg.temperature_tolerance_c;
        analog_phase(ctx, &mut self.record, phase(TEMP_NORMAL, params), |avg| {
            (avg - base).abs() < tolerance
        })
        .await
    }
}

impl Default for Bme688Test {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareTest for Bme688Test {
    fn record(&self) -> &TestRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut TestRecord {
        &mut self.record
    }

    async fn execute(&mut self, ctx: &TestContext<'_>) {
        if !ctx
            .start_test(&mut self.record, TestType::Bme688, "bme688_setup")
            .await
        {
            return;
        }

        let gas_question = "For this test you need an alcohol-based solution (e.g. hand sanitizer). \
                            Are you able to continue this test?";
        if self.gate(ctx, gas_question, &[GAS_POOR, GAS_NORMAL]).await {
            self.test_gas(ctx).await;
        }

        let temp_question = "For this test you need to warm the sensor with a fingertip. \
                             Are you able to continue this test?";
        if self.gate(ctx, temp_question, &[TEMP_HOT, TEMP_NORMAL]).await {
            self.test_temperature(ctx).await;
        }

        ctx.end_test(&mut self.record, TestType::Bme688, "bme688_teardown")
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::TestOutcome;
    use crate::config::FactoryConfig;
    use crate::console::ScriptedConsole;
    use crate::device::{AirMeasurement, MockDevice};

    fn fast_config() -> FactoryConfig {
        let mut config = FactoryConfig::default();
        config.indicator.blink_ms = 0;
        config.bme688.delay_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_happy_path_passes_both_halves() {
        let config = fast_config();
        let device = MockDevice::happy_path();
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(test.run(&ctx).await);
        assert_eq!(test.record().passed, 4);
        assert!(console.saw("Ohms"));
    }

    #[tokio::test]
    async fn test_declining_both_gates_skips_everything() {
        let config = fast_config();
        let device = MockDevice::happy_path();
        let console = ScriptedConsole::with_answers([false, false]);
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(test.run(&ctx).await);

        let record = test.record();
        assert_eq!((record.passed, record.failed, record.skipped), (0, 0, 4));
        assert!(record.outcomes.iter().all(|o| o.outcome == TestOutcome::Skip));
        assert_eq!(device.call_count("air_sensor.AirSensor/Measure"), 0);
        assert_eq!(device.call_count("factory.Factory/EndTest"), 1);
    }

    #[tokio::test]
    async fn test_declined_gas_still_runs_temperature() {
        let config = fast_config();
        let device = MockDevice::happy_path();
        let console = ScriptedConsole::with_answers([false]);
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(test.run(&ctx).await);

        let record = test.record();
        assert_eq!((record.passed, record.skipped), (2, 2));
        assert_eq!(record.outcomes[2].name, TEMP_HOT);
    }

    #[tokio::test]
    async fn test_failed_gas_half_still_tests_temperature() {
        let mut config = fast_config();
        config.bme688.max_samples = 8;
        let ambient = AirMeasurement {
            temperature: 24.0,
            gas_resistance: 55000.0,
            ..Default::default()
        };
        let warm = AirMeasurement {
            temperature: 30.0,
            ..ambient
        };
        // gas baseline and a poor phase that never drops, then a normal warm-up
        let mut air = vec![ambient; 10 + 8];
        air.extend([ambient; 10]);
        air.extend([warm; 6]);
        air.extend([ambient; 6]);
        let device = MockDevice::new().with_air(air);
        let console = ScriptedConsole::unattended();
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(!test.run(&ctx).await);

        let outcome = |name: &str| test.record().outcomes.iter().find(|o| o.name == name).unwrap().outcome;
        assert_eq!(outcome(GAS_POOR), TestOutcome::Fail);
        assert_eq!(outcome(GAS_NORMAL), TestOutcome::Skip);
        assert_eq!(outcome(TEMP_HOT), TestOutcome::Pass);
        assert_eq!(outcome(TEMP_NORMAL), TestOutcome::Pass);
        assert!(console.saw("Place your finger on the BME688 sensor"));
        assert_eq!(device.call_count("factory.Factory/EndTest"), 1);
    }

    #[tokio::test]
    async fn test_gas_recovery_bounded_by_max_samples() {
        let config = fast_config();
        assert_ne!(config.bme688.max_samples, config.bme688.cooldown_max_samples);
        let ambient = AirMeasurement {
            temperature: 24.0,
            gas_resistance: 55000.0,
            ..Default::default()
        };
        let alcohol = AirMeasurement {
            gas_resistance: 6000.0,
            ..ambient
        };
        // the alcohol never clears; the last reading repeats
        let mut air = vec![ambient; 10];
        air.push(alcohol);
        let device = MockDevice::new().with_air(air);
        let console = ScriptedConsole::with_answers([true, false]);
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(!test.run(&ctx).await);

        let record = test.record();
        let normal = record.outcomes.iter().find(|o| o.name == GAS_NORMAL).unwrap();
        assert_eq!(normal.outcome, TestOutcome::Fail);
        assert_eq!(normal.samples.unwrap().count, config.bme688.max_samples);
    }

    #[tokio::test]
    async fn test_sensor_that_never_warms_fails() {
        let mut config = fast_config();
        config.bme688.max_samples = 15;
        let ambient = AirMeasurement {
            temperature: 24.0,
            gas_resistance: 55000.0,
            ..Default::default()
        };
        let device = MockDevice::new().with_air([ambient; 40]);
        let console = ScriptedConsole::with_answers([false, true]);
        let ctx = TestContext::new(&device, &console, &config);

        let mut test = Bme688Test::new();
        assert!(!test.run(&ctx).await);

        let record = test.record();
        let hot = record.outcomes.iter().find(|o| o.name == TEMP_HOT).unwrap();
        assert_eq!(hot.outcome, TestOutcome::Fail);
        assert_eq!(hot.samples.unwrap().max, 24.0);
        let normal = record.outcomes.iter().find(|o| o.name == TEMP_NORMAL).unwrap();
        assert_eq!(normal.outcome, TestOutcome::Skip);
    }
}
