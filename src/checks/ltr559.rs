//! LTR559 proximity and ambient light check.
//!
//! Proximity: baseline, then covered (near) and uncovered (far).
//! Light: baseline, then dark, bright, and back to neutral.
//!
//! Each sensor runs inside its own device test mode. A failed phase ends that sensor's
//! sequence; later phases are recorded as skipped.

use async_trait::async_trait;

use super::{analog_phase, baseline, AnalogPhase, HardwareTest, TestContext, TestRecord};
use crate::console::PRESS_ENTER;
use crate::device::{Field, Method, TestType};

const PROX_NEAR: &str = "ltr559_prox_near";
const PROX_FAR: &str = "ltr559_prox_far";
const LIGHT_DARK: &str = "ltr559_light_dark";
const LIGHT_BRIGHT: &str = "ltr559_light_bright";
const LIGHT_NEUTRAL: &str = "ltr559_light_neutral";

pub struct Ltr559Test {
    record: TestRecord,
}

impl Ltr559Test {
    pub fn new() -> Self {
        let planned = [PROX_NEAR, PROX_FAR, LIGHT_DARK, LIGHT_BRIGHT, LIGHT_NEUTRAL];
        Self {
            record: TestRecord::new("LTR559", planned.map(String::from)),
        }
    }

    async fn test_proximity(&mut self, ctx: &TestContext<'_>) -> bool {
        let cfg = &ctx.config.ltr559;
        let phase = |subcheck, params| AnalogPhase {
            subcheck,
            method: Method::SampleLtr559Prox,
            field: Field::Value,
            units: "",
            params,
        };

        ctx.console
            .prompt_enter("Place your Enviro+ pack in a well-lit area", PRESS_ENTER)
            .await;
        let Some(base) = baseline(
            ctx,
            &mut self.record,
            phase(PROX_NEAR, ctx.sampler(cfg.baseline_samples, cfg.delay())),
        )
        .await
        else {
            return false;
        };

        let params = ctx.sampler(cfg.prox_max_samples, cfg.delay());
        ctx.console
            .prompt_enter("Fully cover the LIGHT sensor", PRESS_ENTER)
            .await;
        let near = cfg.prox_near_threshold;
        if !analog_phase(ctx, &mut self.record, phase(PROX_NEAR, params), |avg| avg > near).await {
            return false;
        }

        ctx.console
            .prompt_enter("Fully uncover the LIGHT sensor", PRESS_ENTER)
            .await;
        let tolerance = cfg.prox_far_tolerance;
        analog_phase(ctx, &mut self.record, phase(PROX_FAR, params), |avg| {
            (avg - base).abs() < tolerance
        })
        .await
    }

    async fn test_light(&mut self, ctx: &TestContext<'_>) -> bool {
        let cfg = &ctx.config.ltr559;
        let phase = |subcheck, params| AnalogPhase {
            subcheck,
            method: Method::SampleLtr559Light,
            field: Field::Lux,
            units: "lux",
            params,
        };

        ctx.console
            .prompt_enter("Place your Enviro+ pack in an area with neutral light", PRESS_ENTER)
            .await;
        let Some(base) = baseline(
            ctx,
            &mut self.record,
            phase(LIGHT_DARK, ctx.sampler(cfg.baseline_samples, cfg.delay())),
        )
        .await
        else {
            return false;
        };

        let params = ctx.sampler(cfg.light_max_samples, cfg.delay());
        ctx.console
            .prompt_enter("Cover the LIGHT sensor with your finger", PRESS_ENTER)
            .await;
        let dark = cfg.light_dark_threshold;
        if !analog_phase(ctx, &mut self.record, phase(LIGHT_DARK, params), |avg| avg < dark).await {
            return false;
        }

        ctx.console
            .prompt_enter("Shine a light directly at the LIGHT sensor", PRESS_ENTER)
            .await;
        let delta = cfg.light_bright_delta;
        if !analog_phase(ctx, &mut self.record, phase(LIGHT_BRIGHT, params), |avg| {
            (avg - base).abs() > delta
        })
        .await
        {
            return false;
        }

        ctx.console
            .prompt_enter("Return the LIGHT sensor to its original position", PRESS_ENTER)
            .await;
        let tolerance = cfg.light_neutral_tolerance;
        analog_phase(ctx, &mut self.record, phase(LIGHT_NEUTRAL, params), |avg| {
            (avg - base).abs() < tolerance
        })
        .await
    }
}

impl Default for Ltr559Test {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareTest for Ltr559Test {
    fn record(&self) -> &TestRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut TestRecord {
        &mut self.record
    }

    async fn execute(&mut self, ctx: &TestContext<'_>) {
        if !ctx
            .start_test(&mut self.record, TestType::Ltr559Prox, "ltr559_prox_setup")
            .await
        {
            return;
        }
        ctx.console.print("Setting LTR559 sensor to proximity mode.");
        let prox_ok = self.test_proximity(ctx).await;
        if !ctx
            .end_test(&mut self.record, TestType::Ltr559Prox, "ltr559_prox_teardown")
            .await
            || !prox_ok
        {
            return;
        }

        if !ctx
            .start_test(&mut self.record, TestType::Ltr559Light, "ltr559_light_setup")
            .await
        {
            return;
        }
        ctx.console.print("Setting LTR559 sensor to light mode.");
        self.test_light(ctx).await;
        ctx.end_test(&mut self.record, TestType::Ltr559Light, "ltr559_light_teardown")
            .await;
    }
}
