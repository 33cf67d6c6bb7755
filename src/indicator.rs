//! RGB status indicator on the device.
//!
//! Used for operator feedback (a short green or red flash after each subcheck) and as
//! the output under test in the LED check. Blinks are best-effort; explicit set/clear
//! calls return the device status so callers can treat a failure as fatal.

use serde::Serialize;
use std::fmt;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::config::IndicatorConfig;
use crate::device::{DeviceRpc, Method, Status};

/// Named 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub name: &'static str,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255, "white");
    pub const RED: Color = Color::new(255, 0, 0, "red");
    pub const GREEN: Color = Color::new(0, 255, 0, "green");
    pub const BLUE: Color = Color::new(0, 0, 255, "blue");
    pub const OFF: Color = Color::new(0, 0, 0, "off");

    pub const fn new(r: u8, g: u8, b: u8, name: &'static str) -> Self {
        Self { r, g, b, name }
    }

    /// `0xRRGGBB`
    pub fn hex(&self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Borrowed view of the device's indicator.
pub struct Indicator<'a> {
    device: &'a dyn DeviceRpc,
    brightness: u8,
    blink: Duration,
}

impl<'a> Indicator<'a> {
    pub fn new(device: &'a dyn DeviceRpc, config: &IndicatorConfig) -> Self {
        Self {
            device,
            brightness: config.brightness,
            blink: Duration::from_millis(config.blink_ms),
        }
    }

    pub async fn set(&self, color: Color) -> Status {
        let (status, _) = self
            .device
            .call(Method::SetRgb {
                hex: color.hex(),
                brightness: self.brightness,
            })
            .await;
        status
    }

    pub async fn clear(&self) -> Status {
        clear_indicator(self.device).await
    }

    /// off, `color`, off. Failures are logged and otherwise ignored.
    pub async fn blink(&self, color: Color) {
        let mut statuses = vec![self.clear().await];
        sleep(self.blink).await;
        statuses.push(self.set(color).await);
        sleep(self.blink).await;
        statuses.push(self.clear().await);
        if let Some(status) = statuses.iter().find(|s| !s.is_ok()) {
            warn!(%color, %status, "indicator blink failed");
        }
    }
}

/// Turns the indicator off.
pub async fn clear_indicator(device: &dyn DeviceRpc) -> Status {
    let (status, _) = device
        .call(Method::SetRgb {
            hex: 0,
            brightness: 0,
        })
        .await;
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;

    #[test]
    fn test_color_hex() {
        assert_eq!(Color::WHITE.hex(), 0xffffff);
        assert_eq!(Color::RED.hex(), 0xff0000);
        assert_eq!(Color::new(0x12, 0x34, 0x56, "x").hex(), 0x123456);
        assert_eq!(Color::OFF.hex(), 0);
    }

    #[tokio::test]
    async fn test_blink_ends_cleared() {
        let device = MockDevice::new();
        let config = IndicatorConfig {
            blink_ms: 0,
            brightness: 255,
        };
        Indicator::new(&device, &config).blink(Color::GREEN).await;

        let calls = device.calls();
        assert_eq!(
            calls,
            vec![
                Method::SetRgb { hex: 0, brightness: 0 },
                Method::SetRgb {
                    hex: 0x00ff00,
                    brightness: 255
                },
                Method::SetRgb { hex: 0, brightness: 0 },
            ]
        );
        assert_eq!(device.indicator(), Some((0, 0)));
    }

    #[tokio::test]
    async fn test_set_reports_status() {
        let device = MockDevice::new().with_failure(
            Method::SetRgb {
                hex: 0xff0000,
                brightness: 255,
            },
            Status::Unavailable,
        );
        let config = IndicatorConfig::default();
        let indicator = Indicator::new(&device, &config);
        assert_eq!(indicator.set(Color::RED).await, Status::Unavailable);
        assert_eq!(indicator.clear().await, Status::Ok);
    }
}
