//! Factory test orchestration for the Enviro+ sensor pack.
//!
//! Drives a device under test through an ordered suite of hardware checks (LED,
//! buttons, LTR559 light/proximity, BME688 gas/temperature), talks to the operator
//! at each phase boundary, and produces a pass/fail/skip report.
//!
//! The device and the operator are both collaborators behind traits
//! ([`device::DeviceRpc`], [`console::Console`]), so the whole suite runs unchanged
//! against [`device::MockDevice`] and [`console::ScriptedConsole`].

pub mod checks;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod event_waiter;
pub mod indicator;
pub mod logging;
pub mod report;
pub mod runner;
pub mod sampling;

pub use config::FactoryConfig;
pub use error::{FactoryError, FactoryResult};
pub use report::{RunMetadata, SuiteReport};
pub use runner::{query_device_info, TestRunner};
