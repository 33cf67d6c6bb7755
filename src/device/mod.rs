//! Device collaborator interface.
//!
//! The factory tool never talks to a transport directly. Everything it needs from the
//! device under test goes through [`DeviceRpc`]:
//!
//! - [`DeviceRpc::call`] - synchronous request/response returning a `(Status, Response)` pair
//! - [`DeviceRpc::subscribe`] - push-based event stream delivered to a callback on a
//!   separate execution context until the returned [`SubscriptionHandle`] is cancelled
//!
//! # Data Flow
//!
//! ```text
//! HardwareTest --[Method]--> DeviceRpc::call --> (Status, Response)
//! DeviceRpc::subscribe --[DeviceEvent]--> EventCallback --> EventWaiter
//! ```
//!
//! No retry is performed on a non-OK status; callers decide what a failure means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FactoryError, FactoryResult};

pub mod mock;

pub use mock::MockDevice;

// =============================================================================
// Status codes
// =============================================================================

/// RPC completion status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    NotFound,
    Unavailable,
    DeadlineExceeded,
    FailedPrecondition,
    Internal,
    Unknown,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::Unavailable => "UNAVAILABLE",
            Status::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Status::FailedPrecondition => "FAILED_PRECONDITION",
            Status::Internal => "INTERNAL",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Device-side test mode selected by `StartTest`/`EndTest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestType {
    Buttons,
    Ltr559Prox,
    Ltr559Light,
    Bme688,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Buttons => "BUTTONS",
            TestType::Ltr559Prox => "LTR559_PROX",
            TestType::Ltr559Light => "LTR559_LIGHT",
            TestType::Bme688 => "BME688",
        }
    }
}

/// A service method invocation together with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    GetDeviceInfo,
    StartTest(TestType),
    EndTest(TestType),
    SampleLtr559Prox,
    SampleLtr559Light,
    AirSensorMeasure,
    SetRgb { hex: u32, brightness: u8 },
}

impl Method {
    /// Fully qualified `service/method` name.
    pub fn service_method(&self) -> &'static str {
        match self {
            Method::GetDeviceInfo => "factory.Factory/GetDeviceInfo",
            Method::StartTest(_) => "factory.Factory/StartTest",
            Method::EndTest(_) => "factory.Factory/EndTest",
            Method::SampleLtr559Prox => "factory.Factory/SampleLtr559Prox",
            Method::SampleLtr559Light => "factory.Factory/SampleLtr559Light",
            Method::AirSensorMeasure => "air_sensor.AirSensor/Measure",
            Method::SetRgb { .. } => "blinky.Blinky/SetRgb",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_method())
    }
}

// =============================================================================
// Responses
// =============================================================================

/// One reading from the BME688 air sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AirMeasurement {
    /// Degrees Celsius
    pub temperature: f64,
    /// Hectopascal
    pub pressure: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Ohms; drops in the presence of volatile compounds
    pub gas_resistance: f64,
}

/// Structured response record returned with every call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Response {
    #[default]
    Empty,
    DeviceInfo { flash_id: u64 },
    Proximity { value: f64 },
    Light { lux: f64 },
    Air(AirMeasurement),
}

/// Named scalar field of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Value,
    Lux,
    GasResistance,
    Temperature,
    Pressure,
    Humidity,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Value => "value",
            Field::Lux => "lux",
            Field::GasResistance => "gas_resistance",
            Field::Temperature => "temperature",
            Field::Pressure => "pressure",
            Field::Humidity => "humidity",
        }
    }
}

impl Response {
    /// Extracts a named scalar, or `None` if this response has no such field.
    pub fn field(&self, field: Field) -> Option<f64> {
        match (self, field) {
            (Response::Proximity { value }, Field::Value) => Some(*value),
            (Response::Light { lux }, Field::Lux) => Some(*lux),
            (Response::Air(air), Field::GasResistance) => Some(air.gas_resistance),
            (Response::Air(air), Field::Temperature) => Some(air.temperature),
            (Response::Air(air), Field::Pressure) => Some(air.pressure),
            (Response::Air(air), Field::Humidity) => Some(air.humidity),
            _ => None,
        }
    }
}

// =============================================================================
// Streamed events
// =============================================================================

/// Boolean field of a [`DeviceEvent`] that a test can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventField {
    ButtonA,
    ButtonB,
    ButtonX,
    ButtonY,
    Proximity,
    Alarm,
}

impl EventField {
    /// Looks up the pressed-state field for a button label such as `"A"`.
    pub fn button(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "A" => Some(EventField::ButtonA),
            "B" => Some(EventField::ButtonB),
            "X" => Some(EventField::ButtonX),
            "Y" => Some(EventField::ButtonY),
            _ => None,
        }
    }

    /// Wire name of the field.
    pub fn proto_field(&self) -> &'static str {
        match self {
            EventField::ButtonA => "button_a_pressed",
            EventField::ButtonB => "button_b_pressed",
            EventField::ButtonX => "button_x_pressed",
            EventField::ButtonY => "button_y_pressed",
            EventField::Proximity => "proximity",
            EventField::Alarm => "alarm",
        }
    }
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proto_field())
    }
}

/// One event from the device's pub/sub stream. Exactly one field is normally set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_a_pressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_b_pressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_x_pressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_y_pressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voc_level: Option<f64>,
}

impl DeviceEvent {
    /// Builds an event carrying a single boolean field.
    pub fn with(field: EventField, value: bool) -> Self {
        let mut event = Self::default();
        *event.slot_mut(field) = Some(value);
        event
    }

    pub fn get(&self, field: EventField) -> Option<bool> {
        match field {
            EventField::ButtonA => self.button_a_pressed,
            EventField::ButtonB => self.button_b_pressed,
            EventField::ButtonX => self.button_x_pressed,
            EventField::ButtonY => self.button_y_pressed,
            EventField::Proximity => self.proximity,
            EventField::Alarm => self.alarm,
        }
    }

    fn slot_mut(&mut self, field: EventField) -> &mut Option<bool> {
        match field {
            EventField::ButtonA => &mut self.button_a_pressed,
            EventField::ButtonB => &mut self.button_b_pressed,
            EventField::ButtonX => &mut self.button_x_pressed,
            EventField::ButtonY => &mut self.button_y_pressed,
            EventField::Proximity => &mut self.proximity,
            EventField::Alarm => &mut self.alarm,
        }
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Callback invoked once per streamed event, on the transport's execution context.
pub type EventCallback = Box<dyn Fn(DeviceEvent) + Send + Sync + 'static>;

/// Cancellable handle for a live event subscription.
///
/// Cancelling is idempotent. Dropping the handle cancels the subscription, so a test
/// that unwinds early (including suite interrupt) cannot leak callbacks into the next test.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send + Sync + 'static>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops delivery. No event is delivered after this returns.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Scoped handle to the device under test.
#[async_trait]
pub trait DeviceRpc: Send + Sync {
    /// Performs one request/response call. Never retried by the core.
    async fn call(&self, method: Method) -> (Status, Response);

    /// Starts delivering pub/sub events to `on_event` until the handle is cancelled.
    fn subscribe(&self, on_event: EventCallback) -> FactoryResult<SubscriptionHandle>;

    /// Calls `method` and converts a non-OK status into a [`FactoryError`].
    async fn call_checked(&self, method: Method) -> FactoryResult<Response> {
        let (status, response) = self.call(method).await;
        if status.is_ok() {
            Ok(response)
        } else {
            Err(FactoryError::from_status(method, status))
        }
    }
}
