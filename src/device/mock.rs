//! Mock Device Implementation
//!
//! Provides a simulated Enviro+ board for testing without physical hardware.
//!
//! # Behaviour
//!
//! - Sampling methods pop from per-method scripted queues; the last scripted response
//!   repeats once a queue is exhausted
//! - `StartTest(Buttons)` replays the configured event script on a background task,
//!   so button events arrive on a different execution context than the test
//! - Any exact [`Method`] can be forced to fail with a chosen [`Status`]
//! - Every call is recorded for later assertions

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::debug;

use super::{
    AirMeasurement, DeviceEvent, DeviceRpc, EventCallback, EventField, Method, Response, Status,
    SubscriptionHandle, TestType,
};
use crate::error::{FactoryError, FactoryResult};

// =============================================================================
// MockDevice - Simulated Enviro+ board
// =============================================================================

/// Scripted in-memory device.
///
/// Cheap to clone; clones share state, so a test can keep one handle for assertions
/// while the runner owns another.
///
/// # Example
///
/// ```rust,ignore
/// let device = MockDevice::new().with_values(Method::SampleLtr559Prox, [100.0, 30000.0]);
/// let (status, response) = device.call(Method::SampleLtr559Prox).await;
/// ```
#[derive(Clone, Default)]
pub struct MockDevice {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    subscribers: Mutex<BTreeMap<u64, EventCallback>>,
}

#[derive(Default)]
struct State {
    flash_id: u64,
    samples: HashMap<Method, VecDeque<Response>>,
    failures: HashMap<Method, Status>,
    event_script: Vec<(Duration, DeviceEvent)>,
    calls: Vec<Method>,
    next_subscriber: u64,
    subscribe_error: Option<String>,
    indicator: Option<(u32, u8)>,
}

impl MockDevice {
    /// Create a mock with no scripted readings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flash id reported by `GetDeviceInfo`.
    pub fn with_flash_id(self, flash_id: u64) -> Self {
        self.inner.state.lock().flash_id = flash_id;
        self
    }

    /// Queues raw responses for a sampling method.
    pub fn with_responses(
        self,
        method: Method,
        responses: impl IntoIterator<Item = Response>,
    ) -> Self {
        self.push_responses(method, responses);
        self
    }

    /// Queues scalar readings for `SampleLtr559Prox` or `SampleLtr559Light`.
    pub fn with_values(self, method: Method, values: impl IntoIterator<Item = f64>) -> Self {
        let responses: Vec<Response> = values
            .into_iter()
            .map(|v| match method {
                Method::SampleLtr559Light => Response::Light { lux: v },
                _ => Response::Proximity { value: v },
            })
            .collect();
        self.with_responses(method, responses)
    }

    /// Queues air sensor measurements for `AirSensorMeasure`.
    pub fn with_air(self, readings: impl IntoIterator<Item = AirMeasurement>) -> Self {
        self.with_responses(
            Method::AirSensorMeasure,
            readings.into_iter().map(Response::Air),
        )
    }

    /// Forces `method` (exact arguments) to return `status`.
    pub fn with_failure(self, method: Method, status: Status) -> Self {
        self.inner.state.lock().failures.insert(method, status);
        self
    }

    /// Events replayed, after their delays, once `StartTest(Buttons)` is called.
    pub fn with_event_script(self, script: impl IntoIterator<Item = (Duration, DeviceEvent)>) -> Self {
        self.inner.state.lock().event_script = script.into_iter().collect();
        self
    }

    /// Makes every `subscribe` call fail with `reason`.
    pub fn with_subscribe_failure(self, reason: impl Into<String>) -> Self {
        self.inner.state.lock().subscribe_error = Some(reason.into());
        self
    }

    pub fn push_responses(&self, method: Method, responses: impl IntoIterator<Item = Response>) {
        self.inner
            .state
            .lock()
            .samples
            .entry(method)
            .or_default()
            .extend(responses);
    }

    /// Delivers an event to every live subscriber, in subscription order.
    pub fn emit(&self, event: DeviceEvent) {
        let subscribers = self.inner.subscribers.lock();
        debug!(?event, subscribers = subscribers.len(), "MockDevice: emitting event");
        for callback in subscribers.values() {
            callback(event.clone());
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Method> {
        self.inner.state.lock().calls.clone()
    }

    /// Number of calls to the given `service/method`, regardless of arguments.
    pub fn call_count(&self, service_method: &str) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .iter()
            .filter(|m| m.service_method() == service_method)
            .count()
    }

    /// Last `(hex, brightness)` written to the RGB indicator.
    pub fn indicator(&self) -> Option<(u32, u8)> {
        self.inner.state.lock().indicator
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// A device whose readings satisfy every phase of the default suite on the
    /// first full window, and whose buttons are pressed and released shortly after
    /// the buttons test starts.
    pub fn happy_path() -> Self {
        let baseline_prox = 120.0;
        let baseline_lux = 60.0;
        let ambient = AirMeasurement {
            temperature: 24.0,
            pressure: 1013.0,
            humidity: 40.0,
            gas_resistance: 55000.0,
        };
        let alcohol = AirMeasurement {
            gas_resistance: 6000.0,
            ..ambient
        };
        let warm = AirMeasurement {
            temperature: 29.5,
            ..ambient
        };

        let mut prox = vec![baseline_prox; 5];
        prox.extend([30000.0; 6]);
        prox.extend([baseline_prox; 6]);

        let mut light = vec![baseline_lux; 5];
        light.extend([1.0; 6]);
        light.extend([5000.0; 6]);
        light.extend([baseline_lux; 6]);

        // gas: baseline, poor, normal; temperature: baseline, hot, normal
        let mut air = vec![ambient; 10];
        air.extend([alcohol; 6]);
        air.extend([ambient; 6]);
        air.extend([ambient; 10]);
        air.extend([warm; 6]);
        air.extend([ambient; 6]);

        let step = Duration::from_millis(150);
        let script = [
            EventField::ButtonA,
            EventField::ButtonB,
            EventField::ButtonX,
            EventField::ButtonY,
        ]
        .into_iter()
        .flat_map(|field| {
            [
                (step, DeviceEvent::with(field, true)),
                (step, DeviceEvent::with(field, false)),
            ]
        });

        Self::new()
            .with_flash_id(0xE660_5838_3B47_9C2A)
            .with_values(Method::SampleLtr559Prox, prox)
            .with_values(Method::SampleLtr559Light, light)
            .with_air(air)
            .with_event_script(script)
    }

    fn next_sample(&self, method: Method) -> Response {
        let mut state = self.inner.state.lock();
        let queue = state.samples.entry(method).or_default();
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        response.unwrap_or(match method {
            Method::SampleLtr559Light => Response::Light { lux: 0.0 },
            Method::AirSensorMeasure => Response::Air(AirMeasurement::default()),
            _ => Response::Proximity { value: 0.0 },
        })
    }

    fn play_event_script(&self) {
        let script = self.inner.state.lock().event_script.clone();
        if script.is_empty() {
            return;
        }
        let device = self.clone();
        tokio::spawn(async move {
            for (delay, event) in script {
                sleep(delay).await;
                device.emit(event);
            }
        });
    }
}

#[async_trait]
impl DeviceRpc for MockDevice {
    async fn call(&self, method: Method) -> (Status, Response) {
        let (failure, flash_id) = {
            let mut state = self.inner.state.lock();
            state.calls.push(method);
            (state.failures.get(&method).copied(), state.flash_id)
        };
        if let Some(status) = failure {
            debug!(%method, %status, "MockDevice: forced failure");
            return (status, Response::Empty);
        }

        let response = match method {
            Method::GetDeviceInfo => Response::DeviceInfo { flash_id },
            Method::SampleLtr559Prox | Method::SampleLtr559Light | Method::AirSensorMeasure => {
                self.next_sample(method)
            }
            Method::SetRgb { hex, brightness } => {
                self.inner.state.lock().indicator = Some((hex, brightness));
                Response::Empty
            }
            Method::StartTest(TestType::Buttons) => {
                self.play_event_script();
                Response::Empty
            }
            Method::StartTest(_) | Method::EndTest(_) => Response::Empty,
        };
        (Status::Ok, response)
    }

    fn subscribe(&self, on_event: EventCallback) -> FactoryResult<SubscriptionHandle> {
        let id = {
            let mut state = self.inner.state.lock();
            if let Some(reason) = &state.subscribe_error {
                return Err(FactoryError::Subscription(reason.clone()));
            }
            state.next_subscriber += 1;
            state.next_subscriber
        };
        self.inner.subscribers.lock().insert(id, on_event);
        debug!(id, "MockDevice: subscriber added");

        let inner = Arc::downgrade(&self.inner);
        Ok(SubscriptionHandle::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().remove(&id);
                debug!(id, "MockDevice: subscriber cancelled");
            }
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
