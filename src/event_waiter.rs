//! Bridge from the device's push-based event stream to "wait for this event, with a
//! timeout" semantics.
//!
//! # Architecture
//!
//! ```text
//! DeviceRpc::subscribe callback --[DeviceEvent]--> mpsc --+
//!                                                         +--> dispatcher task --> oneshot
//! EventWaiter::arm_and_wait ------[ArmRequest]---> mpsc --+
//! ```
//!
//! The dispatcher task owns the single armed condition; nothing is shared between the
//! callback context and the waiting test except channels. An arm request always
//! replaces the previous one, and pending arm requests are handled before pending
//! events, so a condition armed before the operator acts is in place before any
//! event it should match is examined.
//!
//! Non-matching events are dropped, never queued. Events that arrive while nothing is
//! armed, or after the armed waiter has given up, are treated as "don't care": they are
//! counted and dropped. Each arm carries a fresh oneshot, so nothing delivered before
//! the arm can complete it. This is a weak guarantee. It keeps an early event from
//! wedging the dispatcher, but an unexpected event is only visible through
//! [`EventWaiter::unarmed_events`] and the debug log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace};

use crate::device::{DeviceEvent, DeviceRpc, EventField, SubscriptionHandle};
use crate::error::FactoryResult;

/// Accepts events whose `field` is present and equal to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMatcher {
    pub field: EventField,
    pub value: bool,
}

impl EventMatcher {
    pub fn new(field: EventField, value: bool) -> Self {
        Self { field, value }
    }

    pub fn pressed(field: EventField) -> Self {
        Self::new(field, true)
    }

    pub fn released(field: EventField) -> Self {
        Self::new(field, false)
    }

    pub fn matches(&self, event: &DeviceEvent) -> bool {
        event.get(self.field) == Some(self.value)
    }
}

/// Result of [`EventWaiter::arm_and_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A matching event was delivered.
    Matched,
    /// Nothing matched within the bound.
    TimedOut(Duration),
    /// The event stream ended or the condition was re-armed by another waiter.
    Closed,
}

impl WaitOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, WaitOutcome::Matched)
    }

    /// Human-readable reason for a non-matched wait.
    pub fn failure_detail(&self) -> Option<String> {
        match self {
            WaitOutcome::Matched => None,
            WaitOutcome::TimedOut(bound) => Some(format!(
                "No device response detected within {}s",
                bound.as_secs_f64()
            )),
            WaitOutcome::Closed => Some("device event stream closed".to_string()),
        }
    }
}

struct ArmRequest {
    matcher: EventMatcher,
    signal: oneshot::Sender<()>,
}

/// Single-slot, match-or-drop event gate over one device subscription.
///
/// The subscription is cancelled when the waiter is cancelled or dropped.
pub struct EventWaiter {
    arm_tx: mpsc::UnboundedSender<ArmRequest>,
    subscription: SubscriptionHandle,
    dispatcher: JoinHandle<()>,
    unarmed_events: Arc<AtomicU64>,
}

impl EventWaiter {
    /// Subscribes to the device's event stream and starts the dispatcher task.
    pub fn attach(device: &dyn DeviceRpc) -> FactoryResult<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscription = device.subscribe(Box::new(move |event| {
            // Receiver gone means the waiter is shutting down.
            let _ = event_tx.send(event);
        }))?;

        let (arm_tx, arm_rx) = mpsc::unbounded_channel();
        let unarmed_events = Arc::new(AtomicU64::new(0));
        let dispatcher = tokio::spawn(dispatch(arm_rx, event_rx, unarmed_events.clone()));

        Ok(Self {
            arm_tx,
            subscription,
            dispatcher,
            unarmed_events,
        })
    }

    /// Arms `matcher` (clearing any previous signal) and waits up to `bound` for a
    /// matching event.
    pub async fn arm_and_wait(&self, matcher: EventMatcher, bound: Duration) -> WaitOutcome {
        let (signal, fired) = oneshot::channel();
        if self.arm_tx.send(ArmRequest { matcher, signal }).is_err() {
            return WaitOutcome::Closed;
        }
        trace!(field = %matcher.field, value = matcher.value, "armed");

        match timeout(bound, fired).await {
            Ok(Ok(())) => WaitOutcome::Matched,
            Ok(Err(_)) => WaitOutcome::Closed,
            Err(_) => {
                debug!(field = %matcher.field, value = matcher.value, ?bound, "wait timed out");
                WaitOutcome::TimedOut(bound)
            }
        }
    }

    /// Events delivered while no condition was armed.
    pub fn unarmed_events(&self) -> u64 {
        self.unarmed_events.load(Ordering::Relaxed)
    }

    /// Cancels the subscription and stops the dispatcher. Idempotent.
    pub fn cancel(&mut self) {
        self.subscription.cancel();
        self.dispatcher.abort();
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn dispatch(
    mut arm_rx: mpsc::UnboundedReceiver<ArmRequest>,
    mut event_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    unarmed_events: Arc<AtomicU64>,
) {
    let mut armed: Option<ArmRequest> = None;

    loop {
        tokio::select! {
            biased;
            request = arm_rx.recv() => match request {
                Some(request) => armed = Some(request),
                None => break,
            },
            event = event_rx.recv() => match event {
                Some(event) => {
                    armed = match armed.take() {
                        Some(request) if request.signal.is_closed() => {
                            note_unarmed(&unarmed_events, &event);
                            None
                        }
                        Some(request) if request.matcher.matches(&event) => {
                            let _ = request.signal.send(());
                            None
                        }
                        Some(request) => {
                            trace!(?event, "dropping non-matching event");
                            Some(request)
                        }
                        None => {
                            note_unarmed(&unarmed_events, &event);
                            None
                        }
                    };
                }
                None => break,
            },
        }
    }
    trace!("event dispatcher stopped");
}

fn note_unarmed(counter: &AtomicU64, event: &DeviceEvent) {
    counter.fetch_add(1, Ordering::Relaxed);
    debug!(?event, "event with no armed condition treated as don't-care");
}
