//! Preemption events and subscriber streams.
//!
//! Every override, displacement and release is published to subscribers. Each
//! subscriber gets its own bounded queue; publishing never blocks the control
//! loop, and events that do not fit are counted as dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::network::JunctionId;
use crate::priority::Priority;
use crate::signal::SignalState;
use crate::vehicle::VehicleId;

/// Why an override ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The holder left the simulation.
    Departed,
    /// The holder moved beyond the detection radius.
    ClearedZone,
    /// The junction disappeared from the simulation.
    JunctionGone,
    /// Signals were restored earlier; only bookkeeping was outstanding.
    CleanupRetry,
    /// The controller is shutting down.
    Shutdown,
}

/// Event payload.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A free junction was overridden.
    Preempted {
        junction: JunctionId,
        vehicle: VehicleId,
        priority: Priority,
        approach: usize,
        state: SignalState,
    },

    /// A more urgent vehicle took over an overridden junction.
    Displaced {
        junction: JunctionId,
        vehicle: VehicleId,
        priority: Priority,
        approach: usize,
        state: SignalState,
        previous_vehicle: VehicleId,
        previous_priority: Priority,
    },

    /// The junction returned to its captured program.
    Released {
        junction: JunctionId,
        vehicle: VehicleId,
        reason: ReleaseReason,
        program: String,
        phase: usize,
        remaining: f64,
    },
}

impl EventPayload {
    /// Junction the event is about.
    #[must_use]
    pub fn junction(&self) -> &JunctionId {
        match self {
            Self::Preempted { junction, .. } | Self::Displaced { junction, .. } | Self::Released { junction, .. } => {
                junction
            }
        }
    }
}

/// A published preemption event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreemptionEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sim_time: f64,
    pub payload: EventPayload,
}

impl PreemptionEvent {
    /// Stamps a payload with a fresh id and the current wall-clock time.
    #[must_use]
    pub fn new(sim_time: f64, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sim_time,
            payload,
        }
    }
}

/// Errors receiving from an event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    /// No event arrived in time.
    #[error("no event within {duration_ms}ms")]
    Timeout {
        /// Wait time in milliseconds.
        duration_ms: u64,
    },

    /// The bus was dropped.
    #[error("event bus disconnected")]
    Disconnected,
}

/// Fan-out of preemption events to subscribers.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<PreemptionEvent>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a bus whose subscriber queues hold `capacity` events each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a subscriber.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = bounded::<PreemptionEvent>(self.capacity);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        EventStream { rx }
    }

    /// Non-blocking fan-out. Subscribers whose stream was dropped are forgotten.
    pub fn publish(&self, event: PreemptionEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let Ok(mut subs) = self.subscribers.lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Events published so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Deliveries lost to full subscriber queues.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |subs| subs.len())
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<PreemptionEvent>,
}

impl EventStream {
    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PreemptionEvent, EventStreamError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => EventStreamError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => EventStreamError::Disconnected,
        })
    }

    /// Next queued event, if any.
    pub fn try_recv(&self) -> Result<Option<PreemptionEvent>, EventStreamError> {
        match self.rx.try_recv() {
            Ok(ev) => Ok(Some(ev)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EventStreamError::Disconnected),
        }
    }

    /// All queued events.
    #[must_use]
    pub fn drain(&self) -> Vec<PreemptionEvent> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released(junction: &str) -> PreemptionEvent {
        PreemptionEvent::new(
            12.0,
            EventPayload::Released {
                junction: JunctionId::from(junction),
                vehicle: VehicleId::from("amb"),
                reason: ReleaseReason::ClearedZone,
                program: "0".to_string(),
                phase: 2,
                remaining: 7.0,
            },
        )
    }

    #[test]
    fn every_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(released("J1"));

        assert_eq!(a.drain().len(), 1);
        let ev = b.try_recv().unwrap().unwrap();
        assert_eq!(ev.payload.junction().as_str(), "J1");
        assert_eq!(bus.published(), 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let stream = bus.subscribe();
        bus.publish(released("J1"));
        bus.publish(released("J2"));
        assert_eq!(bus.dropped(), 1);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn dropped_streams_are_unsubscribed() {
        let bus = EventBus::new(4);
        let stream = bus.subscribe();
        drop(stream);
        bus.publish(released("J1"));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.dropped(), 0);
    }

    #[test]
    fn recv_timeout_reports_timeout() {
        let bus = EventBus::new(4);
        let stream = bus.subscribe();
        let err = stream.recv_timeout(Duration::from_millis(5)).unwrap_err();
        assert_eq!(err, EventStreamError::Timeout { duration_ms: 5 });
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(released("J1").payload).unwrap();
        assert_eq!(json["type"], "released");
        assert_eq!(json["reason"], "cleared_zone");
    }
}
