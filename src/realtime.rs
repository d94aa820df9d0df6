//! Realtime fan-out of domain events to connected dashboards.
//!
//! Delivery is best-effort and at-most-once: there is no replay buffer, a
//! subscriber that connects after an event never sees it, and a subscriber
//! that falls more than `capacity` events behind skips ahead. Publishing never
//! blocks and never fails the operation that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

pub const PREDICCION_CREATED: &str = "prediccion:created";
pub const ASISTENCIA_LOTE: &str = "asistencia:lote";
pub const ASISTENCIA_CREATED: &str = "asistencia:created";
pub const ASISTENCIA_UPDATED: &str = "asistencia:updated";
pub const CALIFICACION_CREATED: &str = "calificacion:created";
pub const CALIFICACION_UPDATED: &str = "calificacion:updated";
pub const NOTIFICATION: &str = "notification";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub name: String,
    /// When set, only that student's subscription receives the event
    pub target: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl RealtimeEvent {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            name: name.to_string(),
            target: None,
            payload,
            emitted_at: Utc::now(),
        }
    }

    pub fn targeted(name: &str, student_id: &str, payload: Value) -> Self {
        Self {
            name: name.to_string(),
            target: Some(student_id.to_string()),
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// Generic user-facing notice. `kind` is one of success/info/warning/error.
    pub fn notice(kind: &str, message: &str, student_id: Option<&str>) -> Self {
        let payload = serde_json::json!({
            "type": kind,
            "message": message,
            "userId": student_id,
        });
        match student_id {
            Some(id) => Self::targeted(NOTIFICATION, id, payload),
            None => Self::new(NOTIFICATION, payload),
        }
    }
}

/// Owned event-bus handle with an explicit start/stop lifecycle
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<RealtimeEvent>>>,
    capacity: usize,
    metrics: Arc<MetricsCollector>,
}

impl EventBus {
    pub fn new(capacity: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            sender: RwLock::new(None),
            capacity: capacity.max(1),
            metrics,
        }
    }

    pub fn start(&self) {
        let mut sender = self.sender.write().unwrap_or_else(|e| e.into_inner());
        if sender.is_none() {
            let (tx, _) = broadcast::channel(self.capacity);
            *sender = Some(tx);
            info!("📡 Realtime event bus started (capacity {})", self.capacity);
        }
    }

    /// Dropping the sender ends every open subscription stream.
    pub fn stop(&self) {
        let mut sender = self.sender.write().unwrap_or_else(|e| e.into_inner());
        if sender.take().is_some() {
            info!("🔄 Realtime event bus stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Returns how many subscribers the event was handed to.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let sender = self.sender.read().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = sender.as_ref() else {
            debug!("Event bus stopped, dropping {}", event.name);
            return 0;
        };

        self.metrics.realtime_events_total.inc();
        let name = event.name.clone();
        match tx.send(event) {
            Ok(receivers) => {
                debug!("📡 Event emitted: {} ({} receivers)", name, receivers);
                receivers
            }
            Err(_) => {
                debug!("📡 Event {} had no subscribers", name);
                0
            }
        }
    }

    /// Shared channel: untargeted events only.
    pub fn subscribe(&self) -> Option<Subscription> {
        self.open_subscription(None)
    }

    /// Untargeted events plus those addressed to `student_id`.
    pub fn subscribe_student(&self, student_id: &str) -> Option<Subscription> {
        self.open_subscription(Some(student_id.to_string()))
    }

    fn open_subscription(&self, student_id: Option<String>) -> Option<Subscription> {
        let sender = self.sender.read().unwrap_or_else(|e| e.into_inner());
        let receiver = sender.as_ref()?.subscribe();
        self.metrics.realtime_subscribers.inc();
        Some(Subscription {
            receiver,
            student_id,
            metrics: Arc::clone(&self.metrics),
        })
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<RealtimeEvent>,
    student_id: Option<String>,
    metrics: Arc<MetricsCollector>,
}

impl Subscription {
    /// Next event for this subscriber, or `None` once the bus is stopped.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("⚠️ Realtime subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &RealtimeEvent) -> bool {
        match (&event.target, &self.student_id) {
            (None, _) => true,
            (Some(target), Some(me)) => target == me,
            (Some(_), None) => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.metrics.realtime_subscribers.dec();
    }
}
