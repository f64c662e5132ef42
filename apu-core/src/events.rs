//! Daemon events pushed to every connected client

use crate::constants::EVENT_BUS_CAPACITY;
use apu_protocol::{events, ActivatedBy, HardwareInfo, ProfileAppliedEvent};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    ProfileApplied {
        name: String,
        activated_by: ActivatedBy,
        hw_info: Option<HardwareInfo>,
    },
    ProfilesChanged,
}

impl DaemonEvent {
    /// Notification method name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            DaemonEvent::ProfileApplied { .. } => events::PROFILE_APPLIED,
            DaemonEvent::ProfilesChanged => events::PROFILES_CHANGED,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            DaemonEvent::ProfileApplied { name, activated_by, hw_info } => {
                serde_json::to_value(ProfileAppliedEvent {
                    name: name.clone(),
                    activated_by: *activated_by,
                    hw_info: hw_info.clone(),
                })
                .unwrap_or(Value::Null)
            }
            DaemonEvent::ProfilesChanged => json!({}),
        }
    }
}

/// Fan-out of daemon events; cloning shares the same channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DaemonEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: DaemonEvent) {
        let method = event.method();
        match self.tx.send(event) {
            Ok(n) => trace!("{} delivered to {} subscriber(s)", method, n),
            Err(_) => trace!("{} dropped, no subscribers", method),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.tx.subscribe()
    }
}
