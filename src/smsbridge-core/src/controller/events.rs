// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Gateway event notification.
//!
//! Listeners are invoked inline from the registry and the pipeline, so they
//! must return quickly and never wait on I/O.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::{Device, DeviceStatus};
use crate::message::Message;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Owned form of every event, for listeners that forward to a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    DeviceAdded {
        device_id: String,
        family: String,
    },
    DeviceRemoved {
        device_id: String,
    },
    StateChanged {
        device_id: String,
        old: DeviceStatus,
        new: DeviceStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    SignalUpdated {
        device_id: String,
        signal_strength: Option<u8>,
    },
    MessageReceived {
        message_id: u64,
        device_id: String,
        from_number: String,
    },
    MessageDelivered {
        message_id: u64,
        attempts: u32,
    },
    MessageFailed {
        message_id: u64,
        attempts: u32,
        error: Option<String>,
    },
}

/// Components that want to receive gateway events.
///
/// All methods default to no-ops so listeners override only what they need.
pub trait GatewayListener: Send + Sync {
    fn on_device_added(&self, _device: &Device) {}

    fn on_device_removed(&self, _device_id: &str) {}

    fn on_state_change(
        &self,
        _device_id: &str,
        _old: DeviceStatus,
        _new: DeviceStatus,
        _reason: Option<&str>,
    ) {
    }

    fn on_signal_update(&self, _device_id: &str, _signal_strength: Option<u8>) {}

    fn on_message_received(&self, _message: &Message) {}

    fn on_message_delivered(&self, _message: &Message) {}

    fn on_message_failed(&self, _message: &Message) {}
}

/// Shared listener registry. Cheap to clone behind an `Arc`.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn GatewayListener>)>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn GatewayListener>) -> ListenerId {
        let id = ListenerId::new();
        self.write().push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) {
        self.write().retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn notify_device_added(&self, device: &Device) {
        for listener in self.snapshot() {
            listener.on_device_added(device);
        }
    }

    pub fn notify_device_removed(&self, device_id: &str) {
        for listener in self.snapshot() {
            listener.on_device_removed(device_id);
        }
    }

    pub fn notify_state_change(
        &self,
        device_id: &str,
        old: DeviceStatus,
        new: DeviceStatus,
        reason: Option<&str>,
    ) {
        for listener in self.snapshot() {
            listener.on_state_change(device_id, old, new, reason);
        }
    }

    pub fn notify_signal_update(&self, device_id: &str, signal_strength: Option<u8>) {
        for listener in self.snapshot() {
            listener.on_signal_update(device_id, signal_strength);
        }
    }

    pub fn notify_message_received(&self, message: &Message) {
        for listener in self.snapshot() {
            listener.on_message_received(message);
        }
    }

    pub fn notify_message_delivered(&self, message: &Message) {
        for listener in self.snapshot() {
            listener.on_message_delivered(message);
        }
    }

    pub fn notify_message_failed(&self, message: &Message) {
        for listener in self.snapshot() {
            listener.on_message_failed(message);
        }
    }

    // Listeners run outside the lock so one may (un)register another.
    fn snapshot(&self) -> Vec<Arc<dyn GatewayListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    fn write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, Vec<(ListenerId, Arc<dyn GatewayListener>)>> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}
