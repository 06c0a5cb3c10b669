// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Listeners handing gateway events to the notification layer.

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use smsbridge_core::controller::{GatewayEvent, GatewayListener};
use smsbridge_core::{Device, DeviceStatus, Message};

/// Republishes every event on a broadcast channel.
///
/// Sending never waits: slow subscribers lag and drop old events, and an
/// event with no subscriber is discarded.
pub struct BroadcastListener {
    tx: broadcast::Sender<GatewayEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }
}

impl GatewayListener for BroadcastListener {
    fn on_device_added(&self, device: &Device) {
        self.publish(GatewayEvent::DeviceAdded {
            device_id: device.id.clone(),
            family: device.family.to_string(),
        });
    }

    fn on_device_removed(&self, device_id: &str) {
        self.publish(GatewayEvent::DeviceRemoved {
            device_id: device_id.to_string(),
        });
    }

    fn on_state_change(
        &self,
        device_id: &str,
        old: DeviceStatus,
        new: DeviceStatus,
        reason: Option<&str>,
    ) {
        self.publish(GatewayEvent::StateChanged {
            device_id: device_id.to_string(),
            old,
            new,
            reason: reason.map(str::to_string),
            at: Utc::now(),
        });
    }

    fn on_signal_update(&self, device_id: &str, signal_strength: Option<u8>) {
        self.publish(GatewayEvent::SignalUpdated {
            device_id: device_id.to_string(),
            signal_strength,
        });
    }

    fn on_message_received(&self, message: &Message) {
        self.publish(GatewayEvent::MessageReceived {
            message_id: message.id,
            device_id: message.device_id.clone(),
            from_number: message.from_number.clone(),
        });
    }

    fn on_message_delivered(&self, message: &Message) {
        self.publish(GatewayEvent::MessageDelivered {
            message_id: message.id,
            attempts: message.delivery_attempts,
        });
    }

    fn on_message_failed(&self, message: &Message) {
        self.publish(GatewayEvent::MessageFailed {
            message_id: message.id,
            attempts: message.delivery_attempts,
            error: message.error_message.clone(),
        });
    }
}

/// Writes state changes and message outcomes to the log.
pub struct LogListener;

impl GatewayListener for LogListener {
    fn on_device_added(&self, device: &Device) {
        info!("[{}] added ({})", device.id, device.family);
    }

    fn on_device_removed(&self, device_id: &str) {
        info!("[{}] removed", device_id);
    }

    fn on_state_change(
        &self,
        device_id: &str,
        old: DeviceStatus,
        new: DeviceStatus,
        reason: Option<&str>,
    ) {
        match (new, reason) {
            (DeviceStatus::Error, Some(reason)) => {
                warn!("[{}] {} -> {}: {}", device_id, old, new, reason)
            }
            _ => info!("[{}] {} -> {}", device_id, old, new),
        }
    }

    fn on_message_received(&self, message: &Message) {
        info!(
            "[{}] message {} from {}",
            message.device_id, message.id, message.from_number
        );
    }

    fn on_message_delivered(&self, message: &Message) {
        debug!("message {} delivered to hub", message.id);
    }

    fn on_message_failed(&self, message: &Message) {
        warn!(
            "message {} failed after {} attempts: {}",
            message.id,
            message.delivery_attempts,
            message.error_message.as_deref().unwrap_or("unknown error")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use smsbridge_core::controller::EventEmitter;
    use smsbridge_core::DeviceFamily;

    #[test]
    fn events_reach_subscribers() {
        let listener = Arc::new(BroadcastListener::new(8));
        let mut rx = listener.subscribe();
        let emitter = EventEmitter::new();
        emitter.register(listener.clone());
        emitter.register(Arc::new(LogListener));

        let device = Device::new("d1", DeviceFamily::Dummy, "+1", "mem");
        emitter.notify_device_added(&device);
        emitter.notify_state_change("d1", DeviceStatus::Connecting, DeviceStatus::Error, Some("boom"));

        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayEvent::DeviceAdded {
                device_id: "d1".into(),
                family: "dummy".into()
            }
        );
        match rx.try_recv().unwrap() {
            GatewayEvent::StateChanged { new, reason, .. } => {
                assert_eq!(new, DeviceStatus::Error);
                assert_eq!(reason.as_deref(), Some("boom"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_does_not_block() {
        let listener = BroadcastListener::new(1);
        for _ in 0..4 {
            listener.on_device_removed("d1");
        }
        let mut rx = listener.subscribe();
        listener.on_signal_update("d1", Some(50));
        listener.on_signal_update("d1", Some(60));
        // Capacity 1: the older event was overwritten.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(1))
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayEvent::SignalUpdated {
                device_id: "d1".into(),
                signal_strength: Some(60)
            }
        );
    }
}
