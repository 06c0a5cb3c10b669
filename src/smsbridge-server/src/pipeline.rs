// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Inbound message pipeline.
//!
//! Messages are listed from a device without being removed, deduplicated by
//! fingerprint, persisted, and only then acknowledged on the device. The Hub
//! push happens last; its failures are retried by [`MessagePipeline::retry_due`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use smsbridge_core::controller::{DeliveryOutcome, DeliveryPolicy, EventEmitter};
use smsbridge_core::{DeviceStatus, GatewayResult, Message, MessageSummary};

use crate::hub::HubRelay;
use crate::registry::Registry;
use crate::store::Store;

/// Per-device received/sent counters since start.
#[derive(Debug, Default)]
pub struct MessageCounters {
    counts: Mutex<HashMap<String, (u64, u64)>>,
}

impl MessageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, u64)>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_received(&self, device_id: &str) {
        self.lock().entry(device_id.to_string()).or_default().0 += 1;
    }

    pub fn record_sent(&self, device_id: &str) {
        self.lock().entry(device_id.to_string()).or_default().1 += 1;
    }

    /// `(received, sent)` for a device.
    pub fn get(&self, device_id: &str) -> (u64, u64) {
        self.lock().get(device_id).copied().unwrap_or_default()
    }
}

pub struct MessagePipeline {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    hub: Option<Arc<dyn HubRelay>>,
    policy: DeliveryPolicy,
    emitter: Arc<EventEmitter>,
    counters: Arc<MessageCounters>,
}

impl MessagePipeline {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn Store>,
        hub: Option<Arc<dyn HubRelay>>,
        policy: DeliveryPolicy,
        emitter: Arc<EventEmitter>,
        counters: Arc<MessageCounters>,
    ) -> Self {
        Self {
            registry,
            store,
            hub,
            policy,
            emitter,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<MessageCounters> {
        &self.counters
    }

    /// Pull new messages from one device. Returns how many were new.
    pub async fn ingest_device(&self, device_id: &str) -> GatewayResult<usize> {
        let inbound = self.registry.list_messages(device_id).await?;
        let mut fresh = 0;
        for item in inbound {
            let now = Utc::now();
            let mut message = Message::from_inbound(device_id, &item, now);
            let fingerprint = message.fingerprint();
            let known = self.store.find_by_fingerprint(&fingerprint)?;
            if known.is_none() {
                // The retry sweep takes over if the first push never lands.
                self.policy.on_queued(&mut message, now);
                self.store.save_message(&mut message)?;
                self.counters.record_received(device_id);
                self.emitter.notify_message_received(&message);
                fresh += 1;
            } else {
                debug!(
                    "[{}] message {} already stored, skipping",
                    device_id, item.origin_ref
                );
            }

            // Persisted above, so a failed acknowledge only means we see it again.
            if let Err(e) = self.registry.acknowledge(device_id, &item.origin_ref).await {
                warn!(
                    "[{}] failed to acknowledge message {}: {}",
                    device_id, item.origin_ref, e
                );
            }

            if known.is_none() {
                self.deliver(&mut message, Utc::now()).await;
            }
        }
        if fresh > 0 {
            info!("[{}] ingested {} new message(s)", device_id, fresh);
        }
        Ok(fresh)
    }

    /// Ingest from every online device concurrently.
    pub async fn ingest_all(self: &Arc<Self>) -> usize {
        let mut tasks = JoinSet::new();
        for device in self.registry.devices() {
            if device.status != DeviceStatus::Online {
                continue;
            }
            let pipeline = Arc::clone(self);
            tasks.spawn(async move {
                let result = pipeline.ingest_device(&device.id).await;
                (device.id, result)
            });
        }

        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(n))) => total += n,
                Ok((id, Err(e))) => warn!("[{}] message ingestion failed: {}", id, e),
                Err(e) => warn!("ingestion task failed: {}", e),
            }
        }
        total
    }

    /// Push one message to the Hub and record the outcome.
    ///
    /// Returns `None` when no Hub is configured; the message stays pending.
    pub async fn deliver(&self, message: &mut Message, now: DateTime<Utc>) -> Option<DeliveryOutcome> {
        let hub = self.hub.as_ref()?;
        let outcome = match hub.push_message(message).await {
            Ok(()) => self.policy.on_success(message, now),
            Err(e) => self.policy.on_failure(message, &e.to_string(), now),
        };
        if let Err(e) = self.store.update_message_delivery(message) {
            warn!("message {}: failed to store delivery state: {}", message.id, e);
        }
        match outcome {
            DeliveryOutcome::Delivered => self.emitter.notify_message_delivered(message),
            DeliveryOutcome::Failed => self.emitter.notify_message_failed(message),
            DeliveryOutcome::RetryAt(at) => debug!(
                "message {} push failed (attempt {}), retry at {}",
                message.id, message.delivery_attempts, at
            ),
        }
        Some(outcome)
    }

    /// Retry every pending message whose backoff has elapsed.
    pub async fn retry_due(&self, now: DateTime<Utc>) -> GatewayResult<usize> {
        if self.hub.is_none() {
            return Ok(0);
        }
        let due = self.store.query_pending_retries(now)?;
        let count = due.len();
        for mut message in due {
            self.deliver(&mut message, now).await;
        }
        if count > 0 {
            debug!("retried {} message(s)", count);
        }
        Ok(count)
    }

    /// Drop delivered messages received more than `retention` before `now`.
    pub fn sweep_retention(&self, now: DateTime<Utc>, retention: chrono::Duration) -> GatewayResult<usize> {
        let removed = self.store.delete_delivered_before(now - retention)?;
        if removed > 0 {
            info!("removed {} delivered message(s) past retention", removed);
        }
        Ok(removed)
    }

    /// Send an outbound message through a device.
    pub async fn send(&self, device_id: &str, to: &str, text: &str) -> GatewayResult<()> {
        self.registry.send(device_id, to, text).await?;
        self.counters.record_sent(device_id);
        Ok(())
    }

    pub fn message_summary(&self, device_id: &str, window: chrono::Duration) -> GatewayResult<MessageSummary> {
        self.store.message_summary(device_id, window)
    }
}
