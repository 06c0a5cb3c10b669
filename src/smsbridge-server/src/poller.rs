// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Periodic status and signal polling with stats snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use smsbridge_core::controller::PollingPolicy;
use smsbridge_core::{DeviceStats, GatewayError, GatewayResult};

use crate::pipeline::MessageCounters;
use crate::registry::Registry;
use crate::store::Store;

pub struct StatusPoller {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    counters: Arc<MessageCounters>,
    policy: Arc<dyn PollingPolicy>,
}

impl StatusPoller {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn Store>,
        counters: Arc<MessageCounters>,
        policy: Arc<dyn PollingPolicy>,
    ) -> Self {
        Self {
            registry,
            store,
            counters,
            policy,
        }
    }

    pub fn policy(&self) -> &Arc<dyn PollingPolicy> {
        &self.policy
    }

    /// Poll every eligible device concurrently and record a stats row for
    /// each, whether the poll succeeded or not. Returns how many were polled.
    pub async fn poll_all(&self) -> usize {
        let mut tasks = JoinSet::new();
        for device in self.registry.devices() {
            if !self.policy.should_poll(device.status) {
                continue;
            }
            let registry = Arc::clone(&self.registry);
            tasks.spawn(async move {
                let result = registry.poll(&device.id).await;
                (device.id, result)
            });
        }

        let mut polled = 0;
        let mut snapshots = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let id = match joined {
                Ok((id, Ok(_))) => id,
                Ok((id, Err(e))) => {
                    debug!("[{}] poll failed: {}", id, e);
                    id
                }
                Err(e) => {
                    warn!("poll task failed: {}", e);
                    continue;
                }
            };
            polled += 1;
            // Removed mid-poll.
            let Some(device) = self.registry.get(&id) else {
                continue;
            };
            let (rx, tx) = self.counters.get(&id);
            snapshots.push(DeviceStats::snapshot(&device, rx, tx));
        }

        // Each append rewrites the database file.
        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || {
            for stats in &snapshots {
                if let Err(e) = store.append_stats(stats) {
                    warn!("[{}] failed to store stats: {}", stats.device_id, e);
                }
            }
        })
        .await;
        if let Err(e) = written {
            warn!("stats write task failed: {}", e);
        }
        polled
    }

    /// Drop stats snapshots older than `retention`. Returns how many went.
    pub async fn prune_stats(
        &self,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> GatewayResult<usize> {
        let store = Arc::clone(&self.store);
        let removed = tokio::task::spawn_blocking(move || store.delete_stats_before(now - retention))
            .await
            .map_err(|e| GatewayError::storage(format!("stats prune task failed: {e}")))??;
        if removed > 0 {
            info!("removed {} stats snapshot(s) past retention", removed);
        }
        Ok(removed)
    }
}
