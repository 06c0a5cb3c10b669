// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceStatus};

/// Periodic immutable snapshot of one device, appended by the status poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: DeviceStatus,
    pub signal_strength: Option<u8>,
    pub network_type: Option<String>,
    pub operator: Option<String>,
    pub cell_id: Option<String>,
    pub messages_received: u64,
    pub messages_sent: u64,
}

impl DeviceStats {
    pub fn snapshot(device: &Device, messages_received: u64, messages_sent: u64) -> Self {
        let details = &device.signal_details;
        let network_type = ["rat", "mode", "network_type"]
            .iter()
            .find_map(|k| details.get(*k).cloned());
        Self {
            device_id: device.id.clone(),
            timestamp: Utc::now(),
            status: device.status,
            signal_strength: device.signal_strength,
            network_type,
            operator: details.get("operator").cloned(),
            cell_id: details.get("cell_id").cloned(),
            messages_received,
            messages_sent,
        }
    }
}

/// Aggregate view of one device's messages over a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub pending: u64,
    pub average_attempts: f64,
    pub last_received: Option<DateTime<Utc>>,
}
