// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Family-specific signal metrics (RSRP, RSRQ, SINR, band, cell id, ...).
///
/// Only the owning device manager interprets the keys.
pub type SignalDetails = BTreeMap<String, String>;

/// Device/transport variant selecting the device manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceFamily {
    AtSerial,
    HttpRouter,
    RemoteShell,
    VoipRest,
    /// In-memory family for development and tests.
    Dummy,
    Other(String),
}

impl DeviceFamily {
    pub fn as_str(&self) -> &str {
        match self {
            Self::AtSerial => "at-serial",
            Self::HttpRouter => "http-router",
            Self::RemoteShell => "remote-shell",
            Self::VoipRest => "voip-rest",
            Self::Dummy => "dummy",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for DeviceFamily {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "at-serial" | "at" | "serial" => Self::AtSerial,
            "http-router" | "router" => Self::HttpRouter,
            "remote-shell" | "shell" | "adb" => Self::RemoteShell,
            "voip-rest" | "voip" => Self::VoipRest,
            "dummy" => Self::Dummy,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl From<String> for DeviceFamily {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<DeviceFamily> for String {
    fn from(value: DeviceFamily) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating state of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Uninitialized,
    Connecting,
    Online,
    Error,
    /// Terminal until the device is added again.
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    /// Devices in these states are polled for status and messages.
    pub fn is_pollable(&self) -> bool {
        matches!(self, Self::Online | Self::Error)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and operating state of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub family: DeviceFamily,
    pub phone_number: String,
    /// Port path, IP/URL or provider endpoint, depending on the family.
    pub transport_address: String,
    #[serde(default)]
    pub sim_identifier: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Family-specific options (vendor, password, credentials, ...).
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub signal_strength: Option<u8>,
    #[serde(default)]
    pub signal_details: SignalDetails,
    /// Last failure reason, cleared when the device comes back online.
    #[serde(default)]
    pub error_message: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        family: DeviceFamily,
        phone_number: impl Into<String>,
        transport_address: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            family,
            phone_number: phone_number.into(),
            transport_address: transport_address.into(),
            sim_identifier: None,
            model: None,
            config: BTreeMap::new(),
            status: DeviceStatus::Uninitialized,
            signal_strength: None,
            signal_details: SignalDetails::new(),
            error_message: None,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<String>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Look up a family-specific option.
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Compact view of a device reported to the Hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub family: DeviceFamily,
    pub phone_number: String,
    pub status: DeviceStatus,
    pub signal_strength: Option<u8>,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            family: device.family.clone(),
            phone_number: device.phone_number.clone(),
            status: device.status,
            signal_strength: device.signal_strength,
        }
    }
}
