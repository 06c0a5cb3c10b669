// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for the gateway server.
//!
//! Config is loaded from the `[smsbridge-server]` section of `sms-bridge.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./sms-bridge.toml`
//! 3. `~/.config/sms-bridge/sms-bridge.toml`
//! 4. `/etc/sms-bridge/sms-bridge.toml`

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use smsbridge_app::ConfigFile;
use smsbridge_backend::FamilyDefaults;
use smsbridge_core::controller::DeliveryPolicy;
use smsbridge_core::{Device, DeviceFamily};

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Hub relay endpoint
    pub hub: HubConfig,
    /// Persistence
    pub storage: StorageConfig,
    /// Poll, sweep and retry tunables
    pub behavior: BehaviorConfig,
    /// Per-family default transport parameters
    pub families: FamilyDefaults,
    /// Static device list, merged with persisted devices at startup.
    #[serde(rename = "devices", default)]
    pub devices: Vec<DeviceConfig>,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

/// Hub relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Whether inbound messages are pushed to the Hub
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    /// Country label sent with capability reports
    pub country: String,
    pub timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key: String::new(),
            country: "russia".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl HubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; platform data dir when unset.
    pub path: Option<PathBuf>,
    /// Keep a read-through cache of the device list.
    pub cache: bool,
    /// Delivered messages older than this are purged; 0 keeps them forever.
    pub message_retention_days: u32,
    /// Stats snapshots older than this are purged; 0 keeps them forever.
    pub stats_retention_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache: true,
            message_retention_days: 30,
            stats_retention_hours: 168,
        }
    }
}

impl StorageConfig {
    /// Configured path, or `~/.local/share/sms-bridge/gateway.db`.
    /// Falls back to `./gateway.db` when the data dir is unavailable.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("sms-bridge").join("gateway.db"))
                .unwrap_or_else(|| PathBuf::from("gateway.db"))
        })
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        match self.message_retention_days {
            0 => None,
            days => Some(chrono::Duration::days(i64::from(days))),
        }
    }

    pub fn stats_retention(&self) -> Option<chrono::Duration> {
        match self.stats_retention_hours {
            0 => None,
            hours => Some(chrono::Duration::hours(i64::from(hours))),
        }
    }
}

/// Behavior configuration for polling, sweeps and Hub retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Device status and signal poll interval in milliseconds
    pub status_poll_interval_ms: u64,
    /// Inbound message poll interval in milliseconds
    pub message_poll_interval_ms: u64,
    /// Hub retry sweep interval in milliseconds
    pub retry_sweep_interval_ms: u64,
    /// Failed Hub pushes tolerated before a message is failed
    pub max_retry_attempts: u32,
    /// Upper bound for the retry backoff in seconds
    pub retry_cap_secs: u64,
    /// Capability report interval in milliseconds
    pub capability_report_interval_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: 5_000,
            message_poll_interval_ms: 10_000,
            retry_sweep_interval_ms: 5_000,
            max_retry_attempts: 3,
            retry_cap_secs: 300,
            capability_report_interval_ms: 60_000,
        }
    }
}

impl BehaviorConfig {
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn message_poll_interval(&self) -> Duration {
        Duration::from_millis(self.message_poll_interval_ms)
    }

    pub fn retry_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.retry_sweep_interval_ms)
    }

    pub fn capability_report_interval(&self) -> Duration {
        Duration::from_millis(self.capability_report_interval_ms)
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::new(
            self.max_retry_attempts,
            Duration::from_secs(self.retry_cap_secs),
        )
    }
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    /// at-serial, http-router, remote-shell, voip-rest or dummy
    pub family: String,
    pub phone_number: String,
    pub transport_address: String,
    /// Family-specific options (vendor, password, account_sid, ...)
    pub config: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn to_device(&self) -> Device {
        let mut device = Device::new(
            self.id.trim(),
            DeviceFamily::from(self.family.as_str()),
            self.phone_number.trim(),
            self.transport_address.trim(),
        );
        device.config = self.config.clone();
        device
    }
}

impl ServerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        let b = &self.behavior;
        if b.status_poll_interval_ms == 0 {
            return Err("[behavior].status_poll_interval_ms must be > 0".to_string());
        }
        if b.message_poll_interval_ms == 0 {
            return Err("[behavior].message_poll_interval_ms must be > 0".to_string());
        }
        if b.retry_sweep_interval_ms == 0 {
            return Err("[behavior].retry_sweep_interval_ms must be > 0".to_string());
        }
        if b.capability_report_interval_ms == 0 {
            return Err("[behavior].capability_report_interval_ms must be > 0".to_string());
        }
        if b.retry_cap_secs == 0 {
            return Err("[behavior].retry_cap_secs must be > 0".to_string());
        }

        if self.hub.enabled {
            if self.hub.base_url.trim().is_empty() {
                return Err("[hub].base_url must be set when the hub is enabled".to_string());
            }
            if self.hub.timeout_ms == 0 {
                return Err("[hub].timeout_ms must be > 0".to_string());
            }
        }

        let f = &self.families;
        if f.at_serial.baud == 0 {
            return Err("[families.at_serial].baud must be > 0".to_string());
        }
        for (name, timeout_ms) in [
            ("at_serial", f.at_serial.timeout_ms),
            ("http_router", f.http_router.timeout_ms),
            ("remote_shell", f.remote_shell.timeout_ms),
            ("voip_rest", f.voip_rest.timeout_ms),
        ] {
            if timeout_ms == 0 {
                return Err(format!("[families.{name}].timeout_ms must be > 0"));
            }
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            let id = device.id.trim();
            if id.is_empty() {
                return Err("[[devices]].id must not be empty".to_string());
            }
            if !seen.insert(id) {
                return Err(format!("[[devices]] duplicate id \"{id}\""));
            }
            if let DeviceFamily::Other(name) = DeviceFamily::from(device.family.as_str()) {
                return Err(format!(
                    "[[devices]] unknown family \"{name}\" (device id: \"{id}\")"
                ));
            }
            if device.phone_number.trim().is_empty() {
                return Err(format!(
                    "[[devices]].phone_number must be set (device id: \"{id}\")"
                ));
            }
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the `[smsbridge-server]`
    /// section header, suitable for use in a combined `sms-bridge.toml` file.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "smsbridge-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            hub: HubConfig {
                enabled: true,
                base_url: "https://hub.example.com/api".to_string(),
                api_key: "changeme".to_string(),
                ..HubConfig::default()
            },
            storage: StorageConfig {
                path: Some(PathBuf::from("/var/lib/sms-bridge/gateway.db")),
                ..StorageConfig::default()
            },
            behavior: BehaviorConfig::default(),
            families: FamilyDefaults::default(),
            devices: vec![
                DeviceConfig {
                    id: "modem1".to_string(),
                    family: "at-serial".to_string(),
                    phone_number: "+48500100200".to_string(),
                    transport_address: "/dev/ttyUSB2".to_string(),
                    config: BTreeMap::from([("vendor".to_string(), "huawei".to_string())]),
                },
                DeviceConfig {
                    id: "router1".to_string(),
                    family: "http-router".to_string(),
                    phone_number: "+48500100201".to_string(),
                    transport_address: "192.168.0.1".to_string(),
                    config: BTreeMap::from([("password".to_string(), "admin".to_string())]),
                },
            ],
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "smsbridge-server"
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}
