// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-family default transport parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyDefaults {
    pub at_serial: AtSerialDefaults,
    pub http_router: HttpRouterDefaults,
    pub remote_shell: RemoteShellDefaults,
    pub voip_rest: VoipRestDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtSerialDefaults {
    pub baud: u32,
    pub timeout_ms: u64,
    /// Quiet period after the final result code before the next command.
    pub settle_ms: u64,
}

impl Default for AtSerialDefaults {
    fn default() -> Self {
        Self {
            baud: 115_200,
            timeout_ms: 5_000,
            settle_ms: 100,
        }
    }
}

impl AtSerialDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRouterDefaults {
    pub base_url: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for HttpRouterDefaults {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.1.1".to_string(),
            port: 80,
            timeout_ms: 5_000,
        }
    }
}

impl HttpRouterDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Endpoint for a device address: a full URL is used as is, a bare host
    /// gets the default scheme and port, an empty address the default URL.
    pub fn endpoint_for(&self, address: &str) -> String {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return with_port(self.base_url.trim_end_matches('/'), self.port);
        }
        if address.starts_with("http://") || address.starts_with("https://") {
            return address.to_string();
        }
        if address.contains(':') {
            return format!("http://{address}");
        }
        with_port(&format!("http://{address}"), self.port)
    }
}

fn with_port(url: &str, port: u16) -> String {
    let host_part = url.split("://").nth(1).unwrap_or(url);
    if host_part.contains(':') || port == 80 {
        url.to_string()
    } else {
        format!("{url}:{port}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteShellDefaults {
    pub adb_path: String,
    pub adb_port: u16,
    pub timeout_ms: u64,
}

impl Default for RemoteShellDefaults {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            adb_port: 5555,
            timeout_ms: 10_000,
        }
    }
}

impl RemoteShellDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Split `host[:port]`, falling back to the default adb port.
    pub fn split_address(&self, address: &str) -> (String, u16) {
        match address.trim().rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (address.trim().to_string(), self.adb_port),
            },
            None => (address.trim().to_string(), self.adb_port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoipRestDefaults {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for VoipRestDefaults {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl VoipRestDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let d = FamilyDefaults::default();
        assert_eq!(d.at_serial.baud, 115_200);
        assert_eq!(d.at_serial.timeout(), Duration::from_secs(5));
        assert_eq!(d.http_router.base_url, "http://192.168.1.1");
        assert_eq!(d.http_router.port, 80);
        assert_eq!(d.remote_shell.adb_port, 5555);
        assert_eq!(d.remote_shell.timeout(), Duration::from_secs(10));
        assert_eq!(d.voip_rest.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let d: FamilyDefaults = toml::from_str("[at_serial]\nbaud = 9600\n").unwrap();
        assert_eq!(d.at_serial.baud, 9600);
        assert_eq!(d.at_serial.timeout_ms, 5_000);
        assert_eq!(d.remote_shell.adb_path, "adb");
    }

    #[test]
    fn router_endpoint_resolution() {
        let d = HttpRouterDefaults::default();
        assert_eq!(d.endpoint_for(""), "http://192.168.1.1");
        assert_eq!(d.endpoint_for("10.0.0.1"), "http://10.0.0.1");
        assert_eq!(d.endpoint_for("10.0.0.1:8080"), "http://10.0.0.1:8080");
        assert_eq!(d.endpoint_for("https://r.local/"), "https://r.local");
        let d = HttpRouterDefaults {
            port: 8080,
            ..HttpRouterDefaults::default()
        };
        assert_eq!(d.endpoint_for("10.0.0.1"), "http://10.0.0.1:8080");
        assert_eq!(d.endpoint_for(""), "http://192.168.1.1:8080");
    }

    #[test]
    fn shell_address_split() {
        let d = RemoteShellDefaults::default();
        assert_eq!(d.split_address("10.0.0.5"), ("10.0.0.5".to_string(), 5555));
        assert_eq!(d.split_address("10.0.0.5:5556"), ("10.0.0.5".to_string(), 5556));
    }
}
