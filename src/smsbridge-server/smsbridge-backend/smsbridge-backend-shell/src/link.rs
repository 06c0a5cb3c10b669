// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Remote shell channel to an Android phone over ADB.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use smsbridge_core::{BoxFuture, GatewayError, GatewayResult};

/// One shell channel. Each `run` is one remote shell invocation.
pub trait ShellLink: Send {
    fn connect<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<()>>;

    fn is_connected(&self) -> bool;

    /// Run `command` remotely and return its stdout.
    fn run<'a>(&'a mut self, command: &'a str, timeout: Duration) -> BoxFuture<'a, GatewayResult<String>>;

    fn disconnect(&mut self);
}

#[derive(Debug, Clone)]
pub struct AdbSettings {
    pub adb_path: String,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl AdbSettings {
    /// ADB serial of the target (`host:port` for network devices).
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Quote `arg` for the remote `sh`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Messages from adb meaning the channel is gone and must be re-established.
pub fn is_reset_message(text: &str) -> bool {
    let text = text.to_ascii_lowercase();
    ["device offline", "not found", "closed", "no devices", "unauthorized", "connection reset"]
        .iter()
        .any(|m| text.contains(m))
}

/// `adb` client bound to one device serial.
pub struct AdbLink {
    settings: AdbSettings,
    serial: String,
    /// USB serials need no `adb connect`.
    network: bool,
    connected: bool,
}

impl AdbLink {
    pub fn new(settings: AdbSettings, serial: Option<String>) -> Self {
        let (serial, network) = match serial {
            Some(s) => (s, false),
            None => (settings.target(), true),
        };
        Self {
            settings,
            serial,
            network,
            connected: false,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn adb(&self, args: &[&str], limit: Duration) -> GatewayResult<(bool, String, String)> {
        let child = Command::new(&self.settings.adb_path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = match timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GatewayError::connection(format!(
                    "{}: {e}",
                    self.settings.adb_path
                )))
            }
            Err(_) => {
                return Err(GatewayError::timeout(format!(
                    "adb {} exceeded {limit:?}",
                    args.first().copied().unwrap_or_default()
                )))
            }
        };
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    async fn do_connect(&mut self) -> GatewayResult<()> {
        if !self.network {
            self.connected = true;
            return Ok(());
        }
        let target = self.serial.clone();
        let (_, stdout, stderr) = self.adb(&["connect", target.as_str()], self.settings.timeout).await?;
        if stdout.contains("connected to") {
            debug!("adb connected to {}", target);
            self.connected = true;
            Ok(())
        } else {
            Err(GatewayError::connection(format!(
                "adb connect {target}: {}",
                first_line(&stdout, &stderr)
            )))
        }
    }

    async fn do_run(&mut self, command: &str, limit: Duration) -> GatewayResult<String> {
        let serial = self.serial.clone();
        let result = self.adb(&["-s", serial.as_str(), "shell", command], limit).await;
        let (ok, stdout, stderr) = match result {
            Ok(r) => r,
            Err(e) => {
                self.connected = false;
                return Err(e);
            }
        };
        if is_reset_message(&stderr) || (!ok && is_reset_message(&stdout)) {
            warn!("adb channel to {} reset: {}", serial, first_line(&stdout, &stderr));
            self.connected = false;
            return Err(GatewayError::connection(first_line(&stdout, &stderr)));
        }
        if !ok {
            return Err(GatewayError::protocol(format!(
                "shell command failed: {}",
                first_line(&stdout, &stderr)
            )));
        }
        Ok(stdout)
    }
}

fn first_line(stdout: &str, stderr: &str) -> String {
    stderr
        .lines()
        .chain(stdout.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}

impl ShellLink for AdbLink {
    fn connect<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move { self.do_connect().await })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn run<'a>(&'a mut self, command: &'a str, timeout: Duration) -> BoxFuture<'a, GatewayResult<String>> {
        Box::pin(async move { self.do_run(command, timeout).await })
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}
