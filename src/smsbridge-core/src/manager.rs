// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{DeviceFamily, DeviceStatus, SignalDetails};
use crate::error::{GatewayError, GatewayResult};
use crate::message::InboundMessage;

/// Alias to reduce type complexity in DeviceManager.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What `initialize` learned about the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub sim_identifier: Option<String>,
    pub model: Option<String>,
}

/// Family-specific operations outside the common contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum AuxCommand {
    /// Named network mode, e.g. `4g_only` or `auto`.
    SetNetworkMode(String),
    /// Named band configuration, e.g. `all` or `eu`.
    SetBands(String),
    Unlock(String),
    UsbMode(String),
    CarrierAggregation(bool),
    Volte(bool),
    Temperature,
    CellInfo,
    FirmwareVersion,
}

impl AuxCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetNetworkMode(_) => "set_network_mode",
            Self::SetBands(_) => "set_bands",
            Self::Unlock(_) => "unlock",
            Self::UsbMode(_) => "usb_mode",
            Self::CarrierAggregation(_) => "carrier_aggregation",
            Self::Volte(_) => "volte",
            Self::Temperature => "temperature",
            Self::CellInfo => "cell_info",
            Self::FirmwareVersion => "firmware_version",
        }
    }
}

impl fmt::Display for AuxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of an auxiliary operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxOutput {
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub raw: Option<String>,
}

impl AuxOutput {
    pub fn raw(raw: impl Into<String>) -> Self {
        Self {
            values: BTreeMap::new(),
            raw: Some(raw.into()),
        }
    }

    pub fn with_value(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

/// Capability contract every device family implements.
///
/// One manager instance is bound to one device and owns its transport. The
/// registry never runs two calls on the same manager concurrently.
pub trait DeviceManager: Send {
    fn family(&self) -> DeviceFamily;

    /// Upper bound for one exchange on the transport.
    fn transport_timeout(&self) -> Duration;

    /// Open the transport and bring the endpoint into a usable state.
    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>>;

    /// Liveness check. `Ok` carries the status the endpoint reports.
    fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>>;

    /// Messages currently stored at the origin.
    ///
    /// Nothing is deleted here; the pipeline calls `acknowledge_message` once
    /// a message is persisted.
    fn list_new_messages<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Vec<InboundMessage>>>;

    /// Delete a persisted message at the origin.
    fn acknowledge_message<'a>(&'a mut self, origin_ref: &'a str)
        -> BoxFuture<'a, GatewayResult<()>>;

    /// Succeeds only on explicit confirmation from the origin.
    fn send_message<'a>(&'a mut self, to: &'a str, text: &'a str)
        -> BoxFuture<'a, GatewayResult<()>>;

    /// Signal as a percentage, `None` when the family has no such concept.
    fn get_signal<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Option<u8>>>;

    /// Details captured by the most recent `get_signal`.
    fn signal_details(&self) -> SignalDetails {
        SignalDetails::new()
    }

    /// Release the transport. Must not fail.
    fn cleanup<'a>(&'a mut self) -> BoxFuture<'a, ()>;

    fn auxiliary<'a>(&'a mut self, command: AuxCommand) -> BoxFuture<'a, GatewayResult<AuxOutput>> {
        Box::pin(std::future::ready(Err(GatewayError::not_supported(
            command.name(),
        ))))
    }
}
