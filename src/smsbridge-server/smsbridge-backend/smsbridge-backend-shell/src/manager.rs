// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use smsbridge_core::signal;
use smsbridge_core::{
    AuxCommand, AuxOutput, BoxFuture, Device, DeviceFamily, DeviceManager, DeviceStatus,
    GatewayError, GatewayResult, InboundMessage, InitReport, SignalDetails,
};

use crate::link::ShellLink;
use crate::parse;

const SLOW_EXCHANGE: Duration = Duration::from_secs(2);
const DEFAULT_ISMS_CODE: u32 = 5;

/// Device manager for Android phones driven through a remote shell.
pub struct ShellPhone<L> {
    device_id: String,
    phone_number: String,
    link: L,
    timeout: Duration,
    isms_code: u32,
    subscription: i32,
    details: SignalDetails,
}

impl<L: ShellLink> ShellPhone<L> {
    pub fn new(device: &Device, link: L, timeout: Duration) -> Self {
        Self {
            device_id: device.id.clone(),
            phone_number: device.phone_number.clone(),
            link,
            timeout,
            isms_code: device
                .config_value("isms_code")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ISMS_CODE),
            subscription: device
                .config_value("subscription")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            details: SignalDetails::new(),
        }
    }

    /// Run one shell command; a reset channel is reconnected and the command retried once.
    async fn exec(&mut self, command: &str) -> GatewayResult<String> {
        if !self.link.is_connected() {
            self.link.connect().await?;
        }
        let start = Instant::now();
        let result = match self.link.run(command, self.timeout).await {
            Err(GatewayError::Connection(reason)) => {
                warn!("[{}] shell reset ({}), reconnecting", self.device_id, reason);
                self.link.disconnect();
                self.link.connect().await?;
                self.link.run(command, self.timeout).await
            }
            other => other,
        };
        let elapsed = start.elapsed();
        if elapsed > SLOW_EXCHANGE {
            warn!("[{}] `{}` took {:?}", self.device_id, command, elapsed);
        } else {
            debug!("[{}] `{}` took {:?}", self.device_id, command, elapsed);
        }
        result
    }

    async fn getprop(&mut self, command: &str) -> Option<String> {
        match self.exec(command).await {
            Ok(out) => Some(out.trim().to_string()).filter(|v| !v.is_empty()),
            Err(e) => {
                debug!("[{}] `{}` failed: {}", self.device_id, command, e);
                None
            }
        }
    }

    async fn initialize_phone(&mut self) -> GatewayResult<InitReport> {
        self.link.disconnect();
        self.link.connect().await?;
        let booted = self.exec(parse::BOOT_COMPLETED).await?;
        if booted.trim() != "1" {
            return Err(GatewayError::Init("phone has not finished booting".into()));
        }
        let model = self.getprop(parse::MODEL).await;
        let sim_identifier = match self.exec(parse::SIM_INFO).await {
            Ok(out) => parse::row_field(&out, "icc_id"),
            Err(e) => {
                warn!("[{}] SIM info unavailable: {}", self.device_id, e);
                None
            }
        };
        info!("[{}] phone ready (model {:?})", self.device_id, model);
        Ok(InitReport {
            sim_identifier,
            model,
        })
    }

    async fn check_status(&mut self) -> GatewayResult<DeviceStatus> {
        let out = self.exec(parse::BOOT_COMPLETED).await?;
        if out.trim() == "1" {
            Ok(DeviceStatus::Online)
        } else {
            Err(GatewayError::protocol(format!(
                "unexpected boot state {:?}",
                out.trim()
            )))
        }
    }

    async fn read_messages(&mut self) -> GatewayResult<Vec<InboundMessage>> {
        let out = self.exec(parse::LIST_INBOX).await?;
        let rows = parse::parse_sms_rows(&out);
        debug!("[{}] {} inbox row(s)", self.device_id, rows.len());
        Ok(rows
            .into_iter()
            .map(|r| InboundMessage {
                origin_ref: r.id.to_string(),
                from_number: r.address,
                to_number: self.phone_number.clone(),
                text: r.body,
                received_at: r.date,
            })
            .collect())
    }

    async fn delete_message(&mut self, origin_ref: &str) -> GatewayResult<()> {
        let id: u64 = origin_ref
            .parse()
            .map_err(|_| GatewayError::protocol(format!("invalid row id {origin_ref}")))?;
        let out = self.exec(&parse::delete_sms(id)).await?;
        if out.to_ascii_lowercase().contains("error") {
            return Err(GatewayError::protocol(format!(
                "delete of {id}: {}",
                out.trim()
            )));
        }
        Ok(())
    }

    async fn submit_message(&mut self, to: &str, text: &str) -> GatewayResult<()> {
        let command = parse::send_sms(self.isms_code, self.subscription, to, text);
        let reply = self.exec(&command).await.map_err(|e| match e {
            GatewayError::Protocol(m) => GatewayError::Send(m),
            other => other,
        })?;
        if parse::isms_succeeded(&reply) {
            info!("[{}] sent to {}", self.device_id, to);
            Ok(())
        } else {
            Err(GatewayError::send(format!(
                "isms rejected send to {to}: {}",
                reply.trim()
            )))
        }
    }

    async fn read_signal(&mut self) -> GatewayResult<Option<u8>> {
        let out = self.exec(parse::TELEPHONY_REGISTRY).await?;
        let Some((rsrp, mut details)) = parse::parse_registry_signal(&out) else {
            self.details.clear();
            return Ok(None);
        };
        if let Some(op) = self.getprop(parse::OPERATOR).await {
            details.insert("operator".into(), op);
        }
        if let Some(rat) = self.getprop(parse::NETWORK_TYPE).await {
            details.insert("network_type".into(), rat);
        }
        self.details = details;
        Ok(Some(signal::rsrp_to_percent(rsrp)))
    }

    async fn run_auxiliary(&mut self, command: AuxCommand) -> GatewayResult<AuxOutput> {
        match command {
            AuxCommand::FirmwareVersion => {
                let release = self.getprop(parse::RELEASE).await.unwrap_or_default();
                let build = self.getprop(parse::BUILD_ID).await.unwrap_or_default();
                Ok(AuxOutput::raw(format!("{release} {build}").trim().to_string())
                    .with_value("android", release)
                    .with_value("build", build))
            }
            AuxCommand::CellInfo => {
                let mut output = AuxOutput::default();
                if let Some(op) = self.getprop(parse::OPERATOR).await {
                    output = output.with_value("operator", op);
                }
                if let Some(rat) = self.getprop(parse::NETWORK_TYPE).await {
                    output = output.with_value("network_type", rat);
                }
                Ok(output)
            }
            other => Err(GatewayError::not_supported(format!("{other} on remote shell"))),
        }
    }
}

impl<L: ShellLink> DeviceManager for ShellPhone<L> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::RemoteShell
    }

    fn transport_timeout(&self) -> Duration {
        self.timeout
    }

    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
        Box::pin(async move { self.initialize_phone().await })
    }

    fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>> {
        Box::pin(async move { self.check_status().await })
    }

    fn list_new_messages<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Vec<InboundMessage>>> {
        Box::pin(async move { self.read_messages().await })
    }

    fn acknowledge_message<'a>(
        &'a mut self,
        origin_ref: &'a str,
    ) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move { self.delete_message(origin_ref).await })
    }

    fn send_message<'a>(&'a mut self, to: &'a str, text: &'a str) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move { self.submit_message(to, text).await })
    }

    fn get_signal<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Option<u8>>> {
        Box::pin(async move { self.read_signal().await })
    }

    fn signal_details(&self) -> SignalDetails {
        self.details.clone()
    }

    fn cleanup<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.link.disconnect();
        })
    }

    fn auxiliary<'a>(&'a mut self, command: AuxCommand) -> BoxFuture<'a, GatewayResult<AuxOutput>> {
        Box::pin(async move { self.run_auxiliary(command).await })
    }
}
