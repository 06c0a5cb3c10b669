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

use crate::commands::{self, AuxPlan, SignalGrammar, Vendor};
use crate::link::{AtLink, AtResponse};
use crate::parse;

const SLOW_EXCHANGE: Duration = Duration::from_secs(2);

/// Device manager for modems driven by AT commands.
pub struct AtModem<L> {
    device_id: String,
    phone_number: String,
    link: L,
    vendor: Vendor,
    timeout: Duration,
    details: SignalDetails,
    text_mode: bool,
}

impl<L: AtLink> AtModem<L> {
    pub fn new(device: &Device, link: L, timeout: Duration) -> Self {
        let vendor = Vendor::from_name(device.config_value("vendor"));
        Self {
            device_id: device.id.clone(),
            phone_number: device.phone_number.clone(),
            link,
            vendor,
            timeout,
            details: SignalDetails::new(),
            text_mode: false,
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn ensure_link(&mut self) -> GatewayResult<()> {
        if !self.link.is_open() {
            self.text_mode = false;
            self.link.open().await?;
        }
        Ok(())
    }

    async fn exec(&mut self, command: &str) -> GatewayResult<AtResponse> {
        self.ensure_link().await?;
        let start = Instant::now();
        let result = self.link.command(command, self.timeout).await;
        let elapsed = start.elapsed();
        if elapsed > SLOW_EXCHANGE {
            warn!("[{}] {} took {:?}", self.device_id, command, elapsed);
        } else {
            debug!("[{}] {} took {:?}", self.device_id, command, elapsed);
        }
        if !self.link.is_open() {
            self.text_mode = false;
        }
        result
    }

    /// Like `exec`, but a non-OK final result is a protocol error.
    async fn exec_ok(&mut self, command: &str) -> GatewayResult<AtResponse> {
        let resp = self.exec(command).await?;
        match resp.error() {
            None => Ok(resp),
            Some(err) => Err(GatewayError::protocol(format!("{command}: {err}"))),
        }
    }

    async fn best_effort(&mut self, command: &str) {
        if let Err(e) = self.exec_ok(command).await {
            warn!("[{}] {} failed: {}", self.device_id, command, e);
        }
    }

    async fn ensure_text_mode(&mut self) -> GatewayResult<()> {
        self.ensure_link().await?;
        if !self.text_mode {
            self.exec_ok(commands::TEXT_MODE).await?;
            self.text_mode = true;
        }
        Ok(())
    }

    async fn initialize_modem(&mut self) -> GatewayResult<InitReport> {
        self.link.close();
        self.text_mode = false;
        self.ensure_link().await?;
        self.exec_ok(commands::ATTENTION).await.map_err(|e| match e {
            GatewayError::Protocol(m) => GatewayError::Init(format!("modem rejected probe: {m}")),
            other => other,
        })?;

        let set = self.vendor.command_set();
        for command in set.init {
            self.best_effort(command).await;
        }
        if !set.init_settle.is_zero() {
            tokio::time::sleep(set.init_settle).await;
        }

        self.exec_ok(commands::TEXT_MODE)
            .await
            .map_err(|e| GatewayError::Init(format!("text mode not accepted: {e}")))?;
        self.text_mode = true;
        self.best_effort(commands::CHARSET_GSM).await;

        let model = match self.exec_ok(commands::MODEL).await {
            Ok(resp) => parse::identity_value(&resp, "+CGMM:"),
            Err(e) => {
                warn!("[{}] model query failed: {}", self.device_id, e);
                None
            }
        };
        let sim_identifier = match set.iccid {
            Some((command, prefix)) => match self.exec_ok(command).await {
                Ok(resp) => parse::identity_value(&resp, prefix),
                Err(e) => {
                    warn!("[{}] ICCID query failed: {}", self.device_id, e);
                    None
                }
            },
            None => None,
        };

        info!(
            "[{}] {} modem ready (model {:?})",
            self.device_id, self.vendor, model
        );
        Ok(InitReport {
            sim_identifier,
            model,
        })
    }

    async fn extended_signal(&mut self) -> Option<(u8, SignalDetails)> {
        let (command, grammar) = self.vendor.command_set().extended_signal?;
        let resp = match self.exec_ok(command).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("[{}] {} failed: {}", self.device_id, command, e);
                return None;
            }
        };
        let parsed = match grammar {
            SignalGrammar::Hcsq => parse::parse_hcsq(&resp),
            SignalGrammar::Gstatus => parse::parse_gstatus(&resp),
            SignalGrammar::Gtccinfo => parse::parse_gtccinfo(&resp),
        };
        if parsed.is_none() {
            debug!("[{}] unparsable {} response", self.device_id, command);
        }
        parsed
    }

    async fn read_signal(&mut self) -> GatewayResult<Option<u8>> {
        if let Some((percent, details)) = self.extended_signal().await {
            self.details = details;
            return Ok(Some(percent));
        }
        let resp = self.exec_ok(commands::SIGNAL).await?;
        let csq = parse::parse_csq(&resp)
            .ok_or_else(|| GatewayError::protocol(format!("unexpected CSQ reply: {}", resp.text())))?;
        let mut details = SignalDetails::new();
        details.insert("csq".into(), csq.to_string());
        if let Ok(resp) = self.exec_ok(commands::OPERATOR).await {
            if let Some(name) = parse::parse_operator(&resp) {
                details.insert("operator".into(), name);
            }
        }
        self.details = details;
        Ok(signal::csq_to_percent(csq))
    }

    async fn read_messages(&mut self) -> GatewayResult<Vec<InboundMessage>> {
        self.ensure_text_mode().await?;
        let resp = self.exec_ok(commands::LIST_ALL).await?;
        let entries = parse::parse_cmgl(&resp.lines);
        debug!("[{}] {} stored message(s)", self.device_id, entries.len());
        Ok(entries
            .into_iter()
            .map(|e| InboundMessage {
                origin_ref: e.index.to_string(),
                received_at: e.timestamp.as_deref().and_then(parse::parse_sms_timestamp),
                from_number: e.from,
                to_number: self.phone_number.clone(),
                text: e.text,
            })
            .collect())
    }

    async fn delete_message(&mut self, origin_ref: &str) -> GatewayResult<()> {
        let index: u32 = origin_ref
            .parse()
            .map_err(|_| GatewayError::protocol(format!("invalid storage index {origin_ref}")))?;
        self.exec_ok(&commands::delete(index)).await?;
        Ok(())
    }

    async fn submit_message(&mut self, to: &str, text: &str) -> GatewayResult<()> {
        if to.is_empty() || to.contains('"') {
            return Err(GatewayError::send(format!("invalid destination {to:?}")));
        }
        if text.bytes().any(|b| b == crate::link::CTRL_Z || b == 0x1b) {
            return Err(GatewayError::send("text contains control characters"));
        }
        self.ensure_text_mode().await?;
        let command = commands::send(to);
        let resp = self.link.submit(&command, text, self.timeout).await?;
        match resp.error() {
            None => {
                info!(
                    "[{}] sent to {} ({})",
                    self.device_id,
                    to,
                    resp.find("+CMGS:").unwrap_or("no reference")
                );
                Ok(())
            }
            Some(err) => Err(GatewayError::send(format!("{command}: {err}"))),
        }
    }

    fn plan_for(&self, command: &AuxCommand) -> GatewayResult<AuxPlan> {
        let unsupported = || GatewayError::not_supported(format!("{} on {}", command, self.vendor));
        let set = self.vendor.command_set();
        let single = |c: String| AuxPlan {
            commands: vec![c],
            gap: Duration::ZERO,
        };
        match command {
            AuxCommand::SetNetworkMode(name) => {
                commands::network_mode_command(self.vendor, name).ok_or_else(unsupported)
            }
            AuxCommand::SetBands(name) => {
                commands::band_command(self.vendor, name).ok_or_else(unsupported)
            }
            AuxCommand::UsbMode(name) => {
                commands::usb_mode_command(self.vendor, name).ok_or_else(unsupported)
            }
            AuxCommand::Unlock(code) if self.vendor == Vendor::Huawei => {
                if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(GatewayError::protocol("unlock code must be digits only"));
                }
                Ok(single(format!("AT^CARDLOCK={code}")))
            }
            AuxCommand::CarrierAggregation(on) if self.vendor == Vendor::Fibocom => {
                Ok(single(format!("AT+GTCAINFO={}", u8::from(*on))))
            }
            AuxCommand::Volte(on) if self.vendor == Vendor::Fibocom => {
                Ok(single(format!("AT+GTVOLTE={}", u8::from(*on))))
            }
            AuxCommand::Temperature if self.vendor == Vendor::Sierra => {
                Ok(single("AT!PCTEMP?".to_string()))
            }
            AuxCommand::CellInfo => Ok(single(set.cell_info.to_string())),
            AuxCommand::FirmwareVersion => Ok(single(set.firmware.to_string())),
            _ => Err(unsupported()),
        }
    }

    async fn run_auxiliary(&mut self, command: AuxCommand) -> GatewayResult<AuxOutput> {
        let plan = self.plan_for(&command)?;
        let mut last = None;
        for (i, step) in plan.commands.iter().enumerate() {
            if i > 0 && !plan.gap.is_zero() {
                tokio::time::sleep(plan.gap).await;
            }
            last = Some(self.exec_ok(step).await?);
        }
        let resp = last.ok_or_else(|| GatewayError::protocol("empty command plan"))?;
        let mut output = AuxOutput::raw(resp.text());
        match command {
            AuxCommand::Temperature => {
                for (sensor, value) in parse::parse_pctemp(&resp) {
                    output = output.with_value(&sensor, value.to_string());
                }
            }
            AuxCommand::CellInfo => {
                if let Some(name) = parse::parse_operator(&resp) {
                    output = output.with_value("operator", name);
                }
            }
            _ => {}
        }
        info!("[{}] {} done", self.device_id, command);
        Ok(output)
    }
}

impl<L: AtLink> DeviceManager for AtModem<L> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::AtSerial
    }

    fn transport_timeout(&self) -> Duration {
        self.timeout
    }

    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
        Box::pin(async move { self.initialize_modem().await })
    }

    fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>> {
        Box::pin(async move {
            self.exec_ok(commands::ATTENTION).await?;
            Ok(DeviceStatus::Online)
        })
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
            self.link.close();
            self.text_mode = false;
        })
    }

    fn auxiliary<'a>(&'a mut self, command: AuxCommand) -> BoxFuture<'a, GatewayResult<AuxOutput>> {
        Box::pin(async move { self.run_auxiliary(command).await })
    }
}
