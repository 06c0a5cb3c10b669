// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Dummy device family for development and testing.
//!
//! Holds an inbox and outbox in memory and answers every call immediately
//! (or after `delay_ms`). No hardware required. Behaviour can be steered from
//! the device config (`signal`, `delay_ms`, `fail_init`) or at runtime
//! through a [`DummyControl`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use smsbridge_core::{
    BoxFuture, Device, DeviceFamily, DeviceManager, DeviceStatus, GatewayError, GatewayResult,
    InboundMessage, InitReport, SignalDetails,
};

#[derive(Debug, Default)]
struct DummyState {
    inbox: BTreeMap<u64, InboundMessage>,
    next_ref: u64,
    outbox: Vec<(String, String)>,
    signal: Option<u8>,
    delay: Duration,
    fail_init: Option<String>,
    fail_poll: Option<String>,
    fail_send: Option<String>,
    fail_ack: Option<String>,
    acknowledged: Vec<String>,
    initialized: bool,
    cleaned_up: bool,
}

/// Runtime handle onto a dummy device's state.
#[derive(Debug, Clone, Default)]
pub struct DummyControl {
    state: Arc<Mutex<DummyState>>,
}

impl DummyControl {
    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop a message into the device inbox; returns its origin ref.
    pub fn deliver(&self, from: &str, text: &str) -> String {
        let mut state = self.lock();
        state.next_ref += 1;
        let origin_ref = state.next_ref;
        state.inbox.insert(
            origin_ref,
            InboundMessage {
                origin_ref: origin_ref.to_string(),
                from_number: from.to_string(),
                to_number: String::new(),
                text: text.to_string(),
                received_at: Some(Utc::now()),
            },
        );
        origin_ref.to_string()
    }

    /// Like [`DummyControl::deliver`], for an origin that keeps no timestamp.
    pub fn deliver_untimed(&self, from: &str, text: &str) -> String {
        let origin_ref = self.deliver(from, text);
        let mut state = self.lock();
        let next = state.next_ref;
        if let Some(message) = state.inbox.get_mut(&next) {
            message.received_at = None;
        }
        origin_ref
    }

    pub fn set_signal(&self, signal: Option<u8>) {
        self.lock().signal = signal;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    pub fn fail_init(&self, reason: Option<&str>) {
        self.lock().fail_init = reason.map(str::to_string);
    }

    pub fn fail_poll(&self, reason: Option<&str>) {
        self.lock().fail_poll = reason.map(str::to_string);
    }

    pub fn fail_send(&self, reason: Option<&str>) {
        self.lock().fail_send = reason.map(str::to_string);
    }

    pub fn fail_ack(&self, reason: Option<&str>) {
        self.lock().fail_ack = reason.map(str::to_string);
    }

    pub fn inbox_len(&self) -> usize {
        self.lock().inbox.len()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.lock().outbox.clone()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.lock().acknowledged.clone()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.lock().cleaned_up
    }
}

pub struct DummyManager {
    device: Device,
    control: DummyControl,
}

impl DummyManager {
    pub fn new(device: Device) -> Self {
        let control = DummyControl::default();
        {
            let mut state = control.lock();
            state.signal = match device.config_value("signal") {
                Some("none") => None,
                Some(v) => v.parse().ok().or(Some(75)),
                None => Some(75),
            };
            state.delay = device
                .config_value("delay_ms")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or_default();
            state.fail_init = device.config_value("fail_init").map(str::to_string);
        }
        Self { device, control }
    }

    pub fn control(&self) -> DummyControl {
        self.control.clone()
    }

    async fn pause(&self) {
        let delay = self.control.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl DeviceManager for DummyManager {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Dummy
    }

    fn transport_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.control.lock();
            if let Some(reason) = state.fail_init.clone() {
                return Err(GatewayError::Init(reason));
            }
            state.initialized = true;
            state.cleaned_up = false;
            debug!("dummy device {} initialized", self.device.id);
            Ok(InitReport {
                sim_identifier: Some(format!("8900{:0>15}", self.device.phone_number)),
                model: Some("dummy".to_string()),
            })
        })
    }

    fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>> {
        Box::pin(async move {
            self.pause().await;
            match self.control.lock().fail_poll.clone() {
                Some(reason) => Err(GatewayError::timeout(reason)),
                None => Ok(DeviceStatus::Online),
            }
        })
    }

    fn list_new_messages<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Vec<InboundMessage>>> {
        Box::pin(async move {
            self.pause().await;
            let phone = self.device.phone_number.clone();
            let state = self.control.lock();
            Ok(state
                .inbox
                .values()
                .cloned()
                .map(|mut m| {
                    m.to_number = phone.clone();
                    m
                })
                .collect())
        })
    }

    fn acknowledge_message<'a>(
        &'a mut self,
        origin_ref: &'a str,
    ) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.control.lock();
            if let Some(reason) = state.fail_ack.clone() {
                return Err(GatewayError::protocol(reason));
            }
            let key: u64 = origin_ref
                .parse()
                .map_err(|_| GatewayError::protocol(format!("bad origin ref {origin_ref}")))?;
            state.inbox.remove(&key);
            state.acknowledged.push(origin_ref.to_string());
            Ok(())
        })
    }

    fn send_message<'a>(&'a mut self, to: &'a str, text: &'a str) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            self.pause().await;
            let mut state = self.control.lock();
            if let Some(reason) = state.fail_send.clone() {
                return Err(GatewayError::send(reason));
            }
            state.outbox.push((to.to_string(), text.to_string()));
            Ok(())
        })
    }

    fn get_signal<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Option<u8>>> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.control.lock().signal)
        })
    }

    fn signal_details(&self) -> SignalDetails {
        let mut details = SignalDetails::new();
        details.insert("network_type".to_string(), "dummy".to_string());
        details
    }

    fn cleanup<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.control.lock();
            state.initialized = false;
            state.cleaned_up = true;
        })
    }
}
