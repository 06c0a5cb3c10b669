// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{debug, info, warn};

use smsbridge_core::{
    BoxFuture, Device, DeviceFamily, DeviceManager, DeviceStatus, GatewayError, GatewayResult,
    InboundMessage, InitReport,
};

use crate::api::{self, Account, MessagePage};

const SLOW_REQUEST: Duration = Duration::from_secs(2);
const PAGE_SIZE: &str = "50";

#[derive(Debug, Clone)]
pub struct VoipSettings {
    pub base_url: String,
    pub timeout: Duration,
}

fn map_http_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(e.to_string())
    } else if e.is_decode() {
        GatewayError::protocol(format!("malformed reply: {e}"))
    } else {
        GatewayError::connection(e.to_string())
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    account_sid: String,
    auth_token: String,
}

/// Device manager for a provider number on a Twilio-compatible REST API.
pub struct VoipManager {
    device_id: String,
    from_number: String,
    base_url: String,
    client: reqwest::Client,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl VoipManager {
    pub fn new(device: Device, settings: VoipSettings) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::connection(format!("http client: {e}")))?;
        let credentials = match (
            device.config_value("account_sid"),
            device.config_value("auth_token"),
        ) {
            (Some(sid), Some(token)) => Some(Credentials {
                account_sid: sid.to_string(),
                auth_token: token.to_string(),
            }),
            _ => None,
        };
        let from_number = device
            .config_value("from_number")
            .unwrap_or(&device.phone_number)
            .to_string();
        Ok(Self {
            device_id: device.id,
            from_number,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
            timeout: settings.timeout,
        })
    }

    fn credentials(&self) -> GatewayResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| GatewayError::Init("account_sid and auth_token are required".into()))
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> GatewayResult<reqwest::Response> {
        let creds = self.credentials()?;
        let start = Instant::now();
        let resp = req
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .send()
            .await
            .map_err(map_http_error)?;
        let elapsed = start.elapsed();
        if elapsed > SLOW_REQUEST {
            warn!("[{}] {} took {:?}", self.device_id, what, elapsed);
        } else {
            debug!("[{}] {} -> {} in {:?}", self.device_id, what, resp.status(), elapsed);
        }
        Ok(resp)
    }

    async fn failure(resp: reqwest::Response, what: &str) -> GatewayError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let reason = format!("{what} returned {status}: {}", api::error_reason(&body));
        if status.is_server_error() {
            GatewayError::connection(reason)
        } else {
            GatewayError::protocol(reason)
        }
    }

    async fn fetch_account(&self) -> GatewayResult<Account> {
        let sid = &self.credentials()?.account_sid;
        let req = self.client.get(api::account_url(&self.base_url, sid));
        let resp = self.send(req, "account").await?;
        if !resp.status().is_success() {
            return Err(Self::failure(resp, "account").await);
        }
        resp.json().await.map_err(map_http_error)
    }

    async fn initialize_account(&mut self) -> GatewayResult<InitReport> {
        self.credentials()?;
        let account = self.fetch_account().await.map_err(|e| match e {
            GatewayError::Protocol(m) => GatewayError::Init(m),
            other => other,
        })?;
        if !account.is_active() {
            return Err(GatewayError::Init(format!("account is {}", account.status)));
        }
        info!(
            "[{}] provider account {:?} active, sending as {}",
            self.device_id, account.friendly_name, self.from_number
        );
        Ok(InitReport {
            sim_identifier: None,
            model: account.friendly_name,
        })
    }

    async fn check_status(&self) -> GatewayResult<DeviceStatus> {
        let account = self.fetch_account().await?;
        if account.is_active() {
            Ok(DeviceStatus::Online)
        } else {
            Err(GatewayError::protocol(format!("account is {}", account.status)))
        }
    }

    async fn read_messages(&self) -> GatewayResult<Vec<InboundMessage>> {
        let sid = &self.credentials()?.account_sid;
        let req = self
            .client
            .get(api::messages_url(&self.base_url, sid))
            .query(&[("To", self.from_number.as_str()), ("PageSize", PAGE_SIZE)]);
        let resp = self.send(req, "message list").await?;
        if !resp.status().is_success() {
            return Err(Self::failure(resp, "message list").await);
        }
        let page: MessagePage = resp.json().await.map_err(map_http_error)?;
        Ok(page
            .messages
            .into_iter()
            .filter(|m| m.is_inbound())
            .map(|m| InboundMessage {
                received_at: m.received_at(),
                origin_ref: m.sid,
                from_number: m.from,
                to_number: if m.to.is_empty() {
                    self.from_number.clone()
                } else {
                    m.to
                },
                text: m.body,
            })
            .collect())
    }

    async fn delete_message(&self, origin_ref: &str) -> GatewayResult<()> {
        let sid = &self.credentials()?.account_sid;
        let req = self
            .client
            .delete(api::message_url(&self.base_url, sid, origin_ref));
        let resp = self.send(req, "message delete").await?;
        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            _ => Err(Self::failure(resp, "message delete").await),
        }
    }

    async fn submit_message(&self, to: &str, text: &str) -> GatewayResult<()> {
        let sid = &self.credentials()?.account_sid;
        let req = self
            .client
            .post(api::messages_url(&self.base_url, sid))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", text)]);
        let resp = self.send(req, "message send").await?;
        if resp.status() == StatusCode::CREATED {
            info!("[{}] sent to {}", self.device_id, to);
            return Ok(());
        }
        Err(match Self::failure(resp, "message send").await {
            GatewayError::Protocol(m) => GatewayError::Send(m),
            other => other,
        })
    }
}

impl DeviceManager for VoipManager {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::VoipRest
    }

    fn transport_timeout(&self) -> Duration {
        self.timeout
    }

    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
        Box::pin(async move { self.initialize_account().await })
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

    /// Provider numbers have no radio.
    fn get_signal<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Option<u8>>> {
        Box::pin(async move { Ok(None) })
    }

    fn cleanup<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            debug!("[{}] provider session released", self.device_id);
        })
    }
}
