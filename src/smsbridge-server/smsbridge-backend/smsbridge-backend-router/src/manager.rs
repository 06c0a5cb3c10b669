// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use smsbridge_core::signal;
use smsbridge_core::{
    AuxCommand, AuxOutput, BoxFuture, Device, DeviceFamily, DeviceManager, DeviceStatus,
    GatewayError, GatewayResult, InboundMessage, InitReport, SignalDetails,
};

use crate::api::{self, SendRequest, SmsListResponse};
use crate::session::RouterSession;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub base_url: String,
    pub timeout: Duration,
}

/// Device manager for routers exposing the v1 SMS REST API.
pub struct RouterManager {
    device_id: String,
    phone_number: String,
    session: RouterSession,
    timeout: Duration,
    details: SignalDetails,
}

impl RouterManager {
    pub fn new(device: Device, settings: RouterSettings) -> GatewayResult<Self> {
        let password = device
            .config_value("password")
            .unwrap_or(api::DEFAULT_PASSWORD);
        let session = RouterSession::new(&settings.base_url, password, settings.timeout)?;
        Ok(Self {
            device_id: device.id,
            phone_number: device.phone_number,
            session,
            timeout: settings.timeout,
            details: SignalDetails::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        self.session.base_url()
    }

    async fn initialize_router(&mut self) -> GatewayResult<InitReport> {
        self.session.reset();
        self.session.login().await.map_err(|e| match e {
            GatewayError::Protocol(m) => GatewayError::Init(m),
            other => other,
        })?;
        let mut report = InitReport::default();
        match self.session.get(api::DEVICE_INFO).await {
            Ok(info) => {
                let info = info.get("device").unwrap_or(&info);
                report.model = api::first_field(info, &["model", "model_name", "device_name"]);
                report.sim_identifier = api::first_field(info, &["iccid", "sim_iccid"]);
            }
            Err(e) => warn!("[{}] device info unavailable: {}", self.device_id, e),
        }
        info!(
            "[{}] router at {} ready (model {:?})",
            self.device_id,
            self.session.base_url(),
            report.model
        );
        Ok(report)
    }

    async fn read_messages(&mut self) -> GatewayResult<Vec<InboundMessage>> {
        let reply = self.session.get(api::SMS_LIST).await?;
        let list: SmsListResponse = serde_json::from_value(reply)
            .map_err(|e| GatewayError::protocol(format!("sms list: {e}")))?;
        if !list.success {
            return Err(GatewayError::protocol("sms list not successful"));
        }
        debug!("[{}] {} stored message(s)", self.device_id, list.messages.len());
        Ok(list
            .messages
            .into_iter()
            .map(|m| InboundMessage {
                origin_ref: m.origin_ref(),
                received_at: m.received_at(),
                from_number: m.sender,
                to_number: self.phone_number.clone(),
                text: m.text,
            })
            .collect())
    }

    async fn delete_message(&mut self, origin_ref: &str) -> GatewayResult<()> {
        let reply = self
            .session
            .post(api::SMS_DELETE, &api::delete_request(origin_ref))
            .await?;
        if api::succeeded(&reply) {
            Ok(())
        } else {
            Err(GatewayError::protocol(format!("delete of {origin_ref} refused")))
        }
    }

    async fn submit_message(&mut self, to: &str, text: &str) -> GatewayResult<()> {
        let body = serde_json::to_value(SendRequest { to, text })
            .map_err(|e| GatewayError::send(e.to_string()))?;
        let reply = self.session.post(api::SMS_SEND, &body).await.map_err(|e| match e {
            GatewayError::Protocol(m) => GatewayError::Send(m),
            other => other,
        })?;
        if api::succeeded(&reply) {
            info!("[{}] sent to {}", self.device_id, to);
            Ok(())
        } else {
            Err(GatewayError::send(format!("router did not confirm send to {to}")))
        }
    }

    async fn read_signal(&mut self) -> GatewayResult<Option<u8>> {
        let reply = self.session.get(api::SIGNAL_INFO).await?;
        if !api::succeeded(&reply) {
            return Err(GatewayError::protocol("signal query not successful"));
        }
        let report = reply.get("signal");
        self.details = api::flatten_object(report);
        let rssi = report
            .and_then(|s| s.get("rssi"))
            .and_then(Value::as_f64)
            .map(|v| v.round() as i32);
        Ok(rssi.map(signal::router_rssi_to_percent))
    }

    async fn run_auxiliary(&mut self, command: AuxCommand) -> GatewayResult<AuxOutput> {
        let (path, section) = match command {
            AuxCommand::CellInfo => (api::NETWORK_INFO, "network"),
            AuxCommand::FirmwareVersion => (api::DEVICE_INFO, "device"),
            other => return Err(GatewayError::not_supported(format!("{other} on router"))),
        };
        let reply = self.session.get(path).await?;
        let body = reply.get(section).unwrap_or(&reply);
        let mut output = AuxOutput::raw(body.to_string());
        output.values = api::flatten_object(Some(body));
        output.values.remove("success");
        Ok(output)
    }
}

impl DeviceManager for RouterManager {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::HttpRouter
    }

    fn transport_timeout(&self) -> Duration {
        self.timeout
    }

    fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
        Box::pin(async move { self.initialize_router().await })
    }

    fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>> {
        Box::pin(async move {
            self.session.get(api::DEVICE_INFO).await?;
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
            self.session.reset();
        })
    }

    fn auxiliary<'a>(&'a mut self, command: AuxCommand) -> BoxFuture<'a, GatewayResult<AuxOutput>> {
        Box::pin(async move { self.run_auxiliary(command).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn router(server: &MockServer) -> RouterManager {
        Mock::given(method("POST"))
            .and(path(api::LOGIN))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "token": "t"})),
            )
            .mount(server)
            .await;
        let device = Device::new("r1", DeviceFamily::HttpRouter, "+15552222", "192.168.0.1");
        RouterManager::new(
            device,
            RouterSettings {
                base_url: server.uri(),
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap()
    }

    async fn mount_get(server: &MockServer, p: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn initialize_reads_device_info() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        mount_get(
            &server,
            api::DEVICE_INFO,
            json!({"success": true, "device": {"model": "RG350", "iccid": "8901"}}),
        )
        .await;
        let report = mgr.initialize().await.unwrap();
        assert_eq!(report.model.as_deref(), Some("RG350"));
        assert_eq!(report.sim_identifier.as_deref(), Some("8901"));
    }

    #[tokio::test]
    async fn rejected_login_fails_initialize() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(api::LOGIN))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;
        let device = Device::new("r1", DeviceFamily::HttpRouter, "+1", "x");
        let mut mgr = RouterManager::new(
            device,
            RouterSettings {
                base_url: server.uri(),
                timeout: Duration::from_secs(2),
            },
        )
        .unwrap();
        assert!(matches!(mgr.initialize().await.unwrap_err(), GatewayError::Init(_)));
    }

    #[tokio::test]
    async fn list_then_acknowledge() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        mount_get(
            &server,
            api::SMS_LIST,
            json!({"success": true, "messages": [
                {"id": 4, "sender": "+1555", "text": "code 1234", "timestamp": 1704164645}
            ]}),
        )
        .await;
        Mock::given(method("POST"))
            .and(path(api::SMS_DELETE))
            .and(body_json(json!({"id": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let msgs = mgr.list_new_messages().await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].origin_ref, "4");
        assert_eq!(msgs[0].to_number, "+15552222");
        assert_eq!(msgs[0].text, "code 1234");
        mgr.acknowledge_message("4").await.unwrap();
    }

    #[tokio::test]
    async fn send_needs_success_flag() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        Mock::given(method("POST"))
            .and(path(api::SMS_SEND))
            .and(body_json(json!({"to": "+1777", "text": "hi"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(api::SMS_SEND))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
            .mount(&server)
            .await;

        mgr.send_message("+1777", "hi").await.unwrap();
        let err = mgr.send_message("+1777", "other").await.unwrap_err();
        assert!(matches!(err, GatewayError::Send(_)));
    }

    #[tokio::test]
    async fn send_server_error_is_send_failure() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        Mock::given(method("POST"))
            .and(path(api::SMS_SEND))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        assert!(matches!(
            mgr.send_message("+1", "x").await.unwrap_err(),
            GatewayError::Send(_)
        ));
    }

    #[tokio::test]
    async fn signal_from_rssi() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        mount_get(
            &server,
            api::SIGNAL_INFO,
            json!({"success": true, "signal": {"rssi": -65, "rsrp": -95, "band": "B3"}}),
        )
        .await;
        assert_eq!(mgr.get_signal().await.unwrap(), Some(35));
        let details = mgr.signal_details();
        assert_eq!(details.get("band").map(String::as_str), Some("B3"));
        assert_eq!(details.get("rsrp").map(String::as_str), Some("-95"));
    }

    #[tokio::test]
    async fn signal_without_rssi_is_none() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        mount_get(&server, api::SIGNAL_INFO, json!({"success": true, "signal": {}})).await;
        assert_eq!(mgr.get_signal().await.unwrap(), None);
    }

    #[tokio::test]
    async fn band_selection_is_not_supported() {
        let server = MockServer::start().await;
        let mut mgr = router(&server).await;
        let err = mgr
            .auxiliary(AuxCommand::SetBands("all".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotSupported(_)));
    }
}
