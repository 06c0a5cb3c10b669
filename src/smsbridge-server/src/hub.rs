// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Hub relay: forwards inbound messages and reports serviced numbers.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use smsbridge_core::{BoxFuture, DeviceSummary, GatewayError, GatewayResult, Message};

use crate::config::HubConfig;

const SLOW_REQUEST: Duration = Duration::from_secs(2);

/// Remote consumer of normalised messages.
///
/// Any failure, including a timeout, is a delivery failure and drives the
/// retry path.
pub trait HubRelay: Send + Sync {
    fn push_message<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, GatewayResult<()>>;

    fn report_capabilities<'a>(
        &'a self,
        devices: &'a [DeviceSummary],
    ) -> BoxFuture<'a, GatewayResult<()>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushSms<'a> {
    action: &'static str,
    key: &'a str,
    sms_id: u64,
    phone: &'a str,
    phone_from: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetServices<'a> {
    action: &'static str,
    key: &'a str,
    country_list: Vec<CountryEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountryEntry<'a> {
    country: &'a str,
    operator_map: BTreeMap<&'a str, NumberEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct NumberEntry<'a> {
    device_id: &'a str,
    family: &'a str,
    status: &'static str,
    signal: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct HubReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Hub client speaking the JSON `PUSH_SMS` / `GET_SERVICES` actions.
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    country: String,
}

impl HubClient {
    pub fn new(config: &HubConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("sms-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::connection(format!("hub client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            country: config.country.clone(),
        })
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> GatewayResult<HubReply> {
        let url = format!("{}{}", self.base_url, path);
        let start = Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::delivery(format!("POST {path}: {e}")))?;
        let status = resp.status();
        let elapsed = start.elapsed();
        if elapsed > SLOW_REQUEST {
            warn!("Hub POST {} took {:?}", path, elapsed);
        } else {
            debug!("Hub POST {} -> {} in {:?}", path, status, elapsed);
        }
        if !status.is_success() {
            return Err(GatewayError::delivery(format!("POST {path} returned {status}")));
        }
        resp.json::<HubReply>()
            .await
            .map_err(|e| GatewayError::delivery(format!("POST {path}: malformed reply: {e}")))
    }
}

impl HubRelay for HubClient {
    fn push_message<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            let body = PushSms {
                action: "PUSH_SMS",
                key: &self.api_key,
                sms_id: message.id,
                phone: &message.to_number,
                phone_from: &message.from_number,
                text: &message.text,
            };
            let reply = self.post("/sms", &body).await?;
            if reply.status == "SUCCESS" {
                Ok(())
            } else {
                let reason = reply.error.unwrap_or(reply.status);
                Err(GatewayError::delivery(format!(
                    "hub refused message {}: {reason}",
                    message.id
                )))
            }
        })
    }

    fn report_capabilities<'a>(
        &'a self,
        devices: &'a [DeviceSummary],
    ) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            let operator_map = devices
                .iter()
                .map(|d| {
                    (
                        d.phone_number.as_str(),
                        NumberEntry {
                            device_id: &d.id,
                            family: d.family.as_str(),
                            status: d.status.as_str(),
                            signal: d.signal_strength,
                        },
                    )
                })
                .collect();
            let body = GetServices {
                action: "GET_SERVICES",
                key: &self.api_key,
                country_list: vec![CountryEntry {
                    country: &self.country,
                    operator_map,
                }],
            };
            self.post("/services", &body).await.map(|_| ())
        })
    }
}

#[cfg(test)]
pub mod scripted {
    //! In-memory hub for pipeline and gateway tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Answers pushes from a script of outcomes; succeeds once the script is empty.
    #[derive(Default)]
    pub struct ScriptedHub {
        script: Mutex<VecDeque<bool>>,
        pushed: Mutex<Vec<u64>>,
        reports: Mutex<Vec<Vec<DeviceSummary>>>,
    }

    impl ScriptedHub {
        pub fn failing(times: usize) -> Self {
            let hub = Self::default();
            hub.script.lock().unwrap().extend(std::iter::repeat(false).take(times));
            hub
        }

        pub fn pushed(&self) -> Vec<u64> {
            self.pushed.lock().unwrap().clone()
        }

        pub fn reports(&self) -> Vec<Vec<DeviceSummary>> {
            self.reports.lock().unwrap().clone()
        }
    }

    impl HubRelay for ScriptedHub {
        fn push_message<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, GatewayResult<()>> {
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            self.pushed.lock().unwrap().push(message.id);
            Box::pin(std::future::ready(if ok {
                Ok(())
            } else {
                Err(GatewayError::delivery("hub unavailable"))
            }))
        }

        fn report_capabilities<'a>(
            &'a self,
            devices: &'a [DeviceSummary],
        ) -> BoxFuture<'a, GatewayResult<()>> {
            self.reports.lock().unwrap().push(devices.to_vec());
            Box::pin(std::future::ready(Ok(())))
        }
    }
}
