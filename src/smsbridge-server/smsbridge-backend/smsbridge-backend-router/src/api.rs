// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Router REST API paths and payloads.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use smsbridge_core::SignalDetails;

pub const LOGIN: &str = "/api/v1/login";
pub const SMS_LIST: &str = "/api/v1/sms/list";
pub const SMS_SEND: &str = "/api/v1/sms/send";
pub const SMS_DELETE: &str = "/api/v1/sms/delete";
pub const DEVICE_INFO: &str = "/api/v1/device/info";
pub const SIGNAL_INFO: &str = "/api/v1/device/signal";
pub const NETWORK_INFO: &str = "/api/v1/network/info";

pub const DEFAULT_PASSWORD: &str = "admin";

/// The login endpoint takes the hex MD5 of the admin password.
pub fn password_digest(password: &str) -> String {
    hex::encode(Md5::digest(password.as_bytes()))
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SmsEntry {
    /// Numeric on most firmware, a string on some.
    pub id: Value,
    pub sender: String,
    #[serde(default)]
    pub text: String,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl SmsEntry {
    pub fn origin_ref(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp?, 0)
    }
}

#[derive(Debug, Deserialize)]
pub struct SmsListResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<SmsEntry>,
}

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub text: &'a str,
}

/// Delete payload; numeric refs go back as numbers.
pub fn delete_request(origin_ref: &str) -> Value {
    let id = match origin_ref.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(origin_ref),
    };
    serde_json::json!({ "id": id })
}

/// `success` flag of a generic reply; absent means failure.
pub fn succeeded(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool).unwrap_or(false)
}

/// Flatten scalar members of a JSON object into string pairs.
pub fn flatten_object(obj: Option<&Value>) -> SignalDetails {
    let mut out = SignalDetails::new();
    if let Some(Value::Object(map)) = obj {
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            out.insert(key.clone(), text);
        }
    }
    out
}

/// First present string-ish field among `keys`.
pub fn first_field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
