// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Provider REST resources (2010-04-01 API).

use chrono::{DateTime, Utc};
use serde::Deserialize;

const API_VERSION: &str = "2010-04-01";

pub fn account_url(base: &str, sid: &str) -> String {
    format!("{base}/{API_VERSION}/Accounts/{sid}.json")
}

pub fn messages_url(base: &str, sid: &str) -> String {
    format!("{base}/{API_VERSION}/Accounts/{sid}/Messages.json")
}

pub fn message_url(base: &str, sid: &str, message_sid: &str) -> String {
    format!("{base}/{API_VERSION}/Accounts/{sid}/Messages/{message_sid}.json")
}

#[derive(Debug, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderMessage {
    pub sid: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub date_sent: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
}

impl ProviderMessage {
    pub fn is_inbound(&self) -> bool {
        self.direction == "inbound"
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.date_sent
            .as_deref()
            .or(self.date_created.as_deref())
            .and_then(parse_date)
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub messages: Vec<ProviderMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// Provider dates are RFC 2822 (`Tue, 02 Jan 2024 03:04:05 +0000`).
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Human-readable reason from an error body.
pub fn error_reason(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(e) if !e.message.is_empty() => match e.code {
            Some(code) => format!("{} ({code})", e.message),
            None => e.message,
        },
        _ => body.trim().chars().take(200).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            messages_url("https://api.example.com", "AC1"),
            "https://api.example.com/2010-04-01/Accounts/AC1/Messages.json"
        );
        assert_eq!(
            message_url("http://h", "AC1", "SM9"),
            "http://h/2010-04-01/Accounts/AC1/Messages/SM9.json"
        );
    }

    #[test]
    fn rfc2822_dates() {
        let d = parse_date("Tue, 02 Jan 2024 03:04:05 +0000").unwrap();
        assert_eq!(d.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn date_sent_preferred_over_created() {
        let m: ProviderMessage = serde_json::from_str(
            r#"{"sid":"SM1","direction":"inbound","date_sent":null,
                "date_created":"Tue, 02 Jan 2024 03:04:05 +0000"}"#,
        )
        .unwrap();
        assert!(m.is_inbound());
        assert!(m.received_at().is_some());
    }

    #[test]
    fn error_bodies() {
        assert_eq!(
            error_reason(r#"{"code":21211,"message":"Invalid 'To' Phone Number"}"#),
            "Invalid 'To' Phone Number (21211)"
        );
        assert_eq!(error_reason("gateway timeout"), "gateway timeout");
    }
}
