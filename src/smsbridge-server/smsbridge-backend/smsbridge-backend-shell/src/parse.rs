// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Shell commands and their output grammars.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use smsbridge_core::SignalDetails;

use crate::link::shell_quote;

pub const BOOT_COMPLETED: &str = "getprop sys.boot_completed";
pub const MODEL: &str = "getprop ro.product.model";
pub const RELEASE: &str = "getprop ro.build.version.release";
pub const BUILD_ID: &str = "getprop ro.build.display.id";
pub const OPERATOR: &str = "getprop gsm.operator.alpha";
pub const NETWORK_TYPE: &str = "getprop gsm.network.type";
pub const TELEPHONY_REGISTRY: &str = "dumpsys telephony.registry";
pub const SIM_INFO: &str = "content query --uri content://telephony/siminfo --projection icc_id";
pub const LIST_INBOX: &str =
    "content query --uri content://sms/inbox --projection _id:address:date:body";

pub fn delete_sms(id: u64) -> String {
    format!("content delete --uri content://sms --where \"_id={id}\"")
}

/// `service call isms` transaction for sendTextForSubscriber.
pub fn send_sms(code: u32, subscription: i32, to: &str, text: &str) -> String {
    format!(
        "service call isms {code} i32 {subscription} s16 com.android.mms.service s16 null s16 {} s16 null s16 {} s16 null s16 null i32 0 i64 0",
        shell_quote(to),
        shell_quote(text)
    )
}

/// The binder reply starts with a zero status word on success.
pub fn isms_succeeded(reply: &str) -> bool {
    reply.contains("Parcel(00000000")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsRow {
    pub id: u64,
    pub address: String,
    pub date: Option<DateTime<Utc>>,
    pub body: String,
}

/// Rows of `content query` output. Bodies may span lines.
pub fn parse_sms_rows(output: &str) -> Vec<SmsRow> {
    let mut chunks: Vec<String> = Vec::new();
    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("Row: ") {
            chunks.push(line.to_string());
        } else if let Some(last) = chunks.last_mut() {
            last.push('\n');
            last.push_str(line);
        }
    }
    chunks.iter().filter_map(|c| parse_row(c)).collect()
}

fn parse_row(chunk: &str) -> Option<SmsRow> {
    let rest = chunk.strip_prefix("Row: ")?;
    let (_, rest) = rest.split_once(' ')?;
    let rest = rest.strip_prefix("_id=")?;
    let (id, rest) = rest.split_once(", address=")?;
    let (address, rest) = rest.split_once(", date=")?;
    let (date, body) = rest.split_once(", body=")?;
    Some(SmsRow {
        id: id.trim().parse().ok()?,
        address: address.trim().to_string(),
        date: date
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis),
        body: body.to_string(),
    })
}

/// Value of `key=` in the first row of a `content query`.
pub fn row_field(output: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    output.lines().find_map(|line| {
        let start = line.find(&needle)? + needle.len();
        let value = line[start..].split(", ").next()?.trim();
        (!value.is_empty() && value != "NULL").then(|| value.to_string())
    })
}

fn registry_field(name: &'static str) -> Option<&'static Regex> {
    static RSRP: OnceLock<Option<Regex>> = OnceLock::new();
    static RSRQ: OnceLock<Option<Regex>> = OnceLock::new();
    static RSSNR: OnceLock<Option<Regex>> = OnceLock::new();
    static RSSI: OnceLock<Option<Regex>> = OnceLock::new();
    let (cell, pattern) = match name {
        "rsrp" => (&RSRP, r"\brsrp=(-?\d+)"),
        "rsrq" => (&RSRQ, r"\brsrq=(-?\d+)"),
        "rssnr" => (&RSSNR, r"\brssnr=(-?\d+)"),
        _ => (&RSSI, r"\brssi=(-?\d+)"),
    };
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// First in-range value of `name`; unavailable cells report INT_MAX.
fn registry_value(output: &str, name: &'static str, range: (i64, i64)) -> Option<i32> {
    registry_field(name)?
        .captures_iter(output)
        .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
        .find(|v| (range.0..=range.1).contains(v))
        .map(|v| v as i32)
}

/// LTE RSRP plus companions from `dumpsys telephony.registry`.
pub fn parse_registry_signal(output: &str) -> Option<(i32, SignalDetails)> {
    let rsrp = registry_value(output, "rsrp", (-140, -43))?;
    let mut details = SignalDetails::new();
    details.insert("rsrp".into(), rsrp.to_string());
    if let Some(v) = registry_value(output, "rsrq", (-34, 3)) {
        details.insert("rsrq".into(), v.to_string());
    }
    if let Some(v) = registry_value(output, "rssnr", (-200, 300)) {
        details.insert("sinr".into(), v.to_string());
    }
    if let Some(v) = registry_value(output, "rssi", (-113, -25)) {
        details.insert("rssi".into(), v.to_string());
    }
    Some((rsrp, details))
}
