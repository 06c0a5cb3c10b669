// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a message towards the Hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message read from a device, before it is persisted.
///
/// `origin_ref` identifies the message at the origin (storage index, provider
/// id, content-provider row) so the device manager can acknowledge it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub origin_ref: String,
    pub from_number: String,
    pub to_number: String,
    pub text: String,
    /// `None` when the origin gave no usable timestamp.
    pub received_at: Option<DateTime<Utc>>,
}

/// One SMS, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by persistence; zero until saved.
    pub id: u64,
    pub device_id: String,
    pub from_number: String,
    pub to_number: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub delivery_attempts: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Next eligible retry while pending. A pending message without one is
    /// due immediately.
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
    /// Origin reference, kept only when the origin gave no timestamp. It
    /// then stands in for `received_at` in the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_ref: Option<String>,
}

impl Message {
    /// `now` stands in for a missing origin timestamp.
    pub fn from_inbound(device_id: &str, inbound: &InboundMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            device_id: device_id.to_string(),
            from_number: inbound.from_number.clone(),
            to_number: inbound.to_number.clone(),
            text: inbound.text.clone(),
            received_at: inbound.received_at.unwrap_or(now),
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            last_attempt: None,
            error_message: None,
            retry_after: None,
            origin_ref: match inbound.received_at {
                Some(_) => None,
                None => Some(inbound.origin_ref.clone()),
            },
        }
    }

    /// Stable identity used to recognise a message read twice from the origin.
    pub fn fingerprint(&self) -> String {
        match &self.origin_ref {
            Some(origin) => hash_fields(
                &self.device_id,
                &self.from_number,
                &format!("ref:{origin}"),
                &self.text,
            ),
            None => fingerprint(
                &self.device_id,
                &self.from_number,
                &self.received_at,
                &self.text,
            ),
        }
    }

    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.delivery_status == DeliveryStatus::Pending
            && self.retry_after.map_or(true, |at| at <= now)
    }
}

pub fn fingerprint(device_id: &str, from: &str, received_at: &DateTime<Utc>, text: &str) -> String {
    hash_fields(device_id, from, &received_at.timestamp().to_string(), text)
}

fn hash_fields(device_id: &str, from: &str, moment: &str, text: &str) -> String {
    // FNV-1a over the identifying fields keeps keys short for the store.
    let mut hash: u64 = 0xcbf29ce484222325;
    for part in [device_id, from, moment, text] {
        for byte in part.bytes().chain(std::iter::once(0x1f)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    format!("{device_id}:{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage {
            origin_ref: "3".to_string(),
            from_number: "+15551234".to_string(),
            to_number: "+15550000".to_string(),
            text: text.to_string(),
            received_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 10, 0).unwrap()
    }

    #[test]
    fn new_message_starts_pending() {
        let msg = Message::from_inbound("d1", &inbound("hi"), now());
        assert_eq!(msg.id, 0);
        assert_eq!(msg.delivery_status, DeliveryStatus::Pending);
        assert_eq!(msg.delivery_attempts, 0);
        assert!(msg.retry_after.is_none());
        assert!(msg.origin_ref.is_none());
        assert_eq!(msg.received_at, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    }

    #[test]
    fn fingerprint_depends_on_content() {
        let a = Message::from_inbound("d1", &inbound("hi"), now());
        let b = Message::from_inbound("d1", &inbound("hi"), now());
        let c = Message::from_inbound("d1", &inbound("hello"), now());
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert!(a.fingerprint().starts_with("d1:"));
    }

    #[test]
    fn retry_due_only_while_pending() {
        let at = now();
        let mut msg = Message::from_inbound("d1", &inbound("hi"), at);
        msg.retry_after = Some(at + chrono::Duration::seconds(1));
        assert!(!msg.is_retry_due(at));
        msg.retry_after = Some(at);
        assert!(msg.is_retry_due(at));
        msg.delivery_status = DeliveryStatus::Failed;
        assert!(!msg.is_retry_due(at));
    }

    #[test]
    fn unscheduled_pending_message_is_due() {
        let msg = Message::from_inbound("d1", &inbound("hi"), now());
        assert!(msg.retry_after.is_none());
        assert!(msg.is_retry_due(now()));
    }

    #[test]
    fn fingerprint_without_timestamp_is_stable_across_reads() {
        let mut untimed = inbound("hi");
        untimed.received_at = None;
        let first = Message::from_inbound("d1", &untimed, now());
        let again = Message::from_inbound("d1", &untimed, now() + chrono::Duration::minutes(5));
        assert_eq!(first.received_at, now());
        assert_eq!(first.origin_ref.as_deref(), Some("3"));
        assert_eq!(first.fingerprint(), again.fingerprint());

        untimed.origin_ref = "4".to_string();
        let elsewhere = Message::from_inbound("d1", &untimed, now());
        assert_ne!(first.fingerprint(), elsewhere.fingerprint());
    }
}
