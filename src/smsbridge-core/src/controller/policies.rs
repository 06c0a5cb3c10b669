// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Delivery retry and polling policies.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::device::DeviceStatus;
use crate::message::{DeliveryStatus, Message};

/// Hub delivery retry policy.
///
/// `delivery_attempts` counts failed pushes only. After failure `n` the next
/// retry is due `min(cap, 2^n)` seconds later; once `n` exceeds
/// `max_attempts` the message is failed for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    max_attempts: u32,
    cap: Duration,
}

/// What `on_failure` decided for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    RetryAt(DateTime<Utc>),
    Failed,
}

impl DeliveryPolicy {
    pub fn new(max_attempts: u32, cap: Duration) -> Self {
        Self { max_attempts, cap }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows failure number `attempts`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let secs = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.cap)
    }

    /// Schedule a freshly stored message so the retry sweep picks it up
    /// should its first push never report back.
    pub fn on_queued(&self, message: &mut Message, now: DateTime<Utc>) {
        let grace = chrono::Duration::from_std(self.cap).unwrap_or_else(|_| chrono::Duration::minutes(5));
        message.delivery_status = DeliveryStatus::Pending;
        message.retry_after = Some(now + grace);
    }

    /// Record a failed push.
    pub fn on_failure(&self, message: &mut Message, error: &str, now: DateTime<Utc>) -> DeliveryOutcome {
        message.delivery_attempts = message.delivery_attempts.saturating_add(1);
        message.last_attempt = Some(now);
        message.error_message = Some(error.to_string());
        if message.delivery_attempts > self.max_attempts {
            message.delivery_status = DeliveryStatus::Failed;
            message.retry_after = None;
            return DeliveryOutcome::Failed;
        }
        let delay = chrono::Duration::from_std(self.backoff(message.delivery_attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.cap.as_secs() as i64));
        let at = now + delay;
        message.delivery_status = DeliveryStatus::Pending;
        message.retry_after = Some(at);
        DeliveryOutcome::RetryAt(at)
    }

    /// Record a successful push.
    pub fn on_success(&self, message: &mut Message, now: DateTime<Utc>) -> DeliveryOutcome {
        message.last_attempt = Some(now);
        message.delivery_status = DeliveryStatus::Delivered;
        message.retry_after = None;
        message.error_message = None;
        DeliveryOutcome::Delivered
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(300))
    }
}

/// Policy for polling devices.
pub trait PollingPolicy: Send + Sync {
    fn interval(&self) -> Duration;

    fn should_poll(&self, status: DeviceStatus) -> bool;
}

/// Constant interval; only online and error devices are polled.
#[derive(Debug, Clone)]
pub struct FixedPolling {
    interval: Duration,
}

impl FixedPolling {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl PollingPolicy for FixedPolling {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn should_poll(&self, status: DeviceStatus) -> bool {
        status.is_pollable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::InboundMessage;
    use chrono::TimeZone;

    fn message() -> Message {
        Message::from_inbound(
            "d1",
            &InboundMessage {
                origin_ref: "1".into(),
                from_number: "+1".into(),
                to_number: "+2".into(),
                text: "hi".into(),
                received_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            },
            now(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = DeliveryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(16));
        assert_eq!(policy.backoff(8), Duration::from_secs(256));
        for n in 9..200 {
            assert_eq!(policy.backoff(n), Duration::from_secs(300));
        }
    }

    #[test]
    fn queued_message_gets_a_fallback_retry() {
        let policy = DeliveryPolicy::default();
        let mut msg = message();
        policy.on_queued(&mut msg, now());
        assert_eq!(msg.retry_after, Some(now() + chrono::Duration::seconds(300)));
        assert!(!msg.is_retry_due(now()));
        assert!(msg.is_retry_due(now() + chrono::Duration::seconds(300)));
        assert_eq!(msg.delivery_attempts, 0);
    }

    #[test]
    fn failure_schedules_retry() {
        let policy = DeliveryPolicy::default();
        let mut msg = message();
        let outcome = policy.on_failure(&mut msg, "hub timeout", now());
        assert_eq!(outcome, DeliveryOutcome::RetryAt(now() + chrono::Duration::seconds(2)));
        assert_eq!(msg.delivery_attempts, 1);
        assert_eq!(msg.delivery_status, DeliveryStatus::Pending);
        assert_eq!(msg.last_attempt, Some(now()));
        assert_eq!(msg.error_message.as_deref(), Some("hub timeout"));
    }

    #[test]
    fn two_failures_then_success() {
        let policy = DeliveryPolicy::default();
        let mut msg = message();
        policy.on_failure(&mut msg, "e", now());
        policy.on_failure(&mut msg, "e", now());
        assert_eq!(policy.on_success(&mut msg, now()), DeliveryOutcome::Delivered);
        assert_eq!(msg.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(msg.delivery_attempts, 2);
        assert!(msg.retry_after.is_none());
    }

    #[test]
    fn fails_only_after_exceeding_max() {
        let policy = DeliveryPolicy::new(3, Duration::from_secs(300));
        let mut msg = message();
        for expected in 1..=3 {
            let outcome = policy.on_failure(&mut msg, "e", now());
            assert!(matches!(outcome, DeliveryOutcome::RetryAt(_)));
            assert_eq!(msg.delivery_attempts, expected);
        }
        assert_eq!(policy.on_failure(&mut msg, "e", now()), DeliveryOutcome::Failed);
        assert_eq!(msg.delivery_status, DeliveryStatus::Failed);
        assert_eq!(msg.delivery_attempts, 4);
        assert!(msg.retry_after.is_none());
    }

    #[test]
    fn fixed_polling_skips_connecting_devices() {
        let policy = FixedPolling::new(Duration::from_secs(5));
        assert_eq!(policy.interval(), Duration::from_secs(5));
        assert!(policy.should_poll(DeviceStatus::Online));
        assert!(policy.should_poll(DeviceStatus::Error));
        assert!(!policy.should_poll(DeviceStatus::Connecting));
        assert!(!policy.should_poll(DeviceStatus::Offline));
    }
}
