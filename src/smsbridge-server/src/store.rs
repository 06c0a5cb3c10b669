// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Persistence for devices, messages and stats snapshots.
//!
//! The store is the system of record; registry and pipeline state is a cache
//! rebuilt from it at startup. Every write is an upsert keyed by a stable id,
//! so repeating a failed write is safe.

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use serde::de::DeserializeOwned;
use serde::Serialize;

use smsbridge_core::{
    DeliveryStatus, Device, DeviceStats, DeviceStatus, GatewayError, GatewayResult, Message,
    MessageSummary,
};

const DEVICE_PREFIX: &str = "dev:";
const MESSAGE_PREFIX: &str = "msg:";
const FINGERPRINT_PREFIX: &str = "fp:";
const STATS_PREFIX: &str = "st:";
const MESSAGE_SEQ: &str = "seq:msg";
const STATS_SEQ: &str = "seq:st";

/// Collaborator interface over the persisted device, message and stats sets.
pub trait Store: Send + Sync {
    /// Insert or replace a device record.
    fn save_device(&self, device: &Device) -> GatewayResult<()>;

    fn load_devices(&self) -> GatewayResult<Vec<Device>>;

    fn get_device(&self, device_id: &str) -> GatewayResult<Option<Device>>;

    fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        error: Option<&str>,
    ) -> GatewayResult<()>;

    /// Returns false when no record existed.
    fn delete_device(&self, device_id: &str) -> GatewayResult<bool>;

    /// Persist a new message and assign its id.
    ///
    /// A message whose fingerprint is already stored keeps the existing id.
    fn save_message(&self, message: &mut Message) -> GatewayResult<u64>;

    fn update_message_delivery(&self, message: &Message) -> GatewayResult<()>;

    fn get_message(&self, id: u64) -> GatewayResult<Option<Message>>;

    fn find_by_fingerprint(&self, fingerprint: &str) -> GatewayResult<Option<u64>>;

    /// Pending messages that are unscheduled or whose `retry_after` is at or
    /// before `now`; unscheduled first, then by due time.
    fn query_pending_retries(&self, now: DateTime<Utc>) -> GatewayResult<Vec<Message>>;

    /// Messages of one device received at or after `since`, oldest first.
    fn messages_for_device(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<Message>>;

    /// Drop delivered messages received before `cutoff`. Returns how many went.
    fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize>;

    fn append_stats(&self, stats: &DeviceStats) -> GatewayResult<()>;

    /// Drop stats snapshots taken before `cutoff`. Returns how many went.
    fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize>;

    /// Snapshots within `window` of now, newest first.
    fn get_device_stats(
        &self,
        device_id: &str,
        window: chrono::Duration,
    ) -> GatewayResult<Vec<DeviceStats>>;

    fn message_summary(
        &self,
        device_id: &str,
        window: chrono::Duration,
    ) -> GatewayResult<MessageSummary> {
        let messages = self.messages_for_device(device_id, Utc::now() - window)?;
        Ok(summarize(&messages))
    }
}

/// Aggregate a set of messages.
pub fn summarize(messages: &[Message]) -> MessageSummary {
    let mut summary = MessageSummary::default();
    let mut attempts: u64 = 0;
    for message in messages {
        summary.total += 1;
        match message.delivery_status {
            DeliveryStatus::Delivered => summary.delivered += 1,
            DeliveryStatus::Failed => summary.failed += 1,
            DeliveryStatus::Pending => summary.pending += 1,
        }
        attempts += u64::from(message.delivery_attempts);
        summary.last_received = summary.last_received.max(Some(message.received_at));
    }
    if summary.total > 0 {
        summary.average_attempts = attempts as f64 / summary.total as f64;
    }
    summary
}

/// Store backed by a single pickledb JSON file.
pub struct PickleStore {
    db: Arc<RwLock<PickleDb>>,
}

impl PickleStore {
    /// Open the store at `path`, creating it only when no file exists.
    ///
    /// An unreadable or corrupt file is an error; it is never replaced.
    pub fn open(path: &Path) -> GatewayResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::storage(format!("create {}: {e}", parent.display()))
            })?;
        }
        let db = if path.exists() {
            PickleDb::load(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
                .map_err(|e| GatewayError::storage(format!("load {}: {e}", path.display())))?
        } else {
            PickleDb::new(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
        };
        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PickleDb> {
        self.db.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PickleDb> {
        self.db.write().unwrap_or_else(|e| e.into_inner())
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Vec<T> {
        let db = self.read();
        db.iter()
            .filter_map(|kv| {
                if kv.get_key().starts_with(prefix) {
                    kv.get_value::<T>()
                } else {
                    None
                }
            })
            .collect()
    }
}

fn set<V: Serialize>(db: &mut PickleDb, key: &str, value: &V) -> GatewayResult<()> {
    db.set(key, value)
        .map_err(|e| GatewayError::storage(format!("write {key}: {e}")))
}

fn next_seq(db: &mut PickleDb, key: &str) -> GatewayResult<u64> {
    let next = db.get::<u64>(key).unwrap_or(0) + 1;
    set(db, key, &next)?;
    Ok(next)
}

fn device_key(id: &str) -> String {
    format!("{DEVICE_PREFIX}{id}")
}

fn message_key(id: u64) -> String {
    format!("{MESSAGE_PREFIX}{id:020}")
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("{FINGERPRINT_PREFIX}{fingerprint}")
}

impl Store for PickleStore {
    fn save_device(&self, device: &Device) -> GatewayResult<()> {
        let mut db = self.write();
        set(&mut db, &device_key(&device.id), device)
    }

    fn load_devices(&self) -> GatewayResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.scan(DEVICE_PREFIX);
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    fn get_device(&self, device_id: &str) -> GatewayResult<Option<Device>> {
        Ok(self.read().get::<Device>(&device_key(device_id)))
    }

    fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        error: Option<&str>,
    ) -> GatewayResult<()> {
        let mut db = self.write();
        let key = device_key(device_id);
        let mut device = db
            .get::<Device>(&key)
            .ok_or_else(|| GatewayError::NotFound(device_id.to_string()))?;
        device.status = status;
        device.error_message = error.map(str::to_string);
        set(&mut db, &key, &device)
    }

    fn delete_device(&self, device_id: &str) -> GatewayResult<bool> {
        let mut db = self.write();
        db.rem(&device_key(device_id))
            .map_err(|e| GatewayError::storage(e.to_string()))
    }

    fn save_message(&self, message: &mut Message) -> GatewayResult<u64> {
        let mut db = self.write();
        let fp_key = fingerprint_key(&message.fingerprint());
        if let Some(id) = db.get::<u64>(&fp_key) {
            if db.exists(&message_key(id)) {
                message.id = id;
                return Ok(id);
            }
        }
        let id = next_seq(&mut db, MESSAGE_SEQ)?;
        message.id = id;
        set(&mut db, &message_key(id), &*message)?;
        set(&mut db, &fp_key, &id)?;
        Ok(id)
    }

    fn update_message_delivery(&self, message: &Message) -> GatewayResult<()> {
        let mut db = self.write();
        let key = message_key(message.id);
        if !db.exists(&key) {
            return Err(GatewayError::NotFound(format!("message {}", message.id)));
        }
        set(&mut db, &key, message)
    }

    fn get_message(&self, id: u64) -> GatewayResult<Option<Message>> {
        Ok(self.read().get::<Message>(&message_key(id)))
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> GatewayResult<Option<u64>> {
        Ok(self.read().get::<u64>(&fingerprint_key(fingerprint)))
    }

    fn query_pending_retries(&self, now: DateTime<Utc>) -> GatewayResult<Vec<Message>> {
        let mut due: Vec<Message> = self
            .scan::<Message>(MESSAGE_PREFIX)
            .into_iter()
            .filter(|m| m.is_retry_due(now))
            .collect();
        due.sort_by_key(|m| (m.retry_after, m.id));
        Ok(due)
    }

    fn messages_for_device(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .scan::<Message>(MESSAGE_PREFIX)
            .into_iter()
            .filter(|m| m.device_id == device_id && m.received_at >= since)
            .collect();
        messages.sort_by_key(|m| (m.received_at, m.id));
        Ok(messages)
    }

    fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize> {
        let expired: Vec<Message> = self
            .scan::<Message>(MESSAGE_PREFIX)
            .into_iter()
            .filter(|m| m.delivery_status == DeliveryStatus::Delivered && m.received_at < cutoff)
            .collect();
        let mut db = self.write();
        for message in &expired {
            db.rem(&message_key(message.id))
                .map_err(|e| GatewayError::storage(e.to_string()))?;
            db.rem(&fingerprint_key(&message.fingerprint()))
                .map_err(|e| GatewayError::storage(e.to_string()))?;
        }
        Ok(expired.len())
    }

    fn append_stats(&self, stats: &DeviceStats) -> GatewayResult<()> {
        let mut db = self.write();
        let seq = next_seq(&mut db, STATS_SEQ)?;
        let key = format!("{STATS_PREFIX}{}:{seq:020}", stats.device_id);
        set(&mut db, &key, stats)
    }

    fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize> {
        let expired: Vec<String> = {
            let db = self.read();
            db.iter()
                .filter(|kv| kv.get_key().starts_with(STATS_PREFIX))
                .filter(|kv| {
                    kv.get_value::<DeviceStats>()
                        .map(|s| s.timestamp < cutoff)
                        .unwrap_or(false)
                })
                .map(|kv| kv.get_key().to_string())
                .collect()
        };
        let mut db = self.write();
        for key in &expired {
            db.rem(key)
                .map_err(|e| GatewayError::storage(e.to_string()))?;
        }
        Ok(expired.len())
    }

    fn get_device_stats(
        &self,
        device_id: &str,
        window: chrono::Duration,
    ) -> GatewayResult<Vec<DeviceStats>> {
        let since = Utc::now() - window;
        let prefix = format!("{STATS_PREFIX}{device_id}:");
        let db = self.read();
        let mut rows: Vec<(String, DeviceStats)> = db
            .iter()
            .filter_map(|kv| {
                let key = kv.get_key();
                if !key.starts_with(&prefix) {
                    return None;
                }
                kv.get_value::<DeviceStats>().map(|s| (key.to_string(), s))
            })
            .filter(|(_, s)| s.timestamp >= since)
            .collect();
        // Zero-padded sequence keys keep insertion order for equal timestamps.
        rows.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then(b.0.cmp(&a.0)));
        Ok(rows.into_iter().map(|(_, s)| s).collect())
    }
}

/// Read-through cache of the device list in front of another store.
///
/// Any device write drops the cached list; all other calls pass through.
pub struct CachedStore<S> {
    inner: S,
    devices: RwLock<Option<Vec<Device>>>,
}

impl<S: Store> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            devices: RwLock::new(None),
        }
    }

    pub fn invalidate(&self) {
        *self.devices.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn is_cached(&self) -> bool {
        self.devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl<S: Store> Store for CachedStore<S> {
    fn save_device(&self, device: &Device) -> GatewayResult<()> {
        let result = self.inner.save_device(device);
        self.invalidate();
        result
    }

    fn load_devices(&self) -> GatewayResult<Vec<Device>> {
        if let Some(devices) = self
            .devices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(devices.clone());
        }
        let devices = self.inner.load_devices()?;
        *self.devices.write().unwrap_or_else(|e| e.into_inner()) = Some(devices.clone());
        Ok(devices)
    }

    fn get_device(&self, device_id: &str) -> GatewayResult<Option<Device>> {
        if self.is_cached() {
            return Ok(self
                .load_devices()?
                .into_iter()
                .find(|d| d.id == device_id));
        }
        self.inner.get_device(device_id)
    }

    fn update_device_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
        error: Option<&str>,
    ) -> GatewayResult<()> {
        let result = self.inner.update_device_status(device_id, status, error);
        self.invalidate();
        result
    }

    fn delete_device(&self, device_id: &str) -> GatewayResult<bool> {
        let result = self.inner.delete_device(device_id);
        self.invalidate();
        result
    }

    fn save_message(&self, message: &mut Message) -> GatewayResult<u64> {
        self.inner.save_message(message)
    }

    fn update_message_delivery(&self, message: &Message) -> GatewayResult<()> {
        self.inner.update_message_delivery(message)
    }

    fn get_message(&self, id: u64) -> GatewayResult<Option<Message>> {
        self.inner.get_message(id)
    }

    fn find_by_fingerprint(&self, fingerprint: &str) -> GatewayResult<Option<u64>> {
        self.inner.find_by_fingerprint(fingerprint)
    }

    fn query_pending_retries(&self, now: DateTime<Utc>) -> GatewayResult<Vec<Message>> {
        self.inner.query_pending_retries(now)
    }

    fn messages_for_device(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<Message>> {
        self.inner.messages_for_device(device_id, since)
    }

    fn delete_delivered_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize> {
        self.inner.delete_delivered_before(cutoff)
    }

    fn append_stats(&self, stats: &DeviceStats) -> GatewayResult<()> {
        self.inner.append_stats(stats)
    }

    fn delete_stats_before(&self, cutoff: DateTime<Utc>) -> GatewayResult<usize> {
        self.inner.delete_stats_before(cutoff)
    }

    fn get_device_stats(
        &self,
        device_id: &str,
        window: chrono::Duration,
    ) -> GatewayResult<Vec<DeviceStats>> {
        self.inner.get_device_stats(device_id, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use smsbridge_core::{DeviceFamily, InboundMessage};

    fn open() -> (tempfile::TempDir, PickleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PickleStore::open(&dir.path().join("gateway.db")).unwrap();
        (dir, store)
    }

    fn inbound(from: &str, text: &str, at: DateTime<Utc>) -> Message {
        Message::from_inbound(
            "d1",
            &InboundMessage {
                origin_ref: "1".into(),
                from_number: from.into(),
                to_number: "+100".into(),
                text: text.into(),
                received_at: Some(at),
            },
            at,
        )
    }

    #[test]
    fn devices_round_trip_and_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gateway.db");
        {
            let store = PickleStore::open(&path).unwrap();
            let device = Device::new("m1", DeviceFamily::AtSerial, "+1", "/dev/ttyUSB0")
                .with_config("vendor", "huawei");
            store.save_device(&device).unwrap();
            store
                .update_device_status("m1", DeviceStatus::Error, Some("no sim"))
                .unwrap();
        }
        let store = PickleStore::open(&path).unwrap();
        let devices = store.load_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].status, DeviceStatus::Error);
        assert_eq!(devices[0].error_message.as_deref(), Some("no sim"));
        assert_eq!(devices[0].config_value("vendor"), Some("huawei"));
        assert!(store.delete_device("m1").unwrap());
        assert!(!store.delete_device("m1").unwrap());
    }

    #[test]
    fn status_update_of_unknown_device_is_not_found() {
        let (_dir, store) = open();
        let err = store
            .update_device_status("ghost", DeviceStatus::Online, None)
            .unwrap_err();
        assert_eq!(err, GatewayError::NotFound("ghost".into()));
    }

    #[test]
    fn save_message_assigns_ids_and_is_idempotent() {
        let (_dir, store) = open();
        let now = Utc::now();
        let mut a = inbound("+200", "one", now);
        let mut b = inbound("+200", "two", now);
        assert_eq!(store.save_message(&mut a).unwrap(), 1);
        assert_eq!(store.save_message(&mut b).unwrap(), 2);

        let mut again = inbound("+200", "one", now);
        assert_eq!(store.save_message(&mut again).unwrap(), 1);
        assert_eq!(store.find_by_fingerprint(&a.fingerprint()).unwrap(), Some(1));
        assert_eq!(store.messages_for_device("d1", now - Duration::hours(1)).unwrap().len(), 2);
    }

    #[test]
    fn pending_retries_are_selected_by_due_time() {
        let (_dir, store) = open();
        let now = Utc::now();
        let mut due = inbound("+1", "due", now);
        let mut later = inbound("+1", "later", now);
        let mut fresh = inbound("+1", "fresh", now);
        for m in [&mut due, &mut later, &mut fresh] {
            store.save_message(m).unwrap();
        }
        due.retry_after = Some(now - Duration::seconds(1));
        later.retry_after = Some(now + Duration::seconds(60));
        store.update_message_delivery(&due).unwrap();
        store.update_message_delivery(&later).unwrap();

        // Never scheduled, e.g. stored right before a crash.
        let picked = store.query_pending_retries(now).unwrap();
        let texts: Vec<_> = picked.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["fresh", "due"]);

        for m in [&mut due, &mut fresh] {
            m.delivery_status = DeliveryStatus::Failed;
            m.retry_after = None;
            store.update_message_delivery(m).unwrap();
        }
        assert!(store.query_pending_retries(now).unwrap().is_empty());
    }

    #[test]
    fn update_of_unsaved_message_is_not_found() {
        let (_dir, store) = open();
        let mut m = inbound("+1", "x", Utc::now());
        m.id = 42;
        assert!(matches!(
            store.update_message_delivery(&m),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn retention_drops_only_old_delivered_messages() {
        let (_dir, store) = open();
        let now = Utc::now();
        let mut old_delivered = inbound("+1", "a", now - Duration::days(40));
        let mut old_pending = inbound("+1", "b", now - Duration::days(40));
        let mut new_delivered = inbound("+1", "c", now);
        for m in [&mut old_delivered, &mut old_pending, &mut new_delivered] {
            store.save_message(m).unwrap();
        }
        old_delivered.delivery_status = DeliveryStatus::Delivered;
        new_delivered.delivery_status = DeliveryStatus::Delivered;
        store.update_message_delivery(&old_delivered).unwrap();
        store.update_message_delivery(&new_delivered).unwrap();

        let removed = store.delete_delivered_before(now - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_message(old_delivered.id).unwrap().is_none());
        assert!(store.get_message(old_pending.id).unwrap().is_some());
        assert!(store
            .find_by_fingerprint(&old_delivered.fingerprint())
            .unwrap()
            .is_none());
    }

    #[test]
    fn stats_are_windowed_and_newest_first() {
        let (_dir, store) = open();
        let device = Device::new("d1", DeviceFamily::Dummy, "+1", "mem");
        let mut old = DeviceStats::snapshot(&device, 0, 0);
        old.timestamp = Utc::now() - Duration::hours(48);
        store.append_stats(&old).unwrap();
        let first = DeviceStats::snapshot(&device, 1, 0);
        store.append_stats(&first).unwrap();
        let mut second = DeviceStats::snapshot(&device, 2, 0);
        second.timestamp = first.timestamp + Duration::seconds(5);
        store.append_stats(&second).unwrap();
        let other = Device::new("d2", DeviceFamily::Dummy, "+2", "mem");
        store.append_stats(&DeviceStats::snapshot(&other, 9, 9)).unwrap();

        let stats = store.get_device_stats("d1", Duration::hours(24)).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].messages_received, 2);
        assert_eq!(stats[1].messages_received, 1);
    }

    #[test]
    fn old_stats_are_pruned() {
        let (_dir, store) = open();
        let device = Device::new("d1", DeviceFamily::Dummy, "+1", "mem");
        let now = Utc::now();
        for hours in [200, 170, 1] {
            let mut row = DeviceStats::snapshot(&device, hours, 0);
            row.timestamp = now - Duration::hours(hours as i64);
            store.append_stats(&row).unwrap();
        }
        let cached = CachedStore::new(store);
        assert_eq!(cached.delete_stats_before(now - Duration::hours(168)).unwrap(), 2);
        let left = cached.get_device_stats("d1", Duration::days(30)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].messages_received, 1);
        assert_eq!(cached.delete_stats_before(now - Duration::hours(168)).unwrap(), 0);
    }

    #[test]
    fn corrupt_database_is_an_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.db");
        std::fs::write(&path, b"{not json at all").unwrap();
        assert!(matches!(PickleStore::open(&path), Err(GatewayError::Storage(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"{not json at all");
    }

    #[test]
    fn summary_counts_by_status() {
        let now = Utc::now();
        let mut a = inbound("+1", "a", now - Duration::minutes(2));
        a.delivery_status = DeliveryStatus::Delivered;
        a.delivery_attempts = 2;
        let mut b = inbound("+1", "b", now);
        b.delivery_status = DeliveryStatus::Failed;
        b.delivery_attempts = 4;
        let c = inbound("+1", "c", now - Duration::minutes(1));
        let summary = summarize(&[a, b, c]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert!((summary.average_attempts - 2.0).abs() < f64::EPSILON);
        assert_eq!(summary.last_received, Some(now));
        assert_eq!(summarize(&[]), MessageSummary::default());
    }

    #[test]
    fn cache_is_invalidated_on_device_writes() {
        let (_dir, inner) = open();
        let store = CachedStore::new(inner);
        assert!(store.load_devices().unwrap().is_empty());
        store
            .save_device(&Device::new("a", DeviceFamily::Dummy, "+1", "mem"))
            .unwrap();
        assert_eq!(store.load_devices().unwrap().len(), 1);
        store
            .update_device_status("a", DeviceStatus::Online, None)
            .unwrap();
        assert_eq!(
            store.get_device("a").unwrap().map(|d| d.status),
            Some(DeviceStatus::Online)
        );
        store.delete_device("a").unwrap();
        assert!(store.load_devices().unwrap().is_empty());
    }
}
