// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device registry and per-device tasks.
//!
//! Every device gets one task owning its manager (and with it the transport
//! handle). Requests reach the task over an mpsc channel and are executed one
//! at a time, so exchanges on one transport never interleave while different
//! devices run in parallel. The latest device record is published on a
//! `watch` channel for cheap reads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use smsbridge_backend::{FamilyDefaults, RegistrationContext};
use smsbridge_core::controller::{DeviceEvent, DeviceStateMachine, EventEmitter};
use smsbridge_core::{
    AuxCommand, AuxOutput, Device, DeviceManager, DeviceStatus, GatewayError, GatewayResult,
    InboundMessage,
};

use crate::store::Store;

const DEVICE_TASK_CHANNEL_BUFFER: usize = 32;
/// Extra time granted to a device task after its transport timeout on removal.
const REMOVE_GRACE: Duration = Duration::from_millis(500);
const SLOW_OPERATION: Duration = Duration::from_secs(2);

/// Operations executed by a device task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Poll,
    ListMessages,
    Signal,
    Acknowledge(String),
    Send { to: String, text: String },
    Auxiliary(AuxCommand),
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::ListMessages => "list_messages",
            Self::Signal => "get_signal",
            Self::Acknowledge(_) => "acknowledge",
            Self::Send { .. } => "send",
            Self::Auxiliary(cmd) => cmd.name(),
        }
    }
}

#[derive(Debug)]
pub enum DeviceReply {
    Polled(Device),
    Messages(Vec<InboundMessage>),
    Signal(Option<u8>),
    Done,
    Aux(AuxOutput),
}

pub struct DeviceRequest {
    pub cmd: DeviceCommand,
    pub respond_to: oneshot::Sender<GatewayResult<DeviceReply>>,
}

/// Registry-side view of one running device task.
struct DeviceHandle {
    tx: mpsc::Sender<DeviceRequest>,
    state_rx: watch::Receiver<Device>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    transport_timeout: Duration,
}

/// Owns the live device set.
pub struct Registry {
    context: Arc<RegistrationContext>,
    defaults: FamilyDefaults,
    store: Arc<dyn Store>,
    emitter: Arc<EventEmitter>,
    devices: RwLock<HashMap<String, DeviceHandle>>,
}

impl Registry {
    pub fn new(
        context: Arc<RegistrationContext>,
        defaults: FamilyDefaults,
        store: Arc<dyn Store>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            context,
            defaults,
            store,
            emitter,
            devices: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceHandle>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceHandle>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a device, building its manager from the family tag.
    ///
    /// The record is stored as `connecting` and initialisation runs in the
    /// background.
    pub fn add(&self, device: Device) -> GatewayResult<Device> {
        if self.contains(&device.id) {
            return Err(GatewayError::DuplicateDevice(device.id));
        }
        let manager = self.context.build_manager(device.clone(), &self.defaults)?;
        self.add_with_manager(device, manager)
    }

    /// Add a device driven by a caller-supplied manager.
    pub fn add_with_manager(
        &self,
        mut device: Device,
        manager: Box<dyn DeviceManager>,
    ) -> GatewayResult<Device> {
        if self.contains(&device.id) {
            return Err(GatewayError::DuplicateDevice(device.id));
        }

        let mut machine = DeviceStateMachine::new();
        let old = machine.state();
        machine.process_event(DeviceEvent::Connect);
        device.status = machine.state();
        device.error_message = None;
        device.signal_strength = None;
        device.signal_details.clear();
        // File I/O stays outside the map lock.
        self.store.save_device(&device)?;

        let raced = {
            let mut devices = self.write();
            let existing = devices
                .get(&device.id)
                .map(|h| h.state_rx.borrow().clone());
            match existing {
                Some(existing) => Some(existing),
                None => {
                    let (tx, rx) = mpsc::channel(DEVICE_TASK_CHANNEL_BUFFER);
                    let (state_tx, state_rx) = watch::channel(device.clone());
                    let (shutdown_tx, shutdown_rx) = watch::channel(false);
                    let transport_timeout = manager.transport_timeout();

                    self.emitter.notify_device_added(&device);
                    self.emitter
                        .notify_state_change(&device.id, old, device.status, None);

                    let task = DeviceTask {
                        manager,
                        device: device.clone(),
                        machine,
                        initialized: false,
                        store: self.store.clone(),
                        emitter: self.emitter.clone(),
                        state_tx,
                    };
                    let task = tokio::spawn(task.run(rx, shutdown_rx));
                    devices.insert(
                        device.id.clone(),
                        DeviceHandle {
                            tx,
                            state_rx,
                            shutdown_tx,
                            task,
                            transport_timeout,
                        },
                    );
                    None
                }
            }
        };
        if let Some(existing) = raced {
            // A concurrent add of the same id won; keep its record.
            if let Err(e) = self.store.save_device(&existing) {
                warn!("[{}] failed to restore record: {}", existing.id, e);
            }
            return Err(GatewayError::DuplicateDevice(device.id));
        }
        info!("[{}] added ({}, {})", device.id, device.family, device.phone_number);
        Ok(device)
    }

    /// Tear a device down and delete its record.
    ///
    /// An in-flight exchange gets the transport timeout plus a short grace
    /// period to finish; after that the task is aborted, which drops the
    /// manager and closes its transport.
    pub async fn remove(&self, device_id: &str) -> GatewayResult<()> {
        let handle = self
            .write()
            .remove(device_id)
            .ok_or_else(|| GatewayError::NotFound(device_id.to_string()))?;
        let old = handle.state_rx.borrow().status;
        stop_task(device_id, handle).await;
        self.store.delete_device(device_id)?;
        self.emitter
            .notify_state_change(device_id, old, DeviceStatus::Offline, None);
        self.emitter.notify_device_removed(device_id);
        info!("[{}] removed", device_id);
        Ok(())
    }

    /// Stop every device task. Persisted records are left untouched.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, DeviceHandle)> = self.write().drain().collect();
        for (_, handle) in &handles {
            let _ = handle.shutdown_tx.send(true);
        }
        for (id, handle) in handles {
            stop_task(&id, handle).await;
        }
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.read().contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Latest published record of a device.
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.read()
            .get(device_id)
            .map(|h| h.state_rx.borrow().clone())
    }

    /// All live devices, sorted by id.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .read()
            .values()
            .map(|h| h.state_rx.borrow().clone())
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Follow state changes of one device.
    pub fn subscribe(&self, device_id: &str) -> Option<watch::Receiver<Device>> {
        self.read().get(device_id).map(|h| h.state_rx.clone())
    }

    /// Status and signal poll; re-initialises a device whose init failed.
    pub async fn poll(&self, device_id: &str) -> GatewayResult<Device> {
        match self.request(device_id, DeviceCommand::Poll).await? {
            DeviceReply::Polled(device) => Ok(device),
            other => Err(unexpected(device_id, &other)),
        }
    }

    pub async fn list_messages(&self, device_id: &str) -> GatewayResult<Vec<InboundMessage>> {
        match self.request(device_id, DeviceCommand::ListMessages).await? {
            DeviceReply::Messages(messages) => Ok(messages),
            other => Err(unexpected(device_id, &other)),
        }
    }

    /// Current signal strength in percent; `None` when the family has none.
    pub async fn get_signal(&self, device_id: &str) -> GatewayResult<Option<u8>> {
        match self.request(device_id, DeviceCommand::Signal).await? {
            DeviceReply::Signal(signal) => Ok(signal),
            other => Err(unexpected(device_id, &other)),
        }
    }

    pub async fn acknowledge(&self, device_id: &str, origin_ref: &str) -> GatewayResult<()> {
        self.request(device_id, DeviceCommand::Acknowledge(origin_ref.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn send(&self, device_id: &str, to: &str, text: &str) -> GatewayResult<()> {
        let cmd = DeviceCommand::Send {
            to: to.to_string(),
            text: text.to_string(),
        };
        self.request(device_id, cmd).await.map(|_| ())
    }

    pub async fn auxiliary(&self, device_id: &str, command: AuxCommand) -> GatewayResult<AuxOutput> {
        match self
            .request(device_id, DeviceCommand::Auxiliary(command))
            .await?
        {
            DeviceReply::Aux(output) => Ok(output),
            other => Err(unexpected(device_id, &other)),
        }
    }

    async fn request(&self, device_id: &str, cmd: DeviceCommand) -> GatewayResult<DeviceReply> {
        let tx = self
            .read()
            .get(device_id)
            .map(|h| h.tx.clone())
            .ok_or_else(|| GatewayError::NotFound(device_id.to_string()))?;
        let (respond_to, reply) = oneshot::channel();
        tx.send(DeviceRequest { cmd, respond_to })
            .await
            .map_err(|_| GatewayError::Shutdown(device_id.to_string()))?;
        reply
            .await
            .map_err(|_| GatewayError::Shutdown(device_id.to_string()))?
    }
}

fn unexpected(device_id: &str, reply: &DeviceReply) -> GatewayError {
    GatewayError::protocol(format!("[{device_id}] unexpected reply {reply:?}"))
}

async fn stop_task(device_id: &str, handle: DeviceHandle) {
    let budget = handle.transport_timeout + REMOVE_GRACE;
    let DeviceHandle {
        mut task,
        shutdown_tx,
        ..
    } = handle;
    let _ = shutdown_tx.send(true);
    if time::timeout(budget, &mut task).await.is_err() {
        warn!("[{}] teardown exceeded {:?}, aborting task", device_id, budget);
        task.abort();
        let _ = task.await;
    }
}

/// State owned by one device task.
struct DeviceTask {
    manager: Box<dyn DeviceManager>,
    device: Device,
    machine: DeviceStateMachine,
    initialized: bool,
    store: Arc<dyn Store>,
    emitter: Arc<EventEmitter>,
    state_tx: watch::Sender<Device>,
}

impl DeviceTask {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<DeviceRequest>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let _ = self.initialize().await;

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                maybe_req = rx.recv() => {
                    let Some(DeviceRequest { cmd, respond_to }) = maybe_req else {
                        break;
                    };
                    let label = cmd.name();
                    let started = Instant::now();
                    let result = self.process(cmd).await;
                    let _ = respond_to.send(result);

                    let elapsed = started.elapsed();
                    if elapsed > SLOW_OPERATION {
                        warn!("[{}] {} took {:?}", self.device.id, label, elapsed);
                    } else {
                        debug!("[{}] {} completed in {:?}", self.device.id, label, elapsed);
                    }
                }
            }
        }

        self.manager.cleanup().await;
        debug!("[{}] device task stopped", self.device.id);
    }

    async fn process(&mut self, cmd: DeviceCommand) -> GatewayResult<DeviceReply> {
        match cmd {
            DeviceCommand::Poll => self.poll().await.map(DeviceReply::Polled),
            DeviceCommand::ListMessages => {
                self.ensure_ready()?;
                self.manager
                    .list_new_messages()
                    .await
                    .map(DeviceReply::Messages)
            }
            DeviceCommand::Signal => {
                self.ensure_ready()?;
                self.manager.get_signal().await.map(DeviceReply::Signal)
            }
            DeviceCommand::Acknowledge(origin_ref) => {
                self.ensure_ready()?;
                self.manager
                    .acknowledge_message(&origin_ref)
                    .await
                    .map(|_| DeviceReply::Done)
            }
            DeviceCommand::Send { to, text } => {
                self.ensure_ready()?;
                match self.manager.send_message(&to, &text).await {
                    Ok(()) => {
                        self.device.touch();
                        self.publish();
                        Ok(DeviceReply::Done)
                    }
                    Err(e) => {
                        warn!("[{}] send to {} failed: {}", self.device.id, to, e);
                        self.transition(DeviceEvent::SendFailed(e.to_string()));
                        Err(e)
                    }
                }
            }
            DeviceCommand::Auxiliary(command) => {
                self.ensure_ready()?;
                self.manager.auxiliary(command).await.map(DeviceReply::Aux)
            }
        }
    }

    fn ensure_ready(&self) -> GatewayResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(GatewayError::connection(format!(
                "device {} is not initialized",
                self.device.id
            )))
        }
    }

    async fn initialize(&mut self) -> GatewayResult<()> {
        info!(
            "[{}] initializing {} at {}",
            self.device.id, self.device.family, self.device.transport_address
        );
        match self.manager.initialize().await {
            Ok(report) => {
                self.initialized = true;
                if report.sim_identifier.is_some() {
                    self.device.sim_identifier = report.sim_identifier;
                }
                if report.model.is_some() {
                    self.device.model = report.model;
                }
                self.device.touch();
                self.transition(DeviceEvent::Initialized);
                self.save();
                Ok(())
            }
            Err(e) => {
                error!("[{}] initialization failed: {}", self.device.id, e);
                self.initialized = false;
                self.manager.cleanup().await;
                self.transition(DeviceEvent::InitFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn poll(&mut self) -> GatewayResult<Device> {
        if !self.initialized {
            self.initialize().await?;
        }

        let status = match self.manager.poll_status().await {
            Ok(DeviceStatus::Online) => Ok(()),
            Ok(other) => Err(GatewayError::protocol(format!("device reports {other}"))),
            Err(e) => Err(e),
        };
        if let Err(e) = status {
            warn!("[{}] poll failed: {}", self.device.id, e);
            self.transition(DeviceEvent::PollFailed(e.to_string()));
            return Err(e);
        }

        match self.manager.get_signal().await {
            Ok(signal) => {
                let changed = signal != self.device.signal_strength;
                self.device.signal_strength = signal;
                self.device.signal_details = self.manager.signal_details();
                if changed {
                    self.emitter.notify_signal_update(&self.device.id, signal);
                }
            }
            Err(e) => warn!("[{}] signal read failed: {}", self.device.id, e),
        }
        self.device.touch();
        self.transition(DeviceEvent::PollSucceeded);
        self.save();
        Ok(self.device.clone())
    }

    fn transition(&mut self, event: DeviceEvent) {
        let old = self.machine.state();
        let changed = self.machine.process_event(event);
        let new = self.machine.state();
        self.device.status = new;
        self.device.error_message = self.machine.error().map(str::to_string);
        if changed {
            if let Err(e) = self.store.update_device_status(
                &self.device.id,
                new,
                self.device.error_message.as_deref(),
            ) {
                warn!("[{}] failed to persist status: {}", self.device.id, e);
            }
            self.emitter
                .notify_state_change(&self.device.id, old, new, self.machine.error());
        }
        self.publish();
    }

    fn save(&self) {
        if let Err(e) = self.store.save_device(&self.device) {
            warn!("[{}] failed to persist device: {}", self.device.id, e);
        }
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.device.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use smsbridge_backend::{register_builtin_families_on, DummyControl, DummyManager};
    use smsbridge_core::controller::GatewayListener;
    use chrono::{DateTime, Utc};
    use smsbridge_core::{BoxFuture, DeviceFamily, DeviceStats, InitReport, Message};

    use crate::store::PickleStore;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl GatewayListener for Recorder {
        fn on_device_removed(&self, device_id: &str) {
            self.events.lock().unwrap().push(format!("removed {device_id}"));
        }

        fn on_state_change(
            &self,
            device_id: &str,
            old: DeviceStatus,
            new: DeviceStatus,
            _reason: Option<&str>,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{device_id} {old}->{new}"));
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<PickleStore>,
        recorder: Arc<Recorder>,
        registry: Registry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PickleStore::open(&dir.path().join("gateway.db")).unwrap());
        let mut ctx = RegistrationContext::new();
        register_builtin_families_on(&mut ctx);
        let emitter = Arc::new(EventEmitter::new());
        let recorder = Arc::new(Recorder::default());
        emitter.register(recorder.clone());
        let registry = Registry::new(
            Arc::new(ctx),
            FamilyDefaults::default(),
            store.clone(),
            emitter,
        );
        Fixture {
            _dir: dir,
            store,
            recorder,
            registry,
        }
    }

    fn dummy(id: &str) -> Device {
        Device::new(id, DeviceFamily::Dummy, "+15550001", "mem")
    }

    fn add_dummy(registry: &Registry, device: Device) -> DummyControl {
        let manager = DummyManager::new(device.clone());
        let control = manager.control();
        registry.add_with_manager(device, Box::new(manager)).unwrap();
        control
    }

    async fn wait_status(registry: &Registry, id: &str, status: DeviceStatus) {
        let mut rx = registry.subscribe(id).unwrap();
        let _ = rx.wait_for(|d| d.status == status).await.unwrap();
    }

    #[derive(Default)]
    struct ExchangeMeter {
        active: AtomicUsize,
        max_active: AtomicUsize,
        exchanges: AtomicUsize,
    }

    /// Records how many exchanges overlap on its "transport".
    struct MeteredManager {
        meter: Arc<ExchangeMeter>,
    }

    impl MeteredManager {
        async fn exchange(&self) {
            let now = self.meter.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.meter.max_active.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            self.meter.active.fetch_sub(1, Ordering::SeqCst);
            self.meter.exchanges.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DeviceManager for MeteredManager {
        fn family(&self) -> DeviceFamily {
            DeviceFamily::Dummy
        }

        fn transport_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn initialize<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<InitReport>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(InitReport::default())
            })
        }

        fn poll_status<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<DeviceStatus>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(DeviceStatus::Online)
            })
        }

        fn list_new_messages<'a>(
            &'a mut self,
        ) -> BoxFuture<'a, GatewayResult<Vec<InboundMessage>>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(Vec::new())
            })
        }

        fn acknowledge_message<'a>(
            &'a mut self,
            _origin_ref: &'a str,
        ) -> BoxFuture<'a, GatewayResult<()>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(())
            })
        }

        fn send_message<'a>(
            &'a mut self,
            _to: &'a str,
            _text: &'a str,
        ) -> BoxFuture<'a, GatewayResult<()>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(())
            })
        }

        fn get_signal<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<Option<u8>>> {
            Box::pin(async move {
                self.exchange().await;
                Ok(Some(50))
            })
        }

        fn cleanup<'a>(&'a mut self) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    fn add_metered(registry: &Registry, id: &str) -> Arc<ExchangeMeter> {
        let meter = Arc::new(ExchangeMeter::default());
        registry
            .add_with_manager(
                dummy(id),
                Box::new(MeteredManager {
                    meter: meter.clone(),
                }),
            )
            .unwrap();
        meter
    }

    #[tokio::test]
    async fn add_initializes_in_background() {
        let f = fixture();
        add_dummy(&f.registry, dummy("d1"));
        assert!(f.registry.contains("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;

        let device = f.registry.get("d1").unwrap();
        assert_eq!(device.model.as_deref(), Some("dummy"));
        assert!(device.sim_identifier.is_some());
        let stored = f.store.get_device("d1").unwrap().unwrap();
        assert_eq!(stored.status, DeviceStatus::Online);
        assert_eq!(
            f.recorder.events(),
            vec!["d1 uninitialized->connecting", "d1 connecting->online"]
        );
    }

    #[tokio::test]
    async fn duplicate_and_unsupported_devices_are_rejected() {
        let f = fixture();
        f.registry.add(dummy("d1")).unwrap();
        assert_eq!(
            f.registry.add(dummy("d1")).unwrap_err(),
            GatewayError::DuplicateDevice("d1".into())
        );
        let pager = Device::new("p1", DeviceFamily::from("pager"), "+1", "x");
        assert_eq!(
            f.registry.add(pager).unwrap_err(),
            GatewayError::UnsupportedFamily("pager".into())
        );
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_devices_are_not_found() {
        let f = fixture();
        assert_eq!(
            f.registry.remove("ghost").await.unwrap_err(),
            GatewayError::NotFound("ghost".into())
        );
        assert_eq!(
            f.registry.send("ghost", "+1", "hi").await.unwrap_err(),
            GatewayError::NotFound("ghost".into())
        );
    }

    #[tokio::test]
    async fn failed_init_marks_error_and_poll_reinitializes() {
        let f = fixture();
        let control = add_dummy(&f.registry, dummy("d1").with_config("fail_init", "no SIM"));
        wait_status(&f.registry, "d1", DeviceStatus::Error).await;
        let device = f.registry.get("d1").unwrap();
        assert_eq!(device.error_message.as_deref(), Some("init error: no SIM"));
        assert!(matches!(
            f.registry.list_messages("d1").await,
            Err(GatewayError::Connection(_))
        ));

        assert_eq!(
            f.registry.poll("d1").await.unwrap_err(),
            GatewayError::Init("no SIM".into())
        );
        control.fail_init(None);
        let device = f.registry.poll("d1").await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.error_message, None);
        assert_eq!(device.signal_strength, Some(75));
    }

    #[tokio::test]
    async fn failed_poll_and_send_move_device_to_error() {
        let f = fixture();
        let control = add_dummy(&f.registry, dummy("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;

        control.fail_poll(Some("no answer"));
        assert!(f.registry.poll("d1").await.unwrap_err().is_transient());
        assert_eq!(f.registry.get("d1").unwrap().status, DeviceStatus::Error);

        control.fail_poll(None);
        assert_eq!(
            f.registry.poll("d1").await.unwrap().status,
            DeviceStatus::Online
        );

        control.fail_send(Some("no carrier"));
        assert_eq!(
            f.registry.send("d1", "+2", "hi").await.unwrap_err(),
            GatewayError::Send("no carrier".into())
        );
        let device = f.registry.get("d1").unwrap();
        assert_eq!(device.status, DeviceStatus::Error);
        assert_eq!(device.error_message.as_deref(), Some("send error: no carrier"));
    }

    #[tokio::test]
    async fn messages_list_and_acknowledge() {
        let f = fixture();
        let control = add_dummy(&f.registry, dummy("d1"));
        let origin_ref = control.deliver("+48111", "hello");
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;

        let messages = f.registry.list_messages("d1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");
        f.registry.acknowledge("d1", &origin_ref).await.unwrap();
        assert_eq!(control.inbox_len(), 0);
    }

    #[tokio::test]
    async fn signal_is_read_without_touching_status() {
        let f = fixture();
        let control = add_dummy(&f.registry, dummy("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;

        control.set_signal(Some(64));
        assert_eq!(f.registry.get_signal("d1").await.unwrap(), Some(64));
        control.set_signal(None);
        assert_eq!(f.registry.get_signal("d1").await.unwrap(), None);
        assert_eq!(f.registry.get("d1").unwrap().status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn auxiliary_errors_leave_status_alone() {
        let f = fixture();
        add_dummy(&f.registry, dummy("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;
        assert!(matches!(
            f.registry.auxiliary("d1", AuxCommand::Temperature).await,
            Err(GatewayError::NotSupported(_))
        ));
        assert_eq!(f.registry.get("d1").unwrap().status, DeviceStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn operations_on_one_device_never_overlap() {
        let f = fixture();
        let meter = add_metered(&f.registry, "p1");
        let (a, b, c, d) = tokio::join!(
            f.registry.poll("p1"),
            f.registry.send("p1", "+2", "hi"),
            f.registry.list_messages("p1"),
            f.registry.acknowledge("p1", "7"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
        // init + poll (status, signal) + send + list + ack
        assert_eq!(meter.exchanges.load(Ordering::SeqCst), 6);
        assert_eq!(meter.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_devices_run_in_parallel() {
        let f = fixture();
        add_metered(&f.registry, "p1");
        add_metered(&f.registry, "p2");
        wait_status(&f.registry, "p1", DeviceStatus::Online).await;
        wait_status(&f.registry, "p2", DeviceStatus::Online).await;

        let start = Instant::now();
        let (a, b) = tokio::join!(f.registry.poll("p1"), f.registry.poll("p2"));
        assert!(a.is_ok() && b.is_ok());
        // Each poll is two 50 ms exchanges.
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_with_in_flight_poll_is_bounded() {
        let f = fixture();
        let registry = Arc::new(f.registry);
        let control = add_dummy(&registry, dummy("d1"));
        wait_status(&registry, "d1", DeviceStatus::Online).await;

        control.set_delay(Duration::from_secs(30));
        let in_flight = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.poll("d1").await })
        };
        time::sleep(Duration::from_millis(10)).await;

        let start = Instant::now();
        registry.remove("d1").await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(1) + REMOVE_GRACE + Duration::from_millis(10));
        assert!(registry.get("d1").is_none());
        assert!(f.store.get_device("d1").unwrap().is_none());
        assert_eq!(
            in_flight.await.unwrap().unwrap_err(),
            GatewayError::Shutdown("d1".into())
        );
    }

    #[tokio::test]
    async fn remove_idle_device_cleans_up() {
        let f = fixture();
        let control = add_dummy(&f.registry, dummy("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;

        f.registry.remove("d1").await.unwrap();
        assert!(control.is_cleaned_up());
        assert!(f.registry.is_empty());
        let events = f.recorder.events();
        assert_eq!(
            &events[events.len() - 2..],
            &["d1 online->offline".to_string(), "removed d1".to_string()]
        );

        // Offline is terminal for the old record only; the id can be added again.
        add_dummy(&f.registry, dummy("d1"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;
    }

    #[tokio::test]
    async fn shutdown_keeps_persisted_records() {
        let f = fixture();
        let c1 = add_dummy(&f.registry, dummy("d1"));
        add_dummy(&f.registry, dummy("d2"));
        wait_status(&f.registry, "d1", DeviceStatus::Online).await;
        wait_status(&f.registry, "d2", DeviceStatus::Online).await;

        f.registry.shutdown().await;
        assert!(f.registry.is_empty());
        assert!(c1.is_cleaned_up());
        let stored = f.store.load_devices().unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|d| d.status == DeviceStatus::Online));
    }

    type Gate = (std::sync::mpsc::Sender<()>, std::sync::mpsc::Receiver<()>);

    /// Store whose first device write parks until released.
    struct GatedStore {
        inner: PickleStore,
        gate: Mutex<Option<Gate>>,
    }

    impl Store for GatedStore {
        fn save_device(&self, device: &Device) -> GatewayResult<()> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv_timeout(Duration::from_secs(5)).unwrap();
            }
            self.inner.save_device(device)
        }

        fn load_devices(&self) -> GatewayResult<Vec<Device>> {
            self.inner.load_devices()
        }

        fn get_device(&self, device_id: &str) -> GatewayResult<Option<Device>> {
            self.inner.get_device(device_id)
        }

        fn update_device_status(
            &self,
            device_id: &str,
            status: DeviceStatus,
            error: Option<&str>,
        ) -> GatewayResult<()> {
            self.inner.update_device_status(device_id, status, error)
        }

        fn delete_device(&self, device_id: &str) -> GatewayResult<bool> {
            self.inner.delete_device(device_id)
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

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn registry_stays_readable_while_a_new_record_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: PickleStore::open(&dir.path().join("gateway.db")).unwrap(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        let mut ctx = RegistrationContext::new();
        register_builtin_families_on(&mut ctx);
        let registry = Arc::new(Registry::new(
            Arc::new(ctx),
            FamilyDefaults::default(),
            store,
            Arc::new(EventEmitter::new()),
        ));

        let adding = {
            let registry = registry.clone();
            tokio::task::spawn_blocking(move || add_dummy(&registry, dummy("d1")))
        };
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        let reader = registry.clone();
        let seen = time::timeout(
            Duration::from_secs(1),
            tokio::task::spawn_blocking(move || (reader.len(), reader.devices().len())),
        )
        .await;
        release_tx.send(()).unwrap();
        assert_eq!(seen.expect("registry blocked by the write").unwrap(), (0, 0));

        adding.await.unwrap();
        assert!(registry.contains("d1"));
        wait_status(&registry, "d1", DeviceStatus::Online).await;
    }
}
