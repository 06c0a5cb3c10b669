// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Gateway assembly: registry, pipeline, poller and the periodic loops.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use smsbridge_backend::RegistrationContext;
use smsbridge_core::controller::{
    EventEmitter, FixedPolling, GatewayEvent, GatewayListener, ListenerId,
};
use smsbridge_core::{Device, DeviceStatus, DeviceSummary, GatewayResult};

use crate::config::{DeviceConfig, ServerConfig};
use crate::hub::HubRelay;
use crate::notify::BroadcastListener;
use crate::pipeline::{MessageCounters, MessagePipeline};
use crate::poller::StatusPoller;
use crate::registry::Registry;
use crate::store::Store;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Gateway {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    emitter: Arc<EventEmitter>,
    hub: Option<Arc<dyn HubRelay>>,
    pipeline: Arc<MessagePipeline>,
    poller: Arc<StatusPoller>,
    message_poll_interval: Duration,
    retry_sweep_interval: Duration,
    capability_report_interval: Duration,
    retention: Option<chrono::Duration>,
    stats_retention: Option<chrono::Duration>,
}

impl Gateway {
    pub fn new(
        context: Arc<RegistrationContext>,
        config: &ServerConfig,
        store: Arc<dyn Store>,
        hub: Option<Arc<dyn HubRelay>>,
    ) -> Self {
        let emitter = Arc::new(EventEmitter::new());
        let registry = Arc::new(Registry::new(
            context,
            config.families.clone(),
            store.clone(),
            emitter.clone(),
        ));
        let counters = Arc::new(MessageCounters::new());
        let pipeline = Arc::new(MessagePipeline::new(
            registry.clone(),
            store.clone(),
            hub.clone(),
            config.behavior.delivery_policy(),
            emitter.clone(),
            counters.clone(),
        ));
        let poller = Arc::new(StatusPoller::new(
            registry.clone(),
            store.clone(),
            counters,
            Arc::new(FixedPolling::new(config.behavior.status_poll_interval())),
        ));
        Self {
            registry,
            store,
            emitter,
            hub,
            pipeline,
            poller,
            message_poll_interval: config.behavior.message_poll_interval(),
            retry_sweep_interval: config.behavior.retry_sweep_interval(),
            capability_report_interval: config.behavior.capability_report_interval(),
            retention: config.storage.retention(),
            stats_retention: config.storage.stats_retention(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<MessagePipeline> {
        &self.pipeline
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn add_listener(&self, listener: Arc<dyn GatewayListener>) -> ListenerId {
        self.emitter.register(listener)
    }

    /// Subscribe to gateway events through a dedicated broadcast channel.
    pub fn subscribe_events(&self, capacity: usize) -> broadcast::Receiver<GatewayEvent> {
        let listener = Arc::new(BroadcastListener::new(capacity));
        let rx = listener.subscribe();
        self.emitter.register(listener);
        rx
    }

    /// Re-add persisted devices and the configured device list.
    ///
    /// A configured entry replaces the identity fields of a persisted record
    /// with the same id but keeps its history (first seen, SIM, model).
    /// Returns how many devices were added.
    pub fn restore_devices(&self, configured: &[DeviceConfig]) -> GatewayResult<usize> {
        let mut devices: BTreeMap<String, Device> = self
            .store
            .load_devices()?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        for entry in configured {
            let fresh = entry.to_device();
            match devices.get_mut(&fresh.id) {
                Some(existing) => {
                    existing.family = fresh.family;
                    existing.phone_number = fresh.phone_number;
                    existing.transport_address = fresh.transport_address;
                    existing.config = fresh.config;
                }
                None => {
                    devices.insert(fresh.id.clone(), fresh);
                }
            }
        }

        let mut added = 0;
        for (id, device) in devices {
            match self.registry.add(device) {
                Ok(_) => added += 1,
                Err(e) => warn!("[{}] not restored: {}", id, e),
            }
        }
        info!("Restored {} device(s)", added);
        Ok(added)
    }

    /// Report online devices to the Hub. A no-op without a Hub.
    pub async fn report_capabilities(&self) -> GatewayResult<()> {
        let Some(hub) = &self.hub else {
            return Ok(());
        };
        let online: Vec<DeviceSummary> = self
            .registry
            .devices()
            .iter()
            .filter(|d| d.status == DeviceStatus::Online)
            .map(DeviceSummary::from)
            .collect();
        hub.report_capabilities(&online).await
    }

    /// Start the background loops; each stops once `shutdown_rx` flips to true.
    pub fn spawn_loops(self: &Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let poller = self.poller.clone();
        handles.push(spawn_periodic(
            "status poll",
            poller.policy().interval(),
            shutdown_rx.clone(),
            move || {
                let poller = poller.clone();
                async move {
                    let polled = poller.poll_all().await;
                    debug!("polled {} device(s)", polled);
                }
            },
        ));

        let pipeline = self.pipeline.clone();
        handles.push(spawn_periodic(
            "message ingestion",
            self.message_poll_interval,
            shutdown_rx.clone(),
            move || {
                let pipeline = pipeline.clone();
                async move {
                    pipeline.ingest_all().await;
                }
            },
        ));

        if self.hub.is_some() {
            let pipeline = self.pipeline.clone();
            handles.push(spawn_periodic(
                "retry sweep",
                self.retry_sweep_interval,
                shutdown_rx.clone(),
                move || {
                    let pipeline = pipeline.clone();
                    async move {
                        if let Err(e) = pipeline.retry_due(Utc::now()).await {
                            warn!("retry sweep failed: {}", e);
                        }
                    }
                },
            ));

            let gateway = Arc::clone(self);
            handles.push(spawn_periodic(
                "capability report",
                self.capability_report_interval,
                shutdown_rx.clone(),
                move || {
                    let gateway = gateway.clone();
                    async move {
                        if let Err(e) = gateway.report_capabilities().await {
                            warn!("capability report failed: {}", e);
                        }
                    }
                },
            ));
        }

        if self.retention.is_some() || self.stats_retention.is_some() {
            let pipeline = self.pipeline.clone();
            let poller = self.poller.clone();
            let (retention, stats_retention) = (self.retention, self.stats_retention);
            handles.push(spawn_periodic(
                "retention sweep",
                RETENTION_SWEEP_INTERVAL,
                shutdown_rx,
                move || {
                    let pipeline = pipeline.clone();
                    let poller = poller.clone();
                    async move {
                        let now = Utc::now();
                        if let Some(retention) = retention {
                            if let Err(e) = pipeline.sweep_retention(now, retention) {
                                warn!("retention sweep failed: {}", e);
                            }
                        }
                        if let Some(retention) = stats_retention {
                            if let Err(e) = poller.prune_stats(now, retention).await {
                                warn!("stats prune failed: {}", e);
                            }
                        }
                    }
                },
            ));
        }

        handles
    }

    /// Stop every device task; persisted records stay as they are.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        info!("Gateway stopped");
    }
}

pub async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let run = async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        };
        tokio::select! {
            _ = run => {}
            _ = wait_for_shutdown(shutdown_rx) => {
                debug!("{} loop stopped", name);
            }
        }
    })
}
