//! # Station Server - Process Wiring
//!
//! Owns the long-running tasks and the channels between them:
//!
//! ```text
//! SerialReader ──frames──▶ LinkController ──observations──▶ StationServer::run
//!       ▲                        │                                │
//!       └──── shared port ◀──────┘ (writes)                       ▼
//!                                                         Dispatcher::deliver
//!                                                      (one task per target)
//! ```
//!
//! On shutdown the link tasks are stopped first, then in-flight deliveries get
//! `delivery.shutdown_grace_secs` to finish before they are aborted.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::{resolve_secret, Config, StorageConfig, StoreKind};
use crate::delivery::transport::Transport;
use crate::delivery::{DeliveryReport, Dispatcher};
use crate::heartbeat::Heartbeat;
use crate::metrics;
use crate::observation::ValidatedObservation;
use crate::storage::{HttpSink, JsonlSink, ObservationSink};

/// HTTP transport for this build; a disabled stand-in without the `http` feature.
pub fn default_transport() -> Result<Arc<dyn Transport>> {
    #[cfg(feature = "http")]
    {
        let transport = crate::delivery::transport::ReqwestTransport::new()?;
        Ok(Arc::new(transport))
    }
    #[cfg(not(feature = "http"))]
    {
        warn!("HTTP support not compiled in; web uploads will fail");
        Ok(Arc::new(crate::delivery::transport::DisabledTransport))
    }
}

/// Primary sink selected by `[storage] kind`.
pub async fn build_sink(
    storage: &StorageConfig,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn ObservationSink>> {
    match storage.kind {
        StoreKind::File => Ok(Arc::new(JsonlSink::new(&storage.data_dir).await?)),
        StoreKind::Http => {
            let url = storage
                .upload_url
                .as_deref()
                .ok_or_else(|| anyhow!("storage.upload_url is required for kind = \"http\""))?;
            let secret = resolve_secret(&storage.upload_secret, "UPLOAD_SECRET");
            if secret.is_none() {
                warn!("No upload secret configured; observations will not be stored");
            }
            Ok(Arc::new(HttpSink::new(url, secret, transport)))
        }
    }
}

pub struct StationServer {
    config: Config,
    dispatcher: Dispatcher,
    transport: Arc<dyn Transport>,
    observations_tx: mpsc::UnboundedSender<ValidatedObservation>,
    observations_rx: mpsc::UnboundedReceiver<ValidatedObservation>,
    shutdown_tx: watch::Sender<bool>,
    link_tasks: JoinSet<()>,
    deliveries: JoinSet<Vec<DeliveryReport>>,
}

impl StationServer {
    pub async fn new(config: Config) -> Result<Self> {
        let transport = default_transport()?;
        let sink = build_sink(&config.storage, transport.clone()).await?;
        let dispatcher = Dispatcher::from_config(&config.targets, sink, transport.clone());
        Ok(Self::with_dispatcher(config, dispatcher, transport))
    }

    pub fn with_dispatcher(
        config: Config,
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (observations_tx, observations_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            dispatcher,
            transport,
            observations_tx,
            observations_rx,
            shutdown_tx,
            link_tasks: JoinSet::new(),
            deliveries: JoinSet::new(),
        }
    }

    /// Feed observations from a source other than the serial link.
    pub fn observation_sender(&self) -> mpsc::UnboundedSender<ValidatedObservation> {
        self.observations_tx.clone()
    }

    /// Signal that stops [`run`](Self::run) like Ctrl-C does.
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Open the console port and start the reader and link controller.
    #[cfg(feature = "serial")]
    pub async fn connect_device(&mut self, port: &str) -> Result<()> {
        use crate::station::serial::{open_shared_port, SerialReader, SerialWriter};
        use crate::station::{LinkController, LinkTiming};

        let shared = open_shared_port(port, self.config.station.baud_rate).await?;
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let reader = SerialReader::new(shared.clone(), frames_tx, self.shutdown_tx.subscribe());
        self.link_tasks.spawn(async move {
            if let Err(e) = reader.run().await {
                warn!("Serial reader exited with error: {}", e);
            }
        });

        let controller = LinkController::new(
            SerialWriter::new(shared),
            LinkTiming::from_config(&self.config.station),
            self.observations_tx.clone(),
        );
        let shutdown = self.shutdown_tx.subscribe();
        self.link_tasks.spawn(async move {
            if let Err(e) = controller.run(frames_rx, shutdown).await {
                warn!("Link controller exited with error: {}", e);
            }
        });
        Ok(())
    }

    #[cfg(not(feature = "serial"))]
    pub async fn connect_device(&mut self, port: &str) -> Result<()> {
        Err(anyhow!(
            "cannot open {}: serial support not compiled in",
            port
        ))
    }

    /// Dispatch observations until Ctrl-C or the shutdown signal, then drain.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Relay running; delivery targets: {}",
            self.dispatcher.target_names().join(", ")
        );

        if let Some(heartbeat) = Heartbeat::from_config(&self.config.heartbeat, self.transport.clone())
        {
            let shutdown = self.shutdown_tx.subscribe();
            self.link_tasks.spawn(heartbeat.run(shutdown));
        }

        let stats_secs = self.config.delivery.stats_interval_secs;
        let mut stats = tokio::time::interval(Duration::from_secs(stats_secs.max(1)));
        stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        stats.tick().await;

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown requested");
                break;
            }
            tokio::select! {
                observation = self.observations_rx.recv() => {
                    // The server holds a sender itself, so the channel never closes here.
                    if let Some(observation) = observation {
                        let handle = self.dispatcher.deliver(observation);
                        if handle.pending() > 0 {
                            self.deliveries.spawn(handle.wait());
                        }
                    }
                }
                Some(done) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    if let Ok(reports) = done {
                        for report in reports {
                            debug!(
                                "{}: {:?} after {} attempt(s)",
                                report.target, report.status, report.attempts
                            );
                        }
                    }
                }
                _ = stats.tick(), if stats_secs > 0 => {
                    info!("Pipeline stats: {}", metrics::snapshot().summary());
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down relay...");
        let _ = self.shutdown_tx.send(true);
        while self.link_tasks.join_next().await.is_some() {}

        // Observations decoded before the link stopped still get delivered.
        while let Ok(observation) = self.observations_rx.try_recv() {
            let handle = self.dispatcher.deliver(observation);
            if handle.pending() > 0 {
                self.deliveries.spawn(handle.wait());
            }
        }

        let grace = Duration::from_secs(self.config.delivery.shutdown_grace_secs);
        let in_flight = self.deliveries.len();
        if in_flight > 0 {
            info!(
                "Waiting up to {:?} for {} in-flight deliveries",
                grace, in_flight
            );
            let drained = tokio::time::timeout(grace, async {
                while self.deliveries.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "Abandoning {} deliveries still in flight after {:?}",
                    self.deliveries.len(),
                    grace
                );
                self.deliveries.abort_all();
                while self.deliveries.join_next().await.is_some() {}
            }
        }

        info!("Final stats: {}", metrics::snapshot().summary());
        info!("Relay shutdown complete");
        Ok(())
    }
}
