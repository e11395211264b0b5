//! Liveness ping: a HEAD request to a monitoring URL on a fixed interval.
//! Failures are logged and otherwise ignored.
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::HeartbeatConfig;
use crate::delivery::transport::{send_with_timeout, Transport, UploadRequest};

pub struct Heartbeat {
    url: String,
    interval: Duration,
    timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl Heartbeat {
    /// `None` when disabled or no URL is configured.
    pub fn from_config(cfg: &HeartbeatConfig, transport: Arc<dyn Transport>) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let url = cfg.url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(Self {
            url: url.to_string(),
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
            timeout: Duration::from_millis(cfg.timeout_ms),
            transport,
        })
    }

    /// Send one ping; returns whether the endpoint answered 2xx.
    pub async fn beat(&self) -> bool {
        match send_with_timeout(
            self.transport.as_ref(),
            UploadRequest::head(&self.url),
            self.timeout,
        )
        .await
        {
            Ok(resp) if resp.is_success() => {
                debug!("Heartbeat sent");
                true
            }
            Ok(resp) => {
                warn!("Heartbeat rejected: HTTP {}", resp.status);
                false
            }
            Err(e) => {
                warn!("Heartbeat failed: {}", e);
                false
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.beat().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
