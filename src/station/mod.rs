//! # Station Link Module
//!
//! Everything between the serial port and a validated observation:
//!
//! - [`framer`] splits the raw byte stream on LF
//! - [`cache`] accumulates frames until a full LOOP packet is buffered
//! - [`locate`] finds the `LOO` marker
//! - [`decode`] turns the fixed layout into an [`Observation`](crate::observation::Observation)
//! - [`LinkController`] drives the handshake and the periodic query cycle
//!
//! ## Link states
//!
//! ```text
//! Disconnected ──run()──▶ Handshaking ──first frame──▶ Idle ◀──┐
//!                          (BAUD + blank line                │   │ quiet period
//!                           every settle interval)      wake │   │ then loop command
//!                                                            ▼   │
//!                                                         Querying
//! ```
//!
//! The controller is a single loop over one deadline, the inbound frame
//! channel and a shutdown signal. Serial writes are synchronous and finish
//! before the next step is scheduled, so there is never more than one write in
//! flight. A failed write is logged and the cycle simply waits for the next
//! scheduled query; the console keeps pushing telemetry on its own meanwhile.

pub mod cache;
pub mod decode;
pub mod framer;
pub mod locate;
#[cfg(test)]
pub(crate) mod packet_builder;
#[cfg(feature = "serial")]
pub mod serial;

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::config::StationConfig;
use crate::logutil::hex_snippet;
use crate::metrics;
use crate::observation::ValidatedObservation;
use crate::validation::validate;
use cache::ByteCache;
use locate::{locate, PacketLocation};

/// Write side of the serial link. Each call writes one line plus LF terminator.
pub trait LinkWriter: Send {
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Handshaking,
    Idle,
    Querying,
}

/// Timing and command parameters for the link controller.
#[derive(Debug, Clone)]
pub struct LinkTiming {
    pub baud_rate: u32,
    pub loop_command: String,
    pub handshake_settle: Duration,
    pub wake_settle: Duration,
    pub query_interval: Duration,
    pub cache_stale: Duration,
}

impl LinkTiming {
    pub fn from_config(cfg: &StationConfig) -> Self {
        Self {
            baud_rate: cfg.baud_rate,
            loop_command: cfg.loop_command.clone(),
            handshake_settle: Duration::from_millis(cfg.handshake_settle_ms),
            wake_settle: Duration::from_millis(cfg.wake_settle_ms),
            query_interval: Duration::from_secs(cfg.query_interval_secs),
            cache_stale: Duration::from_secs(cfg.cache_stale_secs),
        }
    }

    pub fn baud_command(&self) -> String {
        format!("BAUD {}", self.baud_rate)
    }
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            baud_rate: 19200,
            loop_command: "LPS 2 1".to_string(),
            handshake_settle: Duration::from_secs(2),
            wake_settle: Duration::from_millis(500),
            query_interval: Duration::from_secs(30),
            cache_stale: cache::DEFAULT_STALE_AFTER,
        }
    }
}

/// Byte cache plus locate/decode/validate, fed one frame at a time.
#[derive(Debug)]
pub struct PacketAssembler {
    cache: ByteCache,
}

impl PacketAssembler {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            cache: ByteCache::new(stale_after),
        }
    }

    /// Append a frame and return a validated observation once a full packet is
    /// buffered. The cache is reset after every decoded packet.
    pub fn ingest(
        &mut self,
        frame: &[u8],
        now: std::time::Instant,
    ) -> Option<ValidatedObservation> {
        self.cache.append(frame, now);
        let offset = match locate(self.cache.as_bytes()) {
            PacketLocation::Found { offset } => offset,
            PacketLocation::TooShort { len } => {
                debug!("Buffered {} bytes, waiting for more", len);
                return None;
            }
            PacketLocation::NoMarker => {
                debug!(
                    "No LOOP marker in {} buffered bytes: {}",
                    self.cache.len(),
                    hex_snippet(self.cache.as_bytes(), 24)
                );
                return None;
            }
            PacketLocation::InsufficientTail { offset, remaining } => {
                debug!(
                    "LOOP marker at {} but only {} bytes follow, waiting for more",
                    offset, remaining
                );
                return None;
            }
        };

        let decoded = decode::decode(self.cache.as_bytes(), offset, Utc::now());
        self.cache.reset();
        let observation = match decoded {
            Ok(observation) => observation,
            Err(e) => {
                warn!("Dropping located packet: {}", e);
                return None;
            }
        };
        metrics::inc_packets_decoded();

        let validated = validate(observation);
        match validated.disregard_reason {
            None => {
                metrics::inc_observations_accepted();
                debug!(
                    "Decoded observation: {:.1}C wind {}mph @ {} rh {}%",
                    validated.observation.temperature_c,
                    validated.observation.wind_speed,
                    validated.observation.wind_direction,
                    validated.observation.humidity
                );
            }
            Some(reason) => {
                metrics::inc_observations_disregarded();
                warn!(
                    "Disregarding observation ({}): wind {}mph @ {} rh {}% temp {:.1}C",
                    reason,
                    validated.observation.wind_speed,
                    validated.observation.wind_direction,
                    validated.observation.humidity,
                    validated.observation.temperature_c
                );
            }
        }
        Some(validated)
    }

    pub fn buffered(&self) -> usize {
        self.cache.len()
    }
}

/// Handshake and query state machine for the console link.
pub struct LinkController<W: LinkWriter> {
    writer: W,
    timing: LinkTiming,
    state: LinkState,
    deadline: Instant,
    assembler: PacketAssembler,
    observations: mpsc::UnboundedSender<ValidatedObservation>,
    state_tx: watch::Sender<LinkState>,
}

impl<W: LinkWriter> LinkController<W> {
    pub fn new(
        writer: W,
        timing: LinkTiming,
        observations: mpsc::UnboundedSender<ValidatedObservation>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let assembler = PacketAssembler::new(timing.cache_stale);
        Self {
            writer,
            timing,
            state: LinkState::Disconnected,
            deadline: Instant::now(),
            assembler,
            observations,
            state_tx,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Watch state transitions from outside the controller task.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Drive the link until shutdown is signalled or the frame source closes.
    pub async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Link controller starting handshake");
        self.set_state(LinkState::Handshaking);
        self.deadline = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = sleep_until(self.deadline) => {
                    self.on_timer(Instant::now());
                }
                frame = frames.recv() => {
                    match frame {
                        Some(frame) => self.on_frame(&frame, Instant::now()),
                        None => {
                            warn!("Serial frame source closed; stopping link controller");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_state(LinkState::Disconnected);
        info!("Link controller stopped");
        Ok(())
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("Link state {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    fn on_timer(&mut self, now: Instant) {
        match self.state {
            LinkState::Disconnected => {}
            LinkState::Handshaking => {
                let baud = self.timing.baud_command();
                if self.write(&baud) {
                    self.write("");
                }
                self.deadline = now + self.timing.handshake_settle;
            }
            LinkState::Idle => {
                // Wake the console before asking for data.
                if self.write("") {
                    self.set_state(LinkState::Querying);
                    self.deadline = now + self.timing.wake_settle;
                } else {
                    self.deadline = now + self.timing.query_interval;
                }
            }
            LinkState::Querying => {
                let command = self.timing.loop_command.clone();
                self.write(&command);
                self.set_state(LinkState::Idle);
                self.deadline = now + self.timing.query_interval;
            }
        }
    }

    fn on_frame(&mut self, frame: &[u8], now: Instant) {
        metrics::inc_frames_received();
        if self.state == LinkState::Handshaking {
            info!("Console answered; starting query loop");
            self.set_state(LinkState::Idle);
            self.deadline = now;
        }
        if let Some(validated) = self.assembler.ingest(frame, now.into_std()) {
            if self.observations.send(validated).is_err() {
                warn!("Observation channel closed; dropping decoded packet");
            }
        }
    }

    fn write(&mut self, line: &str) -> bool {
        match self.writer.write_line(line) {
            Ok(()) => {
                debug!("Wrote {:?} to serial link", line);
                true
            }
            Err(e) => {
                metrics::inc_link_write_errors();
                error!("Serial write of {:?} failed: {}", line, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet_builder::PacketBuilder;

    #[test]
    fn assembler_reassembles_fragmented_packet() {
        let mut assembler = PacketAssembler::new(Duration::from_secs(65));
        let mut stream = b"\n\r".to_vec();
        stream.extend_from_slice(&PacketBuilder::typical().build());
        stream.extend_from_slice(b"\n\r");
        let now = std::time::Instant::now();
        let (first, rest) = stream.split_at(30);
        assert!(assembler.ingest(first, now).is_none());
        let validated = assembler.ingest(rest, now).expect("packet");
        assert!(validated.is_accepted());
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn stale_fragment_is_not_joined() {
        let mut assembler = PacketAssembler::new(Duration::from_secs(65));
        let packet = PacketBuilder::typical().build();
        let t0 = std::time::Instant::now();
        assert!(assembler.ingest(&packet[..40], t0).is_none());
        let later = t0 + Duration::from_secs(70);
        assert!(assembler.ingest(&packet[40..], later).is_none());
        assert_eq!(assembler.buffered(), 20);
    }

    #[test]
    fn baud_command_uses_rate() {
        let timing = LinkTiming::default();
        assert_eq!(timing.baud_command(), "BAUD 19200");
    }
}
