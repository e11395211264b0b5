//! Serial port plumbing for the console link.
//!
//! One port handle is shared between the [`SerialReader`] task, which polls for
//! bytes and forwards LF-delimited frames, and the [`SerialWriter`] used by the
//! link controller.
use anyhow::{anyhow, Result};
use log::{debug, error, info, trace, warn};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use super::framer::LineFramer;
use super::LinkWriter;
use crate::logutil::hex_snippet;

pub type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Open the console port (8N1) and purge anything buffered from before we attached.
pub async fn open_shared_port(port_name: &str, baud_rate: u32) -> Result<SharedPort> {
    info!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(50));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

    let _ = port.write_data_terminal_ready(true);
    sleep(Duration::from_millis(150)).await;

    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let mut purge = [0u8; 512];
            let _ = port.read(&mut purge);
            debug!("Purged {} stale bytes from {}", available, port_name);
        }
    }

    Ok(Arc::new(Mutex::new(port)))
}

/// Write half handed to the link controller.
pub struct SerialWriter {
    port: SharedPort,
}

impl SerialWriter {
    pub fn new(port: SharedPort) -> Self {
        Self { port }
    }
}

impl LinkWriter for SerialWriter {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut port = self
            .port
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "serial port lock poisoned"))?;
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()
    }
}

/// Polls the port and forwards complete frames to the link controller.
pub struct SerialReader {
    port: SharedPort,
    framer: LineFramer,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
}

impl SerialReader {
    pub fn new(
        port: SharedPort,
        frames: mpsc::UnboundedSender<Vec<u8>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            port,
            framer: LineFramer::new(),
            frames,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Serial reader started");
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.read_once() {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                            debug!("Serial read interrupted, likely shutdown in progress");
                            break;
                        }
                        Err(e) => {
                            warn!("Serial read error (continuing): {}", e);
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                    if self.frames.is_closed() {
                        error!("Frame consumer went away; stopping serial reader");
                        break;
                    }
                }
            }
        }

        info!("Serial reader stopped");
        Ok(())
    }

    fn read_once(&mut self) -> std::io::Result<()> {
        let mut buffer = [0u8; 1024];
        let read = {
            let mut port = self.port.lock().map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::Other, "serial port lock poisoned")
            })?;
            port.read(&mut buffer)
        };
        match read {
            Ok(0) => Ok(()),
            Ok(n) => {
                trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                self.framer.push(&buffer[..n]);
                while let Some(frame) = self.framer.next_frame() {
                    let _ = self.frames.send(frame);
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(()),
            Err(e) => Err(e),
        }
    }
}
