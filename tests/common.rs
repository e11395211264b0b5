//! Test utilities & fakes shared by the integration tests.
//! Each test crate pulls this in with `mod common;` and uses only what it needs.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use wxrelay::delivery::error::TransportError;
use wxrelay::delivery::transport::{Transport, UploadRequest, UploadResponse};
use wxrelay::observation::{Observation, ValidatedObservation};
use wxrelay::station::decode::decode;
use wxrelay::station::LinkWriter;
use wxrelay::storage::{ObservationSink, StoreError};

#[path = "../src/station/packet_builder.rs"]
mod packet_builder;
#[allow(unused_imports)]
pub use packet_builder::PacketBuilder;

/// Decode a synthetic packet captured now.
pub fn observation(builder: PacketBuilder) -> Observation {
    decode(&builder.build(), 0, Utc::now()).expect("synthetic packet decodes")
}

pub fn accepted() -> ValidatedObservation {
    ValidatedObservation::accepted(observation(PacketBuilder::typical()))
}

/// A packet as the console sends it: LF CR prefix, packet, trailing LF CR.
pub fn console_stream(builder: PacketBuilder) -> Vec<u8> {
    let mut stream = b"\n\r".to_vec();
    stream.extend_from_slice(&builder.build());
    stream.extend_from_slice(b"\n\r");
    stream
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, &'static str),
    ConnectError,
}

/// Transport answering from per-URL-prefix scripts. The last reply in a
/// script repeats once the others are used up.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<UploadRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url_prefix: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url_prefix.to_string(), replies.into());
    }

    pub fn calls_to(&self, url_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(url_prefix))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: UploadRequest) -> Result<UploadResponse, TransportError> {
        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts
                .iter_mut()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                .map(|(_, q)| q);
            match queue {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            }
        };
        self.calls.lock().unwrap().push(request);
        match reply {
            Some(Reply::Status(status, body)) => Ok(UploadResponse::new(status, body)),
            Some(Reply::ConnectError) => Err(TransportError::Connect("connection refused".into())),
            None => Ok(UploadResponse::new(404, "no script")),
        }
    }
}

/// In-memory sink recording what was stored.
#[derive(Default)]
pub struct MemorySink {
    pub accepted: Mutex<Vec<Observation>>,
    pub disregarded: Mutex<Vec<ValidatedObservation>>,
    pub fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }
}

#[async_trait]
impl ObservationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_accepted(&self, observation: &Observation) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Upload("backend unavailable".into()));
        }
        self.accepted.lock().unwrap().push(observation.clone());
        Ok(())
    }

    async fn insert_disregarded(&self, record: &ValidatedObservation) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Upload("backend unavailable".into()));
        }
        self.disregarded.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Link writer recording each line with the (tokio) time it was written.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    pub lines: Arc<Mutex<Vec<(tokio::time::Instant, String)>>>,
    pub fail: Arc<AtomicBool>,
}

impl RecordingWriter {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub fn timed(&self) -> Vec<(tokio::time::Instant, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl LinkWriter for RecordingWriter {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.lines
            .lock()
            .unwrap()
            .push((tokio::time::Instant::now(), line.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "port unplugged",
            ));
        }
        Ok(())
    }
}
