//! Link controller timing against a paused clock.
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use wxrelay::observation::ValidatedObservation;
use wxrelay::station::{LinkController, LinkState, LinkTiming};

mod common;
use common::PacketBuilder;
use common::RecordingWriter;

struct Harness {
    writer: RecordingWriter,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    observations: mpsc::UnboundedReceiver<ValidatedObservation>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<LinkState>,
    task: JoinHandle<anyhow::Result<()>>,
    started: Instant,
}

fn start(writer: RecordingWriter) -> Harness {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (obs_tx, obs_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = LinkController::new(writer.clone(), LinkTiming::default(), obs_tx);
    assert_eq!(controller.state(), LinkState::Disconnected);
    let state = controller.subscribe_state();
    let started = Instant::now();
    let task = tokio::spawn(controller.run(frames_rx, shutdown_rx));
    Harness {
        writer,
        frames: frames_tx,
        observations: obs_rx,
        shutdown: shutdown_tx,
        state,
        task,
        started,
    }
}

impl Harness {
    /// Lines written since `since`, with their offset from the start.
    fn lines_after(&self, since: Duration) -> Vec<(Duration, String)> {
        self.writer
            .timed()
            .into_iter()
            .map(|(at, line)| (at - self.started, line))
            .filter(|(offset, _)| *offset >= since)
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_repeats_until_console_answers() {
    let h = start(RecordingWriter::default());
    sleep(Duration::from_secs(5)).await;

    assert_eq!(*h.state.borrow(), LinkState::Handshaking);
    assert_eq!(
        h.lines_after(Duration::ZERO),
        vec![
            (Duration::ZERO, "BAUD 19200".to_string()),
            (Duration::ZERO, String::new()),
            (Duration::from_secs(2), "BAUD 19200".to_string()),
            (Duration::from_secs(2), String::new()),
            (Duration::from_secs(4), "BAUD 19200".to_string()),
            (Duration::from_secs(4), String::new()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn first_frame_starts_query_cycle() {
    let h = start(RecordingWriter::default());
    sleep(Duration::from_secs(5)).await;
    h.frames.send(b"\n\r".to_vec()).unwrap();
    // Just past the second wake so ordering of simultaneous timers does not matter
    sleep(Duration::from_millis(30_700)).await;

    assert_eq!(*h.state.borrow(), LinkState::Querying);
    assert_eq!(
        h.lines_after(Duration::from_secs(5)),
        vec![
            (Duration::from_secs(5), String::new()),
            (Duration::from_millis(5_500), "LPS 2 1".to_string()),
            (Duration::from_millis(35_500), String::new()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn packet_frame_yields_observation() {
    let mut h = start(RecordingWriter::default());
    sleep(Duration::from_secs(1)).await;
    let stream = common::console_stream(PacketBuilder::typical().wind_direction(123));
    h.frames.send(stream).unwrap();

    let record = tokio::time::timeout(Duration::from_secs(1), h.observations.recv())
        .await
        .expect("observation within a second")
        .expect("channel open");
    assert!(record.is_accepted());
    assert_eq!(record.observation.wind_direction, 123);
    assert_ne!(*h.state.borrow(), LinkState::Handshaking);
}

#[tokio::test(start_paused = true)]
async fn partial_packets_are_joined_across_frames() {
    let mut h = start(RecordingWriter::default());
    let stream = common::console_stream(PacketBuilder::typical().humidity(42));
    let (head, tail) = stream.split_at(25);
    h.frames.send(head.to_vec()).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(h.observations.try_recv().is_err());
    h.frames.send(tail.to_vec()).unwrap();

    let record = tokio::time::timeout(Duration::from_secs(1), h.observations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.observation.humidity, 42);
}

#[tokio::test(start_paused = true)]
async fn failed_write_waits_for_next_interval() {
    let writer = RecordingWriter::default();
    writer.fail.store(true, Ordering::SeqCst);
    let h = start(writer.clone());
    sleep(Duration::from_secs(3)).await;
    // The blank line is only sent after a successful BAUD write
    assert_eq!(writer.lines(), vec!["BAUD 19200", "BAUD 19200"]);

    h.frames.send(b"\n\r".to_vec()).unwrap();
    sleep(Duration::from_millis(10)).await;
    writer.fail.store(false, Ordering::SeqCst);
    sleep(Duration::from_secs(29)).await;
    // Wake at 3 s failed: no loop command until the next interval
    assert_eq!(
        h.lines_after(Duration::from_secs(3)),
        vec![(Duration::from_secs(3), String::new())]
    );

    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        h.lines_after(Duration::from_secs(4)),
        vec![
            (Duration::from_secs(33), String::new()),
            (Duration::from_millis(33_500), "LPS 2 1".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects() {
    let h = start(RecordingWriter::default());
    sleep(Duration::from_secs(1)).await;
    h.shutdown.send(true).unwrap();
    let result = h.task.await.unwrap();
    tokio_test::assert_ok!(result);
    assert_eq!(*h.state.borrow(), LinkState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn closed_frame_source_stops_controller() {
    let h = start(RecordingWriter::default());
    drop(h.frames);
    tokio_test::assert_ok!(h.task.await.unwrap());
    assert_eq!(*h.state.borrow(), LinkState::Disconnected);
}
