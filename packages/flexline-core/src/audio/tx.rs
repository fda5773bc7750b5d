//! Mic TX pipeline.
//!
//! The host's realtime audio callback feeds a [`MicFeeder`]: samples are
//! resampled to 24 kHz and pushed into a lock-free SPSC ring. No
//! allocation (beyond a preallocated scratch buffer) and no syscalls
//! happen on that thread. A dedicated send worker drains the ring in
//! 480-sample frames, builds VITA-49 packets with monotone sequence and
//! sample-count fields, and sends each with a single `sendto`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::protocol_constants::{TX_FRAME_SAMPLES, TX_SAMPLE_RATE};
use crate::utils::epoch_seconds_u32;
use crate::vita::TxPacketBuilder;

use super::resample::LinearResampler;
use super::{StreamError, StreamResult};

/// How long the send worker dozes when the ring holds less than a frame.
/// A frame is 20 ms; 5 ms keeps worst-case added latency small without
/// spinning.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Scratch capacity in samples after resampling. Sized for a 4096-frame
/// host callback at 96 kHz; larger callbacks fall back to allocating.
const SCRATCH_CAPACITY: usize = 4096;

/// Realtime-side handle: owns the producer half of the sample ring.
///
/// Give this to the host audio callback. It is `Send` (moves to the audio
/// thread once) but deliberately not `Clone`: one producer, one consumer.
pub struct MicFeeder {
    producer: Producer<f32>,
    resampler: LinearResampler,
    source_rate: u32,
    scratch: Vec<f32>,
    dropped: Arc<AtomicU64>,
}

impl MicFeeder {
    /// Accepts one mono buffer from the audio callback.
    ///
    /// `sample_rate` is the host rate; a change re-seeds the resampler.
    /// When the ring is full (send worker stalled), surplus samples are
    /// dropped and counted rather than blocking the callback.
    pub fn push_frame(&mut self, samples: &[f32], sample_rate: u32) {
        if sample_rate != self.source_rate {
            self.resampler = LinearResampler::new(sample_rate, TX_SAMPLE_RATE);
            self.source_rate = sample_rate;
        }

        self.scratch.clear();
        self.resampler.process(samples, &mut self.scratch);

        for &sample in &self.scratch {
            if self.producer.push(sample).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Samples dropped because the ring was full.
    #[must_use]
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Send-worker handle. Dropping it stops the worker.
pub struct MicTxPipeline {
    stop: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl MicTxPipeline {
    /// Opens the send socket and starts the worker.
    ///
    /// `destination` is the radio's DAX endpoint (port 4991 on the LAN,
    /// the broker-reported port on the WAN); `stream_id` is the
    /// radio-assigned TX stream. `ring_samples` sizes the realtime ring.
    pub fn start(
        destination: SocketAddr,
        stream_id: u32,
        ring_samples: usize,
    ) -> StreamResult<(Self, MicFeeder)> {
        // Send-only socket; the OS picks the source port.
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").map_err(StreamError::Bind)?;

        let (producer, consumer) = RingBuffer::<f32>::new(ring_samples);
        let stop = Arc::new(AtomicBool::new(false));
        let frames_sent = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let feeder = MicFeeder {
            producer,
            resampler: LinearResampler::new(TX_SAMPLE_RATE, TX_SAMPLE_RATE),
            source_rate: TX_SAMPLE_RATE,
            scratch: Vec::with_capacity(SCRATCH_CAPACITY),
            dropped,
        };

        let worker_stop = Arc::clone(&stop);
        let worker_frames = Arc::clone(&frames_sent);
        let handle = std::thread::Builder::new()
            .name("dax-tx".to_string())
            .spawn(move || {
                send_loop(
                    socket,
                    destination,
                    stream_id,
                    consumer,
                    worker_stop,
                    worker_frames,
                );
            })
            .map_err(StreamError::Bind)?;

        log::info!(
            "[MicTx] sending to {} on stream 0x{:08X}",
            destination,
            stream_id
        );
        Ok((
            Self {
                stop,
                frames_sent,
                worker: Some(handle),
            },
            feeder,
        ))
    }

    /// Frames sent so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Stops the worker and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) -> u64 {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl Drop for MicTxPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_loop(
    socket: std::net::UdpSocket,
    destination: SocketAddr,
    stream_id: u32,
    mut consumer: Consumer<f32>,
    stop: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
) {
    let mut builder = TxPacketBuilder::new(stream_id);
    let mut frame = [0f32; TX_FRAME_SAMPLES];

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        if consumer.slots() < TX_FRAME_SAMPLES {
            std::thread::sleep(DRAIN_POLL);
            continue;
        }

        let chunk = match consumer.read_chunk(TX_FRAME_SAMPLES) {
            Ok(chunk) => chunk,
            Err(_) => continue, // raced the producer; re-check slots
        };
        let (first, second) = chunk.as_slices();
        frame[..first.len()].copy_from_slice(first);
        frame[first.len()..first.len() + second.len()].copy_from_slice(second);
        chunk.commit_all();

        let packet = builder.build(&frame, epoch_seconds_u32());
        match socket.send_to(&packet, destination) {
            Ok(_) => {
                frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                log::warn!("[MicTx] {}", StreamError::Send(e));
            }
        }
    }
    log::debug!("[MicTx] worker exiting after {} frames", frames_sent.load(Ordering::Relaxed));
}
