//! DAX RX pipeline.
//!
//! One blocking-recv worker drains the DAX UDP socket. Every datagram runs
//! through the VITA-49 parser; packets that are not audio flavors or whose
//! stream ID differs from the expected RX-DAX value are dropped silently.
//! Payload handling depends on the path:
//!
//! - **LAN**: big-endian float32 stereo pairs. Downmixed to mono by
//!   averaging; buffers at 24 kHz (160 pairs or fewer) are upsampled 2x.
//! - **WAN**: one Opus frame per packet, decoded to 480 mono samples at
//!   48 kHz.
//!
//! Packet statistics are batched and surfaced at most every 100 packets.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::events::{AudioEvent, EventEmitter};
use crate::protocol_constants::{RX_STATS_BATCH, RX_UPSAMPLE_THRESHOLD, TX_FRAME_SAMPLES};
use crate::utils::now_millis;
use crate::vita;

use super::resample::LinearUpsampler;
use super::traits::{AudioOutput, NoiseReducer};
use super::{StreamError, StreamResult};

/// How often the blocking recv wakes up to check the stop flag.
const RECV_POLL: Duration = Duration::from_millis(250);

/// Decode path for RX payloads.
pub enum RxPath {
    /// LAN: payload is big-endian float32 stereo interleaved.
    LanFloat,
    /// WAN: payload is one Opus frame, 48 kHz mono, 10 ms.
    WanOpus,
}

enum Decoder {
    LanFloat {
        upsampler: LinearUpsampler,
        mono: Vec<f32>,
        upsampled: Vec<f32>,
    },
    WanOpus {
        decoder: opus::Decoder,
        decoded: Vec<f32>,
    },
}

/// Per-worker state, separated from the pipeline handle so packet handling
/// is testable without a socket.
struct RxWorker {
    expected_stream: Arc<AtomicU32>,
    decoder: Decoder,
    output: Arc<dyn AudioOutput>,
    noise_reducer: Option<Arc<dyn NoiseReducer>>,
    emitter: Arc<dyn EventEmitter>,
    packets: Arc<AtomicU64>,
}

impl RxWorker {
    fn handle_datagram(&mut self, datagram: &[u8]) {
        let packet = match vita::parse_packet(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::trace!("[DaxRx] dropping malformed datagram: {}", e);
                return;
            }
        };

        if !vita::is_audio_type(packet.header.packet_type) {
            return;
        }

        // Stream filter. Zero is the unset sentinel: until the controller
        // installs the negotiated RX stream ID, everything drops.
        let expected = self.expected_stream.load(Ordering::Acquire);
        if expected == 0 || packet.stream_id != Some(expected) {
            return;
        }

        match &mut self.decoder {
            Decoder::LanFloat {
                upsampler,
                mono,
                upsampled,
            } => {
                let pairs = packet.payload.len() / 8;
                if pairs == 0 {
                    return;
                }
                mono.clear();
                for pair in packet.payload.chunks_exact(8) {
                    let left = f32::from_bits(u32::from_be_bytes(pair[0..4].try_into().unwrap()));
                    let right = f32::from_bits(u32::from_be_bytes(pair[4..8].try_into().unwrap()));
                    mono.push((left + right) * 0.5);
                }

                if pairs <= RX_UPSAMPLE_THRESHOLD {
                    // 24 kHz stream: bring it to the 48 kHz delivery rate.
                    upsampled.clear();
                    upsampler.process(mono, upsampled);
                    deliver(&self.noise_reducer, &self.output, upsampled);
                } else {
                    deliver(&self.noise_reducer, &self.output, mono);
                }
            }
            Decoder::WanOpus { decoder, decoded } => {
                decoded.resize(TX_FRAME_SAMPLES * 2, 0.0);
                match decoder.decode_float(packet.payload, decoded, false) {
                    Ok(samples) => {
                        decoded.truncate(samples);
                        deliver(&self.noise_reducer, &self.output, decoded);
                    }
                    Err(e) => {
                        log::debug!("[DaxRx] {}", StreamError::OpusDecode(e.to_string()));
                        return;
                    }
                }
            }
        }

        let count = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        if count % RX_STATS_BATCH == 0 {
            self.emitter.emit_audio(AudioEvent::RxStats {
                packets: count,
                last_packet_millis: now_millis(),
            });
        }
    }
}

fn deliver(
    noise_reducer: &Option<Arc<dyn NoiseReducer>>,
    output: &Arc<dyn AudioOutput>,
    samples: &mut Vec<f32>,
) {
    if let Some(nr) = noise_reducer {
        nr.process(samples);
    }
    output.enqueue_48k_mono(samples);
}

/// Creates the DAX UDP socket with a poll-friendly read timeout.
///
/// Address- and port-reuse let the pipeline share 4991 with other DAX
/// clients on the host, mirroring the discovery socket setup.
fn create_socket(port: u16) -> StreamResult<std::net::UdpSocket> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(StreamError::Bind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[DaxRx] failed to set SO_REUSEADDR: {}", e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[DaxRx] failed to set SO_REUSEPORT: {}", e);
    }

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&bind_addr.into()).map_err(StreamError::Bind)?;

    let socket: std::net::UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(RECV_POLL))
        .map_err(StreamError::Bind)?;
    Ok(socket)
}

/// The RX pipeline handle. Dropping it stops the worker.
pub struct DaxRxPipeline {
    expected_stream: Arc<AtomicU32>,
    packets: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl DaxRxPipeline {
    /// Binds the DAX port and starts the receive worker.
    ///
    /// The stream filter starts unset; call
    /// [`DaxRxPipeline::set_expected_stream`] once the radio assigns the
    /// RX stream ID. `WanOpus` creation fails with
    /// [`StreamError::OpusInit`] if the decoder cannot be built; WAN audio
    /// is then absent but nothing else is affected.
    pub fn start(
        port: u16,
        path: RxPath,
        output: Arc<dyn AudioOutput>,
        noise_reducer: Option<Arc<dyn NoiseReducer>>,
        emitter: Arc<dyn EventEmitter>,
    ) -> StreamResult<Self> {
        let socket = create_socket(port)?;

        let decoder = match path {
            RxPath::LanFloat => Decoder::LanFloat {
                upsampler: LinearUpsampler::new(),
                mono: Vec::with_capacity(512),
                upsampled: Vec::with_capacity(1024),
            },
            RxPath::WanOpus => Decoder::WanOpus {
                decoder: opus::Decoder::new(48_000, opus::Channels::Mono)
                    .map_err(|e| StreamError::OpusInit(e.to_string()))?,
                decoded: Vec::with_capacity(TX_FRAME_SAMPLES * 2),
            },
        };

        let expected_stream = Arc::new(AtomicU32::new(0));
        let packets = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let mut worker = RxWorker {
            expected_stream: Arc::clone(&expected_stream),
            decoder,
            output,
            noise_reducer,
            emitter,
            packets: Arc::clone(&packets),
        };

        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("dax-rx".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    match socket.recv_from(&mut buf) {
                        Ok((len, _src)) => worker.handle_datagram(&buf[..len]),
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            // Socket closed out from under us is the normal
                            // shutdown path; anything else still just ends
                            // the worker.
                            log::debug!("[DaxRx] recv ended: {}", e);
                            break;
                        }
                    }
                }
                log::debug!("[DaxRx] worker exiting");
            })
            .map_err(|e| StreamError::Bind(e))?;

        log::info!("[DaxRx] listening on UDP {}", port);
        Ok(Self {
            expected_stream,
            packets,
            stop,
            worker: Some(handle),
        })
    }

    /// Installs the radio-assigned RX stream ID.
    ///
    /// The worker reads it on the next packet; the brief window where an
    /// old filter value drops legitimate packets is acceptable.
    pub fn set_expected_stream(&self, stream_id: u32) {
        self.expected_stream.store(stream_id, Ordering::Release);
    }

    /// Clears the filter so late packets from a removed stream drop
    /// silently.
    pub fn clear_expected_stream(&self) {
        self.expected_stream.store(0, Ordering::Release);
    }

    /// Packets accepted so far.
    #[must_use]
    pub fn packet_count(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DaxRxPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::vita::{TxPacketBuilder, VitaHeader, TYPE_IF_DATA};
    use parking_lot::Mutex;

    /// Output that records every delivered buffer.
    #[derive(Default)]
    struct CollectingOutput {
        buffers: Mutex<Vec<Vec<f32>>>,
    }

    impl AudioOutput for CollectingOutput {
        fn start(&self, _device_id: Option<&str>) -> Result<(), String> {
            Ok(())
        }
        fn stop(&self) {}
        fn set_gain(&self, _gain: f32) {}
        fn enqueue_48k_mono(&self, samples: &[f32]) {
            self.buffers.lock().push(samples.to_vec());
        }
    }

    fn lan_worker(output: Arc<CollectingOutput>) -> RxWorker {
        RxWorker {
            expected_stream: Arc::new(AtomicU32::new(0)),
            decoder: Decoder::LanFloat {
                upsampler: LinearUpsampler::new(),
                mono: Vec::new(),
                upsampled: Vec::new(),
            },
            output,
            noise_reducer: None,
            emitter: Arc::new(NoopEventEmitter),
            packets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Builds a LAN audio packet: stereo BE float pairs with the given
    /// per-channel values.
    fn lan_packet(stream_id: u32, pairs: &[(f32, f32)]) -> Vec<u8> {
        let header = VitaHeader {
            packet_type: TYPE_IF_DATA,
            class_id_present: false,
            trailer_present: false,
            tsi: 0,
            tsf: 0,
            packet_count: 0,
            size_words: (2 + pairs.len() * 2) as u16,
        };
        let mut packet = header.pack().to_be_bytes().to_vec();
        packet.extend_from_slice(&stream_id.to_be_bytes());
        for &(left, right) in pairs {
            packet.extend_from_slice(&left.to_bits().to_be_bytes());
            packet.extend_from_slice(&right.to_bits().to_be_bytes());
        }
        packet
    }

    #[test]
    fn packets_dropped_until_filter_set() {
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));

        worker.handle_datagram(&lan_packet(0xC000_0001, &[(0.5, 0.5)]));
        assert!(output.buffers.lock().is_empty());

        worker
            .expected_stream
            .store(0xC000_0001, Ordering::Release);
        worker.handle_datagram(&lan_packet(0xC000_0001, &[(0.5, 0.5)]));
        assert_eq!(output.buffers.lock().len(), 1);
    }

    #[test]
    fn mismatched_stream_id_dropped_silently() {
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker
            .expected_stream
            .store(0xC000_0001, Ordering::Release);

        worker.handle_datagram(&lan_packet(0xC000_0002, &[(1.0, 1.0)]));
        assert!(output.buffers.lock().is_empty());
        assert_eq!(worker.packets.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn lan_path_downmixes_and_upsamples_small_buffers() {
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker.expected_stream.store(1, Ordering::Release);

        // 3 pairs <= threshold: expect mono avg then 2x length.
        worker.handle_datagram(&lan_packet(1, &[(1.0, 3.0), (2.0, 2.0), (0.0, 4.0)]));
        let buffers = output.buffers.lock();
        assert_eq!(buffers.len(), 1);
        // Mono: [2.0, 2.0, 2.0] -> upsampled to 6 samples, all 2.0.
        assert_eq!(buffers[0], vec![2.0; 6]);
    }

    #[test]
    fn lan_path_passes_through_large_buffers() {
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker.expected_stream.store(1, Ordering::Release);

        let pairs: Vec<(f32, f32)> = (0..240).map(|i| (i as f32, i as f32)).collect();
        worker.handle_datagram(&lan_packet(1, &pairs));
        let buffers = output.buffers.lock();
        // 240 pairs > 160: already 48 kHz, no upsampling.
        assert_eq!(buffers[0].len(), 240);
        assert_eq!(buffers[0][5], 5.0);
    }

    #[test]
    fn tx_builder_output_accepted_as_rx() {
        // The RX filter treats our own TX packets like any other IF data,
        // which doubles as the builder/parser round trip at pipeline level.
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker.expected_stream.store(0x4000_0042, Ordering::Release);

        let mut builder = TxPacketBuilder::new(0x4000_0042);
        let samples = vec![0.1f32; TX_FRAME_SAMPLES];
        worker.handle_datagram(&builder.build(&samples, 0));

        let buffers = output.buffers.lock();
        assert_eq!(buffers.len(), 1);
        // 480 pairs > threshold: delivered at face rate.
        assert_eq!(buffers[0].len(), TX_FRAME_SAMPLES);
    }

    #[test]
    fn short_datagrams_and_garbage_ignored() {
        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker.expected_stream.store(1, Ordering::Release);

        worker.handle_datagram(&[0u8; 3]);
        worker.handle_datagram(&[0xFFu8; 64]);
        assert!(output.buffers.lock().is_empty());
    }

    #[test]
    fn noise_reducer_applied_before_delivery() {
        struct Doubler;
        impl NoiseReducer for Doubler {
            fn set_enabled(&self, _enabled: bool) {}
            fn process(&self, samples: &mut [f32]) {
                for s in samples.iter_mut() {
                    *s *= 2.0;
                }
            }
        }

        let output = Arc::new(CollectingOutput::default());
        let mut worker = lan_worker(Arc::clone(&output));
        worker.noise_reducer = Some(Arc::new(Doubler));
        worker.expected_stream.store(1, Ordering::Release);

        worker.handle_datagram(&lan_packet(1, &[(1.0, 1.0)]));
        assert_eq!(output.buffers.lock()[0], vec![2.0, 2.0]);
    }

    #[test]
    fn pipeline_start_stop_releases_port() {
        let output: Arc<dyn AudioOutput> = Arc::new(CollectingOutput::default());
        let mut pipeline = DaxRxPipeline::start(
            0,
            RxPath::LanFloat,
            Arc::clone(&output),
            None,
            Arc::new(NoopEventEmitter),
        )
        .expect("ephemeral bind");
        pipeline.set_expected_stream(0xC000_0001);
        pipeline.stop();
        // Repeated stop is safe.
        pipeline.stop();
    }
}
