//! RTMP transmitter stage.
//!
//! A bounded-queue consumer maintaining a single stream connection. The
//! worker owns the connection lifecycle: connect, write header, rescale and
//! write packets, reconnect on transient failures within the configured
//! budget, drain and write the trailer on stop.

mod rtmp;
mod sink;

pub use rtmp::{FlvWriter, RtmpConnector};
pub use sink::{SinkConnector, StreamWriter};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{StreamService, StreamSettings};
use crate::error::{ArgonError, Result};
use crate::events::{EventHub, PipelineEvent};
use crate::queue::BoundedQueue;
use crate::stats::RollingWindow;
use crate::types::{CodecParameters, Packet, Timebase};

/// The FLV/RTMP stream timebase: milliseconds
pub const STREAM_TIMEBASE: Timebase = Timebase::MILLIS;

/// Best-effort drain budget when stopping mid-stream
const DRAIN_BUDGET: Duration = Duration::from_secs(2);

/// Transmitter state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Stopped,
    Connecting,
    Streaming,
    Reconnecting,
    /// Terminal: reconnect budget exhausted. Recover with stop + start.
    Error,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: StreamState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> StreamState {
        match self.0.load(Ordering::SeqCst) {
            0 => StreamState::Stopped,
            1 => StreamState::Connecting,
            2 => StreamState::Streaming,
            3 => StreamState::Reconnecting,
            _ => StreamState::Error,
        }
    }

    fn swap(&self, state: StreamState) -> StreamState {
        match self.0.swap(state as u8, Ordering::SeqCst) {
            0 => StreamState::Stopped,
            1 => StreamState::Connecting,
            2 => StreamState::Streaming,
            3 => StreamState::Reconnecting,
            _ => StreamState::Error,
        }
    }
}

/// Mask the stream key in an ingest URL for logging
pub fn masked_url(url: &str) -> String {
    if let Some(idx) = url.rfind('/') {
        let (base, key) = url.split_at(idx + 1);
        if !key.is_empty() && !key.contains(':') {
            return format!("{base}****");
        }
    }
    url.to_string()
}

/// Transmitter statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub state: StreamState,
    pub bytes_written: u64,
    pub packets_written: u64,
    pub keyframes_sent: u64,
    /// Packets dropped at submission because the queue was full
    pub dropped_packets: u64,
    /// Transitions into `Reconnecting`
    pub reconnects: u64,
    /// Rolling 60-sample average write latency in milliseconds
    pub average_latency_ms: f64,
    /// Outgoing bitrate over the connection lifetime
    pub current_kbps: f64,
    /// Time spent in `Streaming` on the current connection
    pub duration_ms: u64,
    /// Current queue occupancy
    pub queue_len: usize,
    /// Queue capacity
    pub queue_capacity: usize,
}

struct StatsInner {
    bytes_written: u64,
    packets_written: u64,
    keyframes_sent: u64,
    dropped_packets: u64,
    reconnects: u64,
    window: RollingWindow,
    connected_at: Option<Instant>,
}

struct Inner {
    settings: Mutex<StreamSettings>,
    state: AtomicState,
    running: AtomicBool,
    queue: BoundedQueue<Packet>,
    codec_params: Mutex<Option<CodecParameters>>,
    stats: Mutex<StatsInner>,
    connector: Box<dyn SinkConnector>,
    events: EventHub,
}

impl Inner {
    fn set_state(&self, state: StreamState) {
        let old = self.state.swap(state);
        if old != state {
            debug!("stream state: {old} -> {state}");
            self.events.emit(PipelineEvent::StreamStateChanged(state));
        }
    }
}

/// Receives encoder packets; the default binding for the encoder callback
pub type PacketSink = Arc<dyn Fn(&Packet) + Send + Sync>;

pub struct Transmitter {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Transmitter {
    /// Transmitter with an explicit sink connector
    pub fn new(
        settings: StreamSettings,
        queue_size: usize,
        connector: Box<dyn SinkConnector>,
        events: EventHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(settings),
                state: AtomicState::new(StreamState::Stopped),
                running: AtomicBool::new(false),
                queue: BoundedQueue::new(queue_size.max(1)),
                codec_params: Mutex::new(None),
                stats: Mutex::new(StatsInner {
                    bytes_written: 0,
                    packets_written: 0,
                    keyframes_sent: 0,
                    dropped_packets: 0,
                    reconnects: 0,
                    window: RollingWindow::default(),
                    connected_at: None,
                }),
                connector,
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Transmitter writing FLV over RTMP
    pub fn with_rtmp(settings: StreamSettings, queue_size: usize, events: EventHub) -> Self {
        Self::new(settings, queue_size, Box::new(RtmpConnector), events)
    }

    /// Replace the settings. Fails while connected or connecting.
    pub fn configure(&self, settings: StreamSettings) -> Result<()> {
        if !matches!(self.state(), StreamState::Stopped | StreamState::Error) {
            return Err(ArgonError::config("cannot configure while streaming"));
        }
        *self.inner.settings.lock() = settings;
        Ok(())
    }

    pub fn settings(&self) -> StreamSettings {
        self.inner.settings.lock().clone()
    }

    /// Codec parameters are required before `start`; the stream header is
    /// written from them (including SPS/PPS extradata).
    pub fn set_codec_parameters(&self, params: CodecParameters) {
        debug!(
            "codec parameters set: {}x{}, extradata {} bytes",
            params.width,
            params.height,
            params.extradata.as_ref().map_or(0, Vec::len)
        );
        *self.inner.codec_params.lock() = Some(params);
    }

    pub fn state(&self) -> StreamState {
        self.inner.state.load()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    /// Set the ingest URL and key, then start
    pub fn start_with(&self, url: &str, stream_key: &str) -> Result<()> {
        {
            let mut settings = self.inner.settings.lock();
            if !url.is_empty() {
                settings.service = StreamService::Custom;
                settings.url = url.to_string();
            }
            settings.stream_key = stream_key.to_string();
        }
        self.start()
    }

    /// Start the worker with the stored settings
    pub fn start(&self) -> Result<()> {
        match self.state() {
            StreamState::Stopped => {}
            StreamState::Error => {
                return Err(ArgonError::stream(
                    "transmitter is in the error state; stop it first",
                ))
            }
            _ => return Ok(()),
        }

        let settings = self.inner.settings.lock().clone();
        settings.validate()?;
        if self.inner.codec_params.lock().is_none() {
            return Err(ArgonError::config(
                "codec parameters must be supplied before starting the stream",
            ));
        }

        info!("Starting stream to {}", masked_url(&settings.full_url()));
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.set_state(StreamState::Connecting);

        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("transmitter".to_string())
            .spawn(move || output_loop(inner))
            .map_err(|e| {
                self.inner.running.store(false, Ordering::SeqCst);
                self.inner.set_state(StreamState::Stopped);
                ArgonError::init(format!("failed to spawn transmitter thread: {e}"))
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Queue a packet for transmission; drops (with a counter) on overflow
    pub fn submit_packet(&self, packet: &Packet) -> bool {
        submit(&self.inner, packet)
    }

    /// A callback suitable for `Encoder::set_packet_callback`
    pub fn packet_sink(&self) -> PacketSink {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |packet: &Packet| {
            submit(&inner, packet);
        })
    }

    /// Stop the worker: drain best-effort, write the trailer, close.
    /// Recovers a terminal `Error` state back to `Stopped`. Idempotent.
    pub fn stop(&self) {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.queue.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        if !was_running && self.state() == StreamState::Stopped {
            return;
        }
        self.inner.set_state(StreamState::Stopped);
        self.inner.stats.lock().connected_at = None;
        self.inner.events.emit(PipelineEvent::StreamDisconnected {
            reason: "stream stopped".to_string(),
        });
        info!("Stream stopped");
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn statistics(&self) -> StreamStats {
        let stats = self.inner.stats.lock();
        let state = self.state();
        let duration_ms = match (state, stats.connected_at) {
            (StreamState::Streaming, Some(connected_at)) => {
                connected_at.elapsed().as_millis() as u64
            }
            _ => 0,
        };
        let current_kbps = if duration_ms > 0 {
            (stats.bytes_written as f64 * 8.0) / duration_ms as f64
        } else {
            0.0
        };
        StreamStats {
            state,
            bytes_written: stats.bytes_written,
            packets_written: stats.packets_written,
            keyframes_sent: stats.keyframes_sent,
            dropped_packets: stats.dropped_packets,
            reconnects: stats.reconnects,
            average_latency_ms: stats.window.average(),
            current_kbps,
            duration_ms,
            queue_len: self.inner.queue.len(),
            queue_capacity: self.inner.queue.capacity(),
        }
    }

    pub fn reset_statistics(&self) {
        let mut stats = self.inner.stats.lock();
        stats.bytes_written = 0;
        stats.packets_written = 0;
        stats.keyframes_sent = 0;
        stats.dropped_packets = 0;
        stats.reconnects = 0;
        stats.window.clear();
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn submit(inner: &Inner, packet: &Packet) -> bool {
    if !inner.running.load(Ordering::SeqCst) {
        return false;
    }
    if inner.queue.push(packet.clone()) {
        true
    } else {
        let mut stats = inner.stats.lock();
        stats.dropped_packets += 1;
        if stats.dropped_packets.is_power_of_two() {
            warn!(
                "stream queue full, dropping packet ({} dropped total)",
                stats.dropped_packets
            );
        }
        false
    }
}

/// Rescale a packet from the encoder timebase into the stream timebase,
/// clamping DTS to stay non-decreasing and PTS to stay ≥ DTS.
fn rescale_packet(
    packet: &Packet,
    encoder_tb: Timebase,
    frame_tb: Timebase,
    last_dts: &mut Option<i64>,
) -> Packet {
    let mut out = packet.clone();
    let floor = last_dts.unwrap_or(i64::MIN);
    out.dts = encoder_tb.rescale_monotonic(packet.dts, STREAM_TIMEBASE, floor);
    *last_dts = Some(out.dts);
    out.pts = encoder_tb.rescale(packet.pts, STREAM_TIMEBASE).max(out.dts);
    out.duration = if packet.duration > 0 {
        encoder_tb.rescale(packet.duration, STREAM_TIMEBASE)
    } else {
        frame_tb.rescale(1, STREAM_TIMEBASE)
    };
    out
}

fn sleep_cancellable(inner: &Inner, duration: Duration) {
    let deadline = Instant::now() + duration;
    while inner.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}

fn output_loop(inner: Arc<Inner>) {
    debug!("transmitter thread started");
    let mut writer: Option<Box<dyn StreamWriter>> = None;
    let mut attempts: u32 = 0;
    let mut last_dts: Option<i64> = None;

    while inner.running.load(Ordering::SeqCst) {
        match inner.state.load() {
            StreamState::Connecting | StreamState::Reconnecting => {
                inner.set_state(StreamState::Connecting);
                let settings = inner.settings.lock().clone();
                let Some(params) = inner.codec_params.lock().clone() else {
                    inner.events.emit(PipelineEvent::StreamError {
                        message: "no codec parameters".to_string(),
                    });
                    inner.set_state(StreamState::Error);
                    break;
                };
                let url = settings.full_url();

                match inner.connector.connect(&url, &params, &settings) {
                    Ok(w) => {
                        writer = Some(w);
                        attempts = 0;
                        last_dts = None;
                        inner.stats.lock().connected_at = Some(Instant::now());
                        inner.set_state(StreamState::Streaming);
                        inner.events.emit(PipelineEvent::StreamConnected);
                        info!("Connected to {}", masked_url(&url));
                    }
                    Err(e) => {
                        attempts += 1;
                        warn!(
                            "connect to {} failed (attempt {attempts}): {e}",
                            masked_url(&url)
                        );
                        if settings.reconnect.exhausted(attempts) {
                            inner.events.emit(PipelineEvent::StreamError {
                                message: format!("reconnect budget exhausted: {e}"),
                            });
                            inner.set_state(StreamState::Error);
                            break;
                        }
                        inner.set_state(StreamState::Reconnecting);
                        inner
                            .events
                            .emit(PipelineEvent::StreamReconnecting { attempt: attempts });
                        inner.stats.lock().reconnects += 1;
                        sleep_cancellable(&inner, settings.reconnect.delay());
                    }
                }
            }
            StreamState::Streaming => {
                let Some(packet) = inner.queue.pop(Duration::from_millis(100)) else {
                    continue;
                };
                let (encoder_tb, frame_tb) = {
                    let params = inner.codec_params.lock();
                    let settings = inner.settings.lock();
                    (
                        params.as_ref().map(|p| p.timebase).unwrap_or(Timebase::MICROS),
                        settings.frame_timebase(),
                    )
                };
                let out = rescale_packet(&packet, encoder_tb, frame_tb, &mut last_dts);

                let Some(w) = writer.as_mut() else {
                    inner.set_state(StreamState::Reconnecting);
                    continue;
                };
                let started = Instant::now();
                match w.write_packet(&out) {
                    Ok(()) => {
                        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                        let mut stats = inner.stats.lock();
                        stats.bytes_written += out.data.len() as u64;
                        stats.packets_written += 1;
                        if out.keyframe {
                            stats.keyframes_sent += 1;
                        }
                        stats.window.push(latency_ms);
                    }
                    Err(e) => {
                        // The failed packet is lost; tear down and reconnect
                        warn!("stream write failed: {e}");
                        inner.events.emit(PipelineEvent::StreamError {
                            message: e.to_string(),
                        });
                        writer = None;
                        inner.stats.lock().reconnects += 1;
                        inner.set_state(StreamState::Reconnecting);
                    }
                }
            }
            StreamState::Stopped | StreamState::Error => break,
        }
    }

    // Stop contract: drain the queue best-effort within a short budget,
    // then write the trailer and close.
    if let Some(mut w) = writer.take() {
        if inner.state.load() == StreamState::Streaming {
            let deadline = Instant::now() + DRAIN_BUDGET;
            let (encoder_tb, frame_tb) = {
                let params = inner.codec_params.lock();
                let settings = inner.settings.lock();
                (
                    params.as_ref().map(|p| p.timebase).unwrap_or(Timebase::MICROS),
                    settings.frame_timebase(),
                )
            };
            while let Some(packet) = inner.queue.try_pop() {
                if Instant::now() >= deadline {
                    warn!("drain budget exhausted, {} packets unsent", inner.queue.len());
                    break;
                }
                let out = rescale_packet(&packet, encoder_tb, frame_tb, &mut last_dts);
                match w.write_packet(&out) {
                    Ok(()) => {
                        let mut stats = inner.stats.lock();
                        stats.bytes_written += out.data.len() as u64;
                        stats.packets_written += 1;
                        if out.keyframe {
                            stats.keyframes_sent += 1;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
        if let Err(e) = w.finish() {
            warn!("failed to finish stream: {e}");
        }
    }
    inner.queue.clear();
    debug!("transmitter thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_url_hides_stream_key() {
        assert_eq!(
            masked_url("rtmp://live.twitch.tv/app/secretkey123"),
            "rtmp://live.twitch.tv/app/****"
        );
        assert_eq!(masked_url("rtmp://host:1935"), "rtmp://host:1935");
    }

    #[test]
    fn rescale_clamps_dts_collisions() {
        let mut last = None;
        // 100 µs steps collapse to the same millisecond; DTS must never
        // decrease and PTS must stay >= DTS.
        for (i, dts_us) in [1000i64, 1100, 1200, 2600].iter().enumerate() {
            let packet = Packet {
                data: vec![0; 8],
                pts: *dts_us + 500,
                dts: *dts_us,
                keyframe: i == 0,
                duration: 0,
                has_extradata: false,
            };
            let out = rescale_packet(&packet, Timebase::MICROS, Timebase::new(1, 30), &mut last);
            assert!(out.pts >= out.dts);
            assert_eq!(out.dts, last.unwrap());
        }
        assert_eq!(last, Some(3));
    }

    #[test]
    fn default_duration_from_frame_rate() {
        let mut last = None;
        let packet = Packet {
            data: vec![0; 8],
            pts: 0,
            dts: 0,
            keyframe: true,
            duration: 0,
            has_extradata: false,
        };
        let out = rescale_packet(&packet, Timebase::MICROS, Timebase::new(1, 30), &mut last);
        assert_eq!(out.duration, 33);
    }

    #[test]
    fn state_roundtrips_through_atomic() {
        let state = AtomicState::new(StreamState::Stopped);
        for s in [
            StreamState::Connecting,
            StreamState::Streaming,
            StreamState::Reconnecting,
            StreamState::Error,
            StreamState::Stopped,
        ] {
            state.swap(s);
            assert_eq!(state.load(), s);
        }
    }
}
