//! H.264 encoder stage.
//!
//! A bounded-queue consumer on its own worker thread. Canvas frames arrive
//! through [`Encoder::submit_frame`]; encoded packets leave through a
//! registered callback, invoked synchronously on the encode thread. The
//! default callback binding pushes into the transmitter queue, so callbacks
//! must not block for long.

mod backend;
mod ffmpeg;

pub use backend::{validate_rate_control, BackendKind, EncoderBackend, EncoderSession};
pub use ffmpeg::{default_backends, ffmpeg_encoder_available, FfmpegBackend};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{EncoderKind, EncoderSettings};
use crate::error::{ArgonError, Result};
use crate::events::{EventHub, PipelineEvent};
use crate::queue::BoundedQueue;
use crate::render::FrameSink;
use crate::stats::RollingWindow;
use crate::types::{CodecParameters, Frame, Packet, Timebase};

/// Receives each encoded packet synchronously on the encode thread
pub type PacketCallback = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Whether any hardware H.264 encoder is present
pub fn hardware_encoding_available() -> bool {
    [EncoderKind::Nvenc, EncoderKind::Amf, EncoderKind::Qsv]
        .iter()
        .any(|k| encoder_available(*k))
}

/// Whether the given encoder kind is present in this FFmpeg build
pub fn encoder_available(kind: EncoderKind) -> bool {
    kind.encoder_name().is_some_and(ffmpeg_encoder_available)
}

/// Names of the available H.264 encoders, in probe order
pub fn available_encoders() -> Vec<String> {
    EncoderKind::Auto
        .candidates()
        .iter()
        .filter(|k| encoder_available(**k))
        .filter_map(|k| k.encoder_name())
        .map(str::to_string)
        .collect()
}

/// Encoder statistics snapshot, retained after stop until reset
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    /// Chosen backend name, once started
    pub backend: Option<String>,
    /// Chosen backend kind, once started
    pub backend_kind: Option<BackendKind>,
    /// Frames pulled from the queue and encoded
    pub frames_encoded: u64,
    /// Frames dropped at submission because the queue was full
    pub frames_dropped: u64,
    /// Total encoded bytes
    pub bytes_encoded: u64,
    /// Keyframe packets produced
    pub keyframes_encoded: u64,
    /// Rolling 60-sample average encode time in milliseconds
    pub average_encode_ms: f64,
    /// Throughput implied by the rolling average
    pub current_fps: f64,
    /// Current queue occupancy
    pub queue_len: usize,
    /// Queue capacity
    pub queue_capacity: usize,
}

struct QueuedFrame {
    frame: Frame,
    /// `None` = assign automatically from the frame counter
    pts: Option<i64>,
}

struct StatsInner {
    frames_encoded: u64,
    frames_dropped: u64,
    bytes_encoded: u64,
    keyframes_encoded: u64,
    window: RollingWindow,
}

struct Inner {
    settings: Mutex<EncoderSettings>,
    queue: BoundedQueue<QueuedFrame>,
    running: AtomicBool,
    callback: Mutex<Option<PacketCallback>>,
    stats: Mutex<StatsInner>,
    active: Mutex<Option<(String, BackendKind)>>,
    codec_params: Mutex<Option<CodecParameters>>,
    events: EventHub,
}

pub struct Encoder {
    inner: Arc<Inner>,
    backends: Vec<Box<dyn EncoderBackend>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Encoder {
    /// Encoder with an explicit closed set of backends, probed in order
    pub fn new(
        settings: EncoderSettings,
        queue_size: usize,
        backends: Vec<Box<dyn EncoderBackend>>,
        events: EventHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(settings),
                queue: BoundedQueue::new(queue_size.max(1)),
                running: AtomicBool::new(false),
                callback: Mutex::new(None),
                stats: Mutex::new(StatsInner {
                    frames_encoded: 0,
                    frames_dropped: 0,
                    bytes_encoded: 0,
                    keyframes_encoded: 0,
                    window: RollingWindow::default(),
                }),
                active: Mutex::new(None),
                codec_params: Mutex::new(None),
                events,
            }),
            backends,
            worker: Mutex::new(None),
        }
    }

    /// Encoder probing the FFmpeg backends for the configured kind
    pub fn with_default_backends(
        settings: EncoderSettings,
        queue_size: usize,
        events: EventHub,
    ) -> Self {
        let backends = default_backends(settings.encoder);
        Self::new(settings, queue_size, backends, events)
    }

    /// Replace the settings. Fails while the encoder is running.
    pub fn configure(&self, settings: EncoderSettings) -> Result<()> {
        if self.is_running() {
            return Err(ArgonError::config(
                "cannot configure while the encoder is running",
            ));
        }
        settings.validate()?;
        *self.inner.settings.lock() = settings;
        Ok(())
    }

    pub fn settings(&self) -> EncoderSettings {
        self.inner.settings.lock().clone()
    }

    /// Register the packet callback. Invoked synchronously from the encode
    /// thread; it must not block for long.
    pub fn set_packet_callback(&self, callback: PacketCallback) {
        *self.inner.callback.lock() = Some(callback);
    }

    pub fn clear_packet_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// Select a backend and start the worker.
    ///
    /// Backends are probed in the configured order; the first whose codec
    /// is available wins. A failure leaves the stage stopped.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let settings = self.inner.settings.lock().clone();
        settings.validate()?;

        let backend = self
            .backends
            .iter()
            .find(|b| b.is_available())
            .ok_or_else(|| ArgonError::init("no H.264 encoder available"))?;
        validate_rate_control(&settings, backend.kind())?;

        let session = backend.open(&settings)?;
        let name = backend.name().to_string();
        let kind = backend.kind();
        info!("Encoder backend selected: {name} ({kind})");

        *self.inner.codec_params.lock() = Some(session.codec_parameters());
        *self.inner.active.lock() = Some((name.clone(), kind));

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let frame_tb = settings.frame_timebase();
        let packet_tb = settings.packet_timebase();
        let handle = std::thread::Builder::new()
            .name("encoder".to_string())
            .spawn(move || encode_loop(inner, session, frame_tb, packet_tb))
            .map_err(|e| {
                self.inner.running.store(false, Ordering::SeqCst);
                ArgonError::init(format!("failed to spawn encoder thread: {e}"))
            })?;
        *self.worker.lock() = Some(handle);

        self.inner
            .events
            .emit(PipelineEvent::EncoderReady { backend: name });
        Ok(())
    }

    /// Queue a frame for encoding.
    ///
    /// `pts` of `None` assigns `frame_counter / fps` in the configured
    /// timebase. When the queue is full the incoming frame is dropped and
    /// `false` returned; dropping older queued frames instead would break
    /// PTS monotonicity downstream.
    pub fn submit_frame(&self, frame: Frame, pts: Option<i64>) -> bool {
        submit(&self.inner, frame, pts)
    }

    /// A sink the render loop can feed; frames get automatic PTS
    pub fn frame_sink(&self) -> FrameSink {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |frame: Frame| submit(&inner, frame, None))
    }

    /// Stop the worker, flush the codec through the callback, release the
    /// backend. Idempotent.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.queue.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.inner.queue.clear();
        info!("Encoder stopped");
        self.inner.events.emit(PipelineEvent::EncoderStopped);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Codec parameters of the active (or last) session, for the stream
    /// header
    pub fn codec_parameters(&self) -> Option<CodecParameters> {
        self.inner.codec_params.lock().clone()
    }

    /// Statistics are retained after stop until `reset_statistics` is
    /// called.
    pub fn statistics(&self) -> EncoderStats {
        let stats = self.inner.stats.lock();
        let active = self.inner.active.lock();
        let average = stats.window.average();
        EncoderStats {
            backend: active.as_ref().map(|(name, _)| name.clone()),
            backend_kind: active.as_ref().map(|(_, kind)| *kind),
            frames_encoded: stats.frames_encoded,
            frames_dropped: stats.frames_dropped,
            bytes_encoded: stats.bytes_encoded,
            keyframes_encoded: stats.keyframes_encoded,
            average_encode_ms: average,
            current_fps: if average > 0.0 { 1000.0 / average } else { 0.0 },
            queue_len: self.inner.queue.len(),
            queue_capacity: self.inner.queue.capacity(),
        }
    }

    pub fn reset_statistics(&self) {
        let mut stats = self.inner.stats.lock();
        stats.frames_encoded = 0;
        stats.frames_dropped = 0;
        stats.bytes_encoded = 0;
        stats.keyframes_encoded = 0;
        stats.window.clear();
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn submit(inner: &Inner, frame: Frame, pts: Option<i64>) -> bool {
    if !inner.running.load(Ordering::SeqCst) {
        return false;
    }
    if inner.queue.push(QueuedFrame { frame, pts }) {
        true
    } else {
        let mut stats = inner.stats.lock();
        stats.frames_dropped += 1;
        if stats.frames_dropped.is_power_of_two() {
            warn!(
                "encoder queue full, dropping frame ({} dropped total)",
                stats.frames_dropped
            );
        }
        false
    }
}

fn encode_loop(
    inner: Arc<Inner>,
    mut session: Box<dyn EncoderSession>,
    frame_tb: Timebase,
    packet_tb: Timebase,
) {
    debug!("encode thread started");
    let mut frame_counter: i64 = 0;

    while inner.running.load(Ordering::SeqCst) {
        let Some(queued) = inner.queue.pop(Duration::from_millis(100)) else {
            continue;
        };

        // Auto PTS: frame_counter expressed in the encoder timebase
        let pts = queued
            .pts
            .unwrap_or_else(|| frame_tb.rescale(frame_counter, packet_tb));
        frame_counter += 1;

        let started = Instant::now();
        match session.encode(&queued.frame, pts) {
            Ok(packets) => {
                let encode_ms = started.elapsed().as_secs_f64() * 1000.0;
                {
                    let mut stats = inner.stats.lock();
                    stats.frames_encoded += 1;
                    stats.window.push(encode_ms);
                }
                deliver(&inner, &packets);
            }
            Err(e) => {
                warn!("encode failed: {e}");
            }
        }
    }

    // Flush: submit EOF and drain the remaining packets through the callback
    match session.flush() {
        Ok(packets) => {
            if !packets.is_empty() {
                debug!("flushed {} packets", packets.len());
            }
            deliver(&inner, &packets);
        }
        Err(e) => warn!("encoder flush failed: {e}"),
    }

    debug!("encode thread stopped after {frame_counter} frames");
}

fn deliver(inner: &Inner, packets: &[Packet]) {
    if packets.is_empty() {
        return;
    }
    let callback = inner.callback.lock().clone();
    for packet in packets {
        {
            let mut stats = inner.stats.lock();
            stats.bytes_encoded += packet.data.len() as u64;
            if packet.keyframe {
                stats.keyframes_encoded += 1;
            }
        }
        if let Some(callback) = &callback {
            callback(packet);
        }
    }
}
