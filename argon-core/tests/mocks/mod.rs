//! Shared test doubles: a controllable encoder backend and sink connectors.

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argon_core::config::{EncoderSettings, StreamSettings};
use argon_core::encode::{BackendKind, EncoderBackend, EncoderSession};
use argon_core::error::{ArgonError, Result};
use argon_core::source::{FrameProducer, ProducedFrame};
use argon_core::stream::{SinkConnector, StreamWriter};
use argon_core::types::{CodecParameters, Color, Frame, Packet};

/// A gate the test can hold closed to pin the encoder worker mid-frame.
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }
}

/// Mock encoder backend producing one deterministic packet per frame.
pub struct MockBackend {
    pub name: &'static str,
    pub kind: BackendKind,
    pub available: bool,
    /// Per-frame encode delay (throttled-encoder scenarios)
    pub delay: Duration,
    /// When set, every encode blocks until the gate opens
    pub gate: Option<Arc<Gate>>,
    /// Emit one trailing packet from `flush`
    pub flush_packet: bool,
    /// Keyframe cadence in frames; the first frame is always a keyframe
    pub keyframe_every: u64,
}

impl MockBackend {
    pub fn software() -> Self {
        Self {
            name: "mock-sw",
            kind: BackendKind::Software,
            available: true,
            delay: Duration::ZERO,
            gate: None,
            flush_packet: false,
            keyframe_every: 30,
        }
    }

    pub fn hardware() -> Self {
        Self {
            name: "mock-hw",
            kind: BackendKind::Hardware,
            ..Self::software()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            name: "mock-missing",
            available: false,
            ..Self::software()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_flush_packet(mut self) -> Self {
        self.flush_packet = true;
        self
    }
}

impl EncoderBackend for MockBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn EncoderSession>> {
        Ok(Box::new(MockSession {
            delay: self.delay,
            gate: self.gate.clone(),
            flush_packet: self.flush_packet,
            keyframe_every: self.keyframe_every.max(1),
            frames: 0,
            last_pts: 0,
            params: CodecParameters {
                width: settings.width,
                height: settings.height,
                bitrate: settings.bitrate,
                extradata: Some(vec![0x01, 0x64, 0x00, 0x1f, 0xff]),
                timebase: settings.packet_timebase(),
            },
        }))
    }
}

struct MockSession {
    delay: Duration,
    gate: Option<Arc<Gate>>,
    flush_packet: bool,
    keyframe_every: u64,
    frames: u64,
    last_pts: i64,
    params: CodecParameters,
}

impl EncoderSession for MockSession {
    fn encode(&mut self, _frame: &Frame, pts: i64) -> Result<Vec<Packet>> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let keyframe = self.frames % self.keyframe_every == 0;
        self.frames += 1;
        self.last_pts = pts;
        Ok(vec![Packet {
            data: vec![0xAB; 512],
            pts,
            dts: pts,
            keyframe,
            duration: 0,
            has_extradata: true,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        if !self.flush_packet {
            return Ok(Vec::new());
        }
        Ok(vec![Packet {
            data: vec![0xEE; 128],
            pts: self.last_pts + 1,
            dts: self.last_pts + 1,
            keyframe: false,
            duration: 0,
            has_extradata: true,
        }])
    }

    fn codec_parameters(&self) -> CodecParameters {
        self.params.clone()
    }
}

/// Sink connector that records written packets and can refuse connects or
/// fail writes on demand.
#[derive(Clone)]
pub struct CollectingConnector {
    pub written: Arc<Mutex<Vec<Packet>>>,
    pub refuse_connects: Arc<AtomicU32>,
    pub connect_attempts: Arc<AtomicU32>,
    pub finished: Arc<AtomicU32>,
    pub fail_writes_after: Option<usize>,
    pub write_delay: Duration,
}

impl CollectingConnector {
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            refuse_connects: Arc::new(AtomicU32::new(0)),
            connect_attempts: Arc::new(AtomicU32::new(0)),
            finished: Arc::new(AtomicU32::new(0)),
            fail_writes_after: None,
            write_delay: Duration::ZERO,
        }
    }

    /// Refuse the first `n` connect attempts
    pub fn refusing(n: u32) -> Self {
        let connector = Self::new();
        connector.refuse_connects.store(n, Ordering::SeqCst);
        connector
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_fail_writes_after(mut self, n: usize) -> Self {
        self.fail_writes_after = Some(n);
        self
    }

    pub fn written_packets(&self) -> Vec<Packet> {
        self.written.lock().clone()
    }
}

impl SinkConnector for CollectingConnector {
    fn connect(
        &self,
        _url: &str,
        params: &CodecParameters,
        _settings: &StreamSettings,
    ) -> Result<Box<dyn StreamWriter>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ArgonError::stream("connection refused"));
        }
        if params.extradata.is_none() {
            return Err(ArgonError::config("no extradata in codec parameters"));
        }
        Ok(Box::new(CollectingWriter {
            written: Arc::clone(&self.written),
            finished: Arc::clone(&self.finished),
            fail_writes_after: self.fail_writes_after,
            write_delay: self.write_delay,
            writes: 0,
        }))
    }
}

struct CollectingWriter {
    written: Arc<Mutex<Vec<Packet>>>,
    finished: Arc<AtomicU32>,
    fail_writes_after: Option<usize>,
    write_delay: Duration,
    writes: usize,
}

impl StreamWriter for CollectingWriter {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if let Some(limit) = self.fail_writes_after {
            if self.writes >= limit {
                return Err(ArgonError::stream("broken pipe"));
            }
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.writes += 1;
        self.written.lock().push(packet.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Producer whose capture target disappears after a fixed number of frames.
pub struct ClosingProducer {
    produced: u64,
    close_after: u64,
}

impl ClosingProducer {
    pub fn new(close_after: u64) -> Self {
        Self {
            produced: 0,
            close_after,
        }
    }
}

impl FrameProducer for ClosingProducer {
    fn next_frame(&mut self) -> Result<ProducedFrame> {
        if self.produced >= self.close_after {
            return Ok(ProducedFrame::Closed);
        }
        self.produced += 1;
        Ok(ProducedFrame::Frame(Frame::solid(
            64,
            64,
            Color::rgb(0, 0, 255),
        )))
    }

    fn native_resolution(&self) -> (u32, u32) {
        (64, 64)
    }

    fn native_fps(&self) -> f64 {
        60.0
    }
}

/// Deterministic pseudo-random generator for concurrency tests
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}
