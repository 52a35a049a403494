//! Integration tests for the encoder stage: queue discipline, backend
//! selection, PTS assignment, stop contract. Tests that need a real codec
//! probe for libx264 at runtime and skip when it is absent.

mod mocks;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use argon_core::config::{EncoderKind, EncoderSettings, RateControlMode, TimebaseUnit};
use argon_core::encode::{
    default_backends, encoder_available, BackendKind, Encoder, EncoderBackend,
};
use argon_core::events::{EventHub, PipelineEvent};
use argon_core::types::{Color, Frame, Packet};

use mocks::{Gate, MockBackend};

fn small_settings() -> EncoderSettings {
    EncoderSettings {
        width: 64,
        height: 64,
        fps_num: 60,
        fps_den: 1,
        ..Default::default()
    }
}

fn collecting_callback(encoder: &Encoder) -> Arc<Mutex<Vec<Packet>>> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    encoder.set_packet_callback(Arc::new(move |packet| {
        sink.lock().push(packet.clone());
    }));
    collected
}

fn test_frame() -> Frame {
    Frame::solid(64, 64, Color::rgb(30, 60, 90))
}

#[test]
fn backend_probe_takes_first_available() {
    let backends: Vec<Box<dyn EncoderBackend>> = vec![
        Box::new(MockBackend::unavailable()),
        Box::new(MockBackend::software()),
    ];
    let encoder = Encoder::new(small_settings(), 8, backends, EventHub::default());
    encoder.start().unwrap();
    let stats = encoder.statistics();
    assert_eq!(stats.backend.as_deref(), Some("mock-sw"));
    assert_eq!(stats.backend_kind, Some(BackendKind::Software));
    encoder.stop();
}

#[test]
fn encoder_ready_event_names_the_backend() {
    let events = EventHub::default();
    let mut rx = events.subscribe();
    let encoder = Encoder::new(
        small_settings(),
        8,
        vec![Box::new(MockBackend::software())],
        events,
    );
    encoder.start().unwrap();
    encoder.stop();

    let mut saw_ready = false;
    let mut saw_stopped = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::EncoderReady { backend } => {
                assert_eq!(backend, "mock-sw");
                saw_ready = true;
            }
            PipelineEvent::EncoderStopped => saw_stopped = true,
            _ => {}
        }
    }
    assert!(saw_ready && saw_stopped);
}

#[test]
fn crf_on_hardware_is_refused() {
    let settings = EncoderSettings {
        rate_control: RateControlMode::Crf,
        ..small_settings()
    };
    let encoder = Encoder::new(
        settings,
        8,
        vec![Box::new(MockBackend::hardware())],
        EventHub::default(),
    );
    assert!(encoder.start().is_err());
    assert!(!encoder.is_running());
}

#[test]
fn cqp_on_software_is_refused() {
    let settings = EncoderSettings {
        rate_control: RateControlMode::Cqp,
        ..small_settings()
    };
    let encoder = Encoder::new(
        settings,
        8,
        vec![Box::new(MockBackend::software())],
        EventHub::default(),
    );
    assert!(encoder.start().is_err());
}

/// Pushing k > N frames at a pinned worker leaves exactly N in the queue
/// and counts k − N drops.
#[test]
fn bounded_queue_drops_exactly_the_overflow() {
    let gate = Gate::closed();
    let encoder = Encoder::new(
        small_settings(),
        4,
        vec![Box::new(MockBackend::software().with_gate(Arc::clone(&gate)))],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();

    // First frame gets pulled by the worker and blocks on the gate
    assert!(encoder.submit_frame(test_frame(), None));
    let deadline = Instant::now() + Duration::from_secs(2);
    while encoder.statistics().queue_len > 0 {
        assert!(Instant::now() < deadline, "worker never picked up the frame");
        std::thread::sleep(Duration::from_millis(5));
    }

    // Fill the queue, then overflow it
    for _ in 0..4 {
        assert!(encoder.submit_frame(test_frame(), None));
    }
    for _ in 0..3 {
        assert!(!encoder.submit_frame(test_frame(), None));
    }

    let stats = encoder.statistics();
    assert_eq!(stats.queue_len, 4);
    assert_eq!(stats.frames_dropped, 3);

    gate.open();
    let deadline = Instant::now() + Duration::from_secs(2);
    while encoder.statistics().frames_encoded < 5 {
        assert!(Instant::now() < deadline, "worker never drained the queue");
        std::thread::sleep(Duration::from_millis(5));
    }
    encoder.stop();

    let stats = encoder.statistics();
    assert_eq!(stats.frames_encoded, 5);
    assert_eq!(stats.frames_dropped, 3);
    assert_eq!(collected.lock().len(), 5);
}

/// Encoder throttled far below the submission rate: throughput matches the
/// backend, everything else is dropped, PTS stays monotonic.
#[test]
fn backpressure_drops_and_keeps_pts_monotonic() {
    let settings = EncoderSettings {
        timebase: TimebaseUnit::Micros,
        ..small_settings()
    };
    let encoder = Encoder::new(
        settings,
        4,
        vec![Box::new(
            MockBackend::software().with_delay(Duration::from_millis(100)),
        )],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();

    // ~60 submissions over one second against a 10 fps encoder
    let mut max_queue = 0;
    for _ in 0..60 {
        encoder.submit_frame(test_frame(), None);
        max_queue = max_queue.max(encoder.statistics().queue_len);
        std::thread::sleep(Duration::from_millis(16));
    }
    encoder.stop();

    let stats = encoder.statistics();
    assert!(max_queue <= 4, "queue exceeded its bound: {max_queue}");
    assert!(
        (6..=14).contains(&stats.frames_encoded),
        "throttled encoder should run near 10 fps, got {}",
        stats.frames_encoded
    );
    assert!(
        stats.frames_dropped >= 40,
        "most frames should drop, got {}",
        stats.frames_dropped
    );
    assert!(stats.frames_encoded + stats.frames_dropped <= 60);

    let packets = collected.lock();
    assert!(packets.len() >= 2);
    for pair in packets.windows(2) {
        assert!(pair[1].pts > pair[0].pts, "pts regressed");
    }
}

#[test]
fn auto_pts_counts_frames_in_the_configured_timebase() {
    let settings = EncoderSettings {
        fps_num: 30,
        fps_den: 1,
        timebase: TimebaseUnit::FrameRate,
        ..small_settings()
    };
    let encoder = Encoder::new(
        settings,
        16,
        vec![Box::new(MockBackend::software())],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();
    for _ in 0..5 {
        assert!(encoder.submit_frame(test_frame(), None));
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while collected.lock().len() < 5 {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    encoder.stop();

    let packets = collected.lock();
    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4]);
}

#[test]
fn explicit_pts_passes_through() {
    let encoder = Encoder::new(
        small_settings(),
        16,
        vec![Box::new(MockBackend::software())],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();
    assert!(encoder.submit_frame(test_frame(), Some(424242)));
    let deadline = Instant::now() + Duration::from_secs(2);
    while collected.lock().is_empty() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    encoder.stop();
    assert_eq!(collected.lock()[0].pts, 424242);
}

#[test]
fn stop_flushes_the_codec_through_the_callback() {
    let encoder = Encoder::new(
        small_settings(),
        16,
        vec![Box::new(MockBackend::software().with_flush_packet())],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();
    assert!(encoder.submit_frame(test_frame(), Some(1)));
    let deadline = Instant::now() + Duration::from_secs(2);
    while collected.lock().is_empty() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    encoder.stop();

    // The trailing flush packet arrived after the queued one
    let packets = collected.lock();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1].data[0], 0xEE);
}

#[test]
fn stop_is_idempotent_and_statistics_survive_until_reset() {
    let encoder = Encoder::new(
        small_settings(),
        16,
        vec![Box::new(MockBackend::software())],
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();
    assert!(encoder.submit_frame(test_frame(), None));
    let deadline = Instant::now() + Duration::from_secs(2);
    while collected.lock().is_empty() {
        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(5));
    }
    encoder.stop();
    encoder.stop();

    let stats = encoder.statistics();
    assert_eq!(stats.frames_encoded, 1);
    assert!(stats.bytes_encoded > 0);
    assert_eq!(stats.backend.as_deref(), Some("mock-sw"));

    encoder.reset_statistics();
    let stats = encoder.statistics();
    assert_eq!(stats.frames_encoded, 0);
    assert_eq!(stats.bytes_encoded, 0);
}

#[test]
fn restart_after_stop_works() {
    let encoder = Encoder::new(
        small_settings(),
        16,
        vec![Box::new(MockBackend::software())],
        EventHub::default(),
    );
    encoder.start().unwrap();
    encoder.stop();
    encoder.start().unwrap();
    assert!(encoder.is_running());
    encoder.stop();
}

// ---------------------------------------------------------------------
// Real-codec tests, skipped when libx264 is not compiled into FFmpeg
// ---------------------------------------------------------------------

#[test]
fn x264_produces_a_leading_keyframe_and_extradata() {
    if !encoder_available(EncoderKind::X264) {
        eprintln!("skipping: libx264 not available");
        return;
    }

    let settings = EncoderSettings {
        width: 320,
        height: 180,
        fps_num: 30,
        fps_den: 1,
        encoder: EncoderKind::X264,
        rate_control: RateControlMode::Crf,
        crf: 28,
        b_frames: 0,
        ..Default::default()
    };
    let encoder = Encoder::new(
        settings.clone(),
        32,
        default_backends(EncoderKind::X264),
        EventHub::default(),
    );
    let collected = collecting_callback(&encoder);
    encoder.start().unwrap();

    let params = encoder.codec_parameters().expect("codec parameters");
    assert!(
        params.extradata.as_ref().is_some_and(|e| !e.is_empty()),
        "GLOBAL_HEADER must yield SPS/PPS extradata"
    );

    for _ in 0..30 {
        assert!(encoder.submit_frame(
            Frame::solid(320, 180, Color::rgb(255, 128, 0)),
            None
        ));
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while encoder.statistics().frames_encoded < 10 {
        assert!(Instant::now() < deadline, "x264 made no progress");
        std::thread::sleep(Duration::from_millis(10));
    }
    encoder.stop();

    let packets = collected.lock();
    assert!(!packets.is_empty(), "flush must deliver the coded frames");
    assert!(packets[0].keyframe, "first packet must be an IDR");
    assert!(packets.iter().all(|p| !p.data.is_empty()));
    for pair in packets.windows(2) {
        assert!(pair[1].dts >= pair[0].dts);
        assert!(pair[0].pts >= pair[0].dts);
    }

    let stats = encoder.statistics();
    assert_eq!(stats.backend.as_deref(), Some("libx264"));
    assert!(stats.bytes_encoded > 0);
}
