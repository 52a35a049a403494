//! Argon Core Library
//!
//! Live-streaming compositor and transmitter: capture surfaces are
//! composited into a canvas at a target frame rate, encoded to H.264 and
//! transmitted over RTMP, with a non-blocking preview tap on every rendered
//! frame.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Sources  │──▶│ Render loop   │──▶│ Encoder      │──▶│ Transmitter │
//! │ (latest  │   │ (scene stack, │   │ (H.264 via   │   │ (FLV over   │
//! │  frame)  │   │  canvas tick) │   │  FFmpeg)     │   │  RTMP)      │
//! └──────────┘   └──────┬────────┘   └──────────────┘   └─────────────┘
//!                       │
//!                       ▼
//!                 Preview tap (single slot, most-recent-wins)
//! ```
//!
//! Four decoupled stages, each on its own thread, linked by bounded queues
//! that drop the newest item on overflow. The [`Pipeline`] value owns the
//! stages and their lifecycle; there are no process-wide singletons.

pub mod config;
pub mod encode;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod plugin;
pub mod queue;
pub mod render;
pub mod scene;
pub mod source;
pub mod stats;
pub mod stream;
pub mod types;

pub use config::{
    fps_to_rational, EncoderKind, EncoderPreset, EncoderSettings, PipelineSettings,
    RateControlMode, ReconnectPolicy, StreamService, StreamSettings, TimebaseUnit,
};
pub use error::{ArgonError, Result};
pub use events::{EventHub, PipelineEvent};
pub use pipeline::{Pipeline, PipelineStatistics};
pub use plugin::{Capabilities, Plugin, PluginInfo, PluginType};
pub use scene::{BlendMode, Scene, Transform};
pub use source::{
    test_pattern_source, ColorSource, FrameProducer, GradientProducer, ProducedFrame,
    ProducerSource, Source, SourceConfig,
};
pub use stream::{StreamState, Transmitter};
pub use types::{Color, Frame, FrameData, Handle, Packet, PixelFormat, Timebase};
