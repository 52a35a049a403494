//! Configuration types for the pipeline stages.
//!
//! Plain-data settings with serde derives so a host can persist them; no
//! file layer lives here.

use serde::{Deserialize, Serialize};

use crate::error::{ArgonError, Result};
use crate::types::{Color, Timebase};

/// H.264 encoder implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Probe hardware encoders first, fall back to software
    #[default]
    Auto,
    /// NVIDIA NVENC
    Nvenc,
    /// AMD AMF
    Amf,
    /// Intel QuickSync
    Qsv,
    /// libx264 software encoder
    X264,
}

impl EncoderKind {
    /// FFmpeg encoder name, `None` for `Auto`
    pub fn encoder_name(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Nvenc => Some("h264_nvenc"),
            Self::Amf => Some("h264_amf"),
            Self::Qsv => Some("h264_qsv"),
            Self::X264 => Some("libx264"),
        }
    }

    /// Probe order used for `Auto`
    pub fn candidates(&self) -> &'static [EncoderKind] {
        match self {
            Self::Auto => &[Self::Nvenc, Self::Amf, Self::Qsv, Self::X264],
            Self::Nvenc => &[Self::Nvenc],
            Self::Amf => &[Self::Amf],
            Self::Qsv => &[Self::Qsv],
            Self::X264 => &[Self::X264],
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Nvenc | Self::Amf | Self::Qsv)
    }
}

/// Encoder quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    /// Fast encoding, lower quality
    Fast,
    /// Balanced encoding (default)
    #[default]
    Medium,
    /// Slower encoding, better quality
    Slow,
    /// Best quality, slowest encoding
    Quality,
}

impl EncoderPreset {
    /// NVENC p-preset name
    pub fn nvenc_preset(&self) -> &'static str {
        match self {
            Self::Fast => "p1",
            Self::Medium => "p4",
            Self::Slow => "p6",
            Self::Quality => "p7",
        }
    }

    /// x264 preset name
    pub fn x264_preset(&self) -> &'static str {
        match self {
            Self::Fast => "veryfast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Quality => "slower",
        }
    }
}

/// Rate control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateControlMode {
    /// Constant bitrate with a VBV buffer
    #[default]
    Cbr,
    /// Variable bitrate: target + max + buffer
    Vbr,
    /// Constant rate factor (software encoders only)
    Crf,
    /// Constant quantizer (hardware encoders only)
    Cqp,
}

/// Timebase the encoder stamps packets in, fixed at configure time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimebaseUnit {
    /// `{1, 1_000_000}`
    #[default]
    Micros,
    /// One tick per frame: `{fps_den, fps_num}`
    FrameRate,
}

/// Video encoder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Coded width in pixels (must be even)
    pub width: u32,
    /// Coded height in pixels (must be even)
    pub height: u32,
    /// Frame rate numerator (e.g. 60000 for 59.94)
    pub fps_num: u32,
    /// Frame rate denominator (e.g. 1001 for 59.94)
    pub fps_den: u32,
    /// Which encoder implementation to use
    pub encoder: EncoderKind,
    /// Quality preset
    pub preset: EncoderPreset,
    /// Rate control mode
    pub rate_control: RateControlMode,
    /// Target bitrate in kbps (CBR/VBR)
    pub bitrate: u32,
    /// Maximum bitrate in kbps (VBR)
    pub max_bitrate: u32,
    /// VBV buffer size in kbit
    pub buffer_size: u32,
    /// Constant rate factor (CRF)
    pub crf: u8,
    /// Constant quantizer (CQP)
    pub qp: u8,
    /// Keyframe interval in seconds
    pub keyframe_interval_secs: u32,
    /// Number of B-frames between references
    pub b_frames: u32,
    /// H.264 profile name
    pub profile: String,
    /// Encoder thread count, 0 = encoder default (software only)
    pub threads: u32,
    /// Tune for low latency
    pub low_latency: bool,
    /// Packet timestamp timebase
    pub timebase: TimebaseUnit,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps_num: 30,
            fps_den: 1,
            encoder: EncoderKind::Auto,
            preset: EncoderPreset::Medium,
            rate_control: RateControlMode::Cbr,
            bitrate: 6000,
            max_bitrate: 6000,
            buffer_size: 6000,
            crf: 23,
            qp: 23,
            keyframe_interval_secs: 2,
            b_frames: 0,
            profile: "high".to_string(),
            threads: 0,
            low_latency: false,
            timebase: TimebaseUnit::Micros,
        }
    }
}

impl EncoderSettings {
    /// Frames per second as a float
    pub fn fps(&self) -> f64 {
        self.fps_num as f64 / self.fps_den.max(1) as f64
    }

    /// One tick per frame: `{fps_den, fps_num}`
    pub fn frame_timebase(&self) -> Timebase {
        Timebase::new(self.fps_den as i32, self.fps_num as i32)
    }

    /// The timebase packets are stamped in
    pub fn packet_timebase(&self) -> Timebase {
        match self.timebase {
            TimebaseUnit::Micros => Timebase::MICROS,
            TimebaseUnit::FrameRate => self.frame_timebase(),
        }
    }

    /// GOP size in frames
    pub fn gop_size(&self) -> u32 {
        (self.fps().round() as u32).max(1) * self.keyframe_interval_secs.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ArgonError::config("encoder dimensions must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ArgonError::config("encoder dimensions must be even"));
        }
        if self.fps_num == 0 || self.fps_den == 0 {
            return Err(ArgonError::config("frame rate must be positive"));
        }
        match self.rate_control {
            RateControlMode::Cbr | RateControlMode::Vbr => {
                if self.bitrate == 0 {
                    return Err(ArgonError::config("bitrate must be positive"));
                }
            }
            RateControlMode::Crf => {
                if self.crf > 51 {
                    return Err(ArgonError::config("crf must be in 0..=51"));
                }
            }
            RateControlMode::Cqp => {
                if self.qp > 51 {
                    return Err(ArgonError::config("qp must be in 0..=51"));
                }
            }
        }
        Ok(())
    }
}

/// Well-known ingest services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamService {
    /// Use `StreamSettings::url` as-is
    #[default]
    Custom,
    Twitch,
    YouTube,
}

impl StreamService {
    /// Ingest base URL for the service, `None` for `Custom`
    pub fn ingest_url(&self) -> Option<&'static str> {
        match self {
            Self::Custom => None,
            Self::Twitch => Some("rtmp://live.twitch.tv/app"),
            Self::YouTube => Some("rtmp://a.rtmp.youtube.com/live2"),
        }
    }
}

/// Reconnection policy for the transmitter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay between attempts in seconds
    pub delay_secs: f64,
    /// Maximum attempts before entering the terminal error state, 0 = infinite
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.delay_secs.max(0.0))
    }

    /// Whether `attempts` failures exhaust the budget
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Stream output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Ingest service preset; overrides `url` unless `Custom`
    pub service: StreamService,
    /// Ingest base URL (rtmp:// or rtmps://)
    pub url: String,
    /// Stream key appended to the URL; may be empty
    pub stream_key: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u32,
    /// TCP send buffer size in bytes
    pub send_buffer_size: usize,
    /// Reconnection policy
    pub reconnect: ReconnectPolicy,
    /// Frame rate used for default packet durations
    pub fps_num: u32,
    pub fps_den: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            service: StreamService::Custom,
            url: String::new(),
            stream_key: String::new(),
            connect_timeout_secs: 10,
            send_buffer_size: 1 << 20,
            reconnect: ReconnectPolicy::default(),
            fps_num: 30,
            fps_den: 1,
        }
    }
}

impl StreamSettings {
    /// Base URL after applying the service preset
    pub fn base_url(&self) -> &str {
        self.service.ingest_url().unwrap_or(&self.url)
    }

    /// Full ingest URL: base + separator + stream key (empty key allowed)
    pub fn full_url(&self) -> String {
        let base = self.base_url().trim_end_matches('/');
        if self.stream_key.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, self.stream_key)
        }
    }

    /// One frame duration in `{fps_den, fps_num}` ticks
    pub fn frame_timebase(&self) -> Timebase {
        Timebase::new(self.fps_den.max(1) as i32, self.fps_num.max(1) as i32)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url().is_empty() {
            return Err(ArgonError::config("no stream URL configured"));
        }
        Ok(())
    }
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Canvas width in pixels
    pub canvas_width: u32,
    /// Canvas height in pixels
    pub canvas_height: u32,
    /// Render loop target fps
    pub fps: f64,
    /// Canvas background color
    pub background: Color,
    /// Encoder profile
    pub encoder: EncoderSettings,
    /// Sink settings
    pub stream: StreamSettings,
    /// Render→encoder queue capacity (~0.5 s at 60 fps)
    pub encoder_queue_size: usize,
    /// Encoder→transmitter queue capacity (~5 s at 60 fps)
    pub stream_queue_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            canvas_width: 1920,
            canvas_height: 1080,
            fps: 30.0,
            background: Color::BLACK,
            encoder: EncoderSettings::default(),
            stream: StreamSettings::default(),
            encoder_queue_size: 30,
            stream_queue_size: 300,
        }
    }
}

/// Express a float frame rate as an `fps_num/fps_den` rational.
///
/// Integer rates map to `{n, 1}`; NTSC-style rates (29.97, 59.94, ...) map
/// to the conventional `{n*1000, 1001}` pair; anything else is approximated
/// over a denominator of 1000.
pub fn fps_to_rational(fps: f64) -> (u32, u32) {
    if fps <= 0.0 {
        return (30, 1);
    }
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        return (rounded as u32, 1);
    }
    let ntsc_base = (fps * 1001.0 / 1000.0).round();
    if (fps - ntsc_base * 1000.0 / 1001.0).abs() < 1e-3 {
        return ((ntsc_base as u32) * 1000, 1001);
    }
    (((fps * 1000.0).round()) as u32, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(EncoderSettings::default().validate().is_ok());
    }

    #[test]
    fn odd_dimensions_rejected() {
        let settings = EncoderSettings {
            width: 321,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn gop_size_from_keyframe_interval() {
        let settings = EncoderSettings {
            fps_num: 60,
            fps_den: 1,
            keyframe_interval_secs: 2,
            ..Default::default()
        };
        assert_eq!(settings.gop_size(), 120);
    }

    #[test]
    fn fps_rational_mapping() {
        assert_eq!(fps_to_rational(30.0), (30, 1));
        assert_eq!(fps_to_rational(60.0), (60, 1));
        assert_eq!(fps_to_rational(59.94), (60000, 1001));
        assert_eq!(fps_to_rational(29.97), (30000, 1001));
    }

    #[test]
    fn full_url_composition() {
        let settings = StreamSettings {
            url: "rtmp://example.com/live/".to_string(),
            stream_key: "abc123".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.full_url(), "rtmp://example.com/live/abc123");

        let no_key = StreamSettings {
            url: "rtmp://example.com/live".to_string(),
            ..Default::default()
        };
        assert_eq!(no_key.full_url(), "rtmp://example.com/live");
    }

    #[test]
    fn service_preset_overrides_url() {
        let settings = StreamSettings {
            service: StreamService::Twitch,
            url: "rtmp://ignored".to_string(),
            stream_key: "key".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.full_url(), "rtmp://live.twitch.tv/app/key");
    }

    #[test]
    fn reconnect_budget() {
        let policy = ReconnectPolicy {
            delay_secs: 0.1,
            max_attempts: 3,
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
        let infinite = ReconnectPolicy {
            delay_secs: 0.1,
            max_attempts: 0,
        };
        assert!(!infinite.exhausted(1_000_000));
    }
}
