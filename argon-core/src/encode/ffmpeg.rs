//! FFmpeg-backed encoder sessions.
//!
//! One backend per concrete encoder (NVENC, AMF, QSV, libx264). Sessions
//! convert canvas frames to the codec's pixel layout with a fast-bilinear
//! scaler, translate the rate-control settings to encoder options, and open
//! the codec with `GLOBAL_HEADER` so SPS/PPS land in extradata for the
//! stream header.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, Flags};
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, info};

use crate::config::{EncoderKind, EncoderSettings, RateControlMode};
use crate::encode::backend::{BackendKind, EncoderBackend, EncoderSession};
use crate::error::{ArgonError, Result};
use crate::types::{CodecParameters, Frame, FrameData, Packet, PixelFormat};

/// An FFmpeg encoder exposed as a pipeline backend
pub struct FfmpegBackend {
    kind: EncoderKind,
}

impl FfmpegBackend {
    /// `kind` must name a concrete encoder, not `Auto`
    pub fn new(kind: EncoderKind) -> Self {
        debug_assert!(kind.encoder_name().is_some());
        Self { kind }
    }
}

/// The default backend probe order for the configured encoder kind
pub fn default_backends(kind: EncoderKind) -> Vec<Box<dyn EncoderBackend>> {
    kind.candidates()
        .iter()
        .map(|k| Box::new(FfmpegBackend::new(*k)) as Box<dyn EncoderBackend>)
        .collect()
}

/// Whether the named FFmpeg encoder exists in this build
pub fn ffmpeg_encoder_available(name: &str) -> bool {
    ffmpeg::init().ok();
    encoder::find_by_name(name).is_some()
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &str {
        self.kind.encoder_name().unwrap_or("unknown")
    }

    fn kind(&self) -> BackendKind {
        if self.kind.is_hardware() {
            BackendKind::Hardware
        } else {
            BackendKind::Software
        }
    }

    fn is_available(&self) -> bool {
        ffmpeg_encoder_available(self.name())
    }

    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn EncoderSession>> {
        let session = FfmpegSession::open(self.kind, settings)?;
        Ok(Box::new(session))
    }
}

struct FfmpegSession {
    encoder: encoder::Video,
    scaler: Option<scaling::Context>,
    scaler_input: Option<(Pixel, u32, u32)>,
    frame: Video,
    packet: ffmpeg::Packet,
    params: CodecParameters,
    dst_format: Pixel,
}

impl FfmpegSession {
    fn open(kind: EncoderKind, settings: &EncoderSettings) -> Result<Self> {
        ffmpeg::init().map_err(|e| ArgonError::init(format!("FFmpeg init failed: {e}")))?;

        let name = kind
            .encoder_name()
            .ok_or_else(|| ArgonError::config("Auto is not a concrete encoder"))?;
        let codec = encoder::find_by_name(name)
            .ok_or_else(|| ArgonError::init(format!("encoder {name} not found")))?;

        let mut enc = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| ArgonError::init(format!("failed to create encoder context: {e}")))?;

        let timebase = settings.packet_timebase();
        let dst_format = if kind.is_hardware() {
            Pixel::NV12
        } else {
            Pixel::YUV420P
        };

        enc.set_width(settings.width);
        enc.set_height(settings.height);
        enc.set_format(dst_format);
        enc.set_time_base(Rational::new(timebase.num, timebase.den));
        enc.set_frame_rate(Some(Rational::new(
            settings.fps_num as i32,
            settings.fps_den as i32,
        )));
        enc.set_gop(settings.gop_size());
        enc.set_max_b_frames(settings.b_frames as usize);
        // The transmitter writes SPS/PPS into the stream header
        enc.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();

        match settings.rate_control {
            RateControlMode::Cbr => {
                let bps = settings.bitrate as usize * 1000;
                enc.set_bit_rate(bps);
                enc.set_max_bit_rate(bps);
                if kind.is_hardware() {
                    opts.set("rc", "cbr");
                }
            }
            RateControlMode::Vbr => {
                enc.set_bit_rate(settings.bitrate as usize * 1000);
                enc.set_max_bit_rate(settings.max_bitrate.max(settings.bitrate) as usize * 1000);
                if kind.is_hardware() {
                    opts.set("rc", "vbr");
                }
            }
            RateControlMode::Crf => {
                opts.set("crf", &settings.crf.to_string());
            }
            RateControlMode::Cqp => {
                opts.set("rc", "constqp");
                opts.set("qp", &settings.qp.to_string());
            }
        }

        // rust-ffmpeg exposes no safe setter for the VBV buffer or the
        // software thread count; poke the context like the stream writer
        // does for codec parameters.
        unsafe {
            let ptr = enc.as_mut_ptr();
            if matches!(
                settings.rate_control,
                RateControlMode::Cbr | RateControlMode::Vbr
            ) && settings.buffer_size > 0
            {
                (*ptr).rc_buffer_size = settings.buffer_size as i32 * 1000;
                if settings.rate_control == RateControlMode::Cbr {
                    (*ptr).rc_max_rate = settings.bitrate as i64 * 1000;
                }
            }
            if !kind.is_hardware() && settings.threads > 0 {
                (*ptr).thread_count = settings.threads as i32;
            }
        }

        match kind {
            EncoderKind::Nvenc => {
                opts.set("preset", settings.preset.nvenc_preset());
                if settings.low_latency {
                    opts.set("tune", "ll");
                    opts.set("zerolatency", "1");
                }
            }
            EncoderKind::X264 => {
                opts.set("preset", settings.preset.x264_preset());
                if settings.low_latency || settings.b_frames == 0 {
                    opts.set("tune", "zerolatency");
                }
            }
            // AMF and QSV use their driver defaults; their preset grammars
            // are not portable across FFmpeg builds.
            _ => {}
        }

        if !settings.profile.is_empty() {
            opts.set("profile", &settings.profile);
        }

        let opened = enc
            .open_with(opts)
            .map_err(|e| ArgonError::init(format!("failed to open {name}: {e}")))?;

        let extradata = unsafe {
            let ptr = opened.as_ptr();
            let size = (*ptr).extradata_size;
            if size > 0 && !(*ptr).extradata.is_null() {
                Some(std::slice::from_raw_parts((*ptr).extradata, size as usize).to_vec())
            } else {
                None
            }
        };

        info!(
            "{name} opened: {}x{} @ {}/{} fps, {} kbps, tb {timebase}",
            settings.width, settings.height, settings.fps_num, settings.fps_den, settings.bitrate
        );

        let params = CodecParameters {
            width: settings.width,
            height: settings.height,
            bitrate: settings.bitrate,
            extradata,
            timebase,
        };

        Ok(Self {
            encoder: opened,
            scaler: None,
            scaler_input: None,
            frame: Video::new(dst_format, settings.width, settings.height),
            packet: ffmpeg::Packet::empty(),
            params,
            dst_format,
        })
    }

    fn ensure_scaler(&mut self, format: Pixel, width: u32, height: u32) -> Result<()> {
        if self.scaler_input == Some((format, width, height)) {
            return Ok(());
        }
        debug!(
            "creating scaler: {:?} {}x{} -> {:?} {}x{}",
            format,
            width,
            height,
            self.dst_format,
            self.params.width,
            self.params.height
        );
        let scaler = scaling::Context::get(
            format,
            width,
            height,
            self.dst_format,
            self.params.width,
            self.params.height,
            Flags::FAST_BILINEAR,
        )
        .map_err(|e| ArgonError::encoder(format!("failed to create scaler: {e}")))?;
        self.scaler = Some(scaler);
        self.scaler_input = Some((format, width, height));
        Ok(())
    }

    fn receive_packets(&mut self, out: &mut Vec<Packet>) -> Result<()> {
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {
                    let pts = self.packet.pts().unwrap_or(0);
                    out.push(Packet {
                        data: self.packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                        pts,
                        dts: self.packet.dts().unwrap_or(pts),
                        keyframe: self.packet.is_key(),
                        duration: self.packet.duration(),
                        has_extradata: self.params.extradata.is_some(),
                    });
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    return Err(ArgonError::encoder(format!("failed to receive packet: {e}")))
                }
            }
        }
        Ok(())
    }
}

impl EncoderSession for FfmpegSession {
    fn encode(&mut self, frame: &Frame, pts: i64) -> Result<Vec<Packet>> {
        let data = match &frame.data {
            FrameData::Memory(data) => data,
            FrameData::Texture { .. } => {
                return Err(ArgonError::unsupported(
                    "GPU frame encoding requires a CPU copy",
                ))
            }
        };

        let src_format = match frame.format {
            PixelFormat::Bgra8 => Pixel::BGRA,
            PixelFormat::Nv12 => Pixel::NV12,
        };
        self.ensure_scaler(src_format, frame.width, frame.height)?;

        let mut src = Video::new(src_format, frame.width, frame.height);
        copy_into_video(&mut src, frame, data);

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| ArgonError::encoder("no scaler configured"))?;
        scaler
            .run(&src, &mut self.frame)
            .map_err(|e| ArgonError::encoder(format!("scaling failed: {e}")))?;

        self.frame.set_pts(Some(pts));
        self.encoder
            .send_frame(&self.frame)
            .map_err(|e| ArgonError::encoder(format!("failed to send frame: {e}")))?;

        let mut packets = Vec::new();
        self.receive_packets(&mut packets)?;
        Ok(packets)
    }

    fn flush(&mut self) -> Result<Vec<Packet>> {
        self.encoder
            .send_eof()
            .map_err(|e| ArgonError::encoder(format!("failed to send EOF: {e}")))?;
        let mut packets = Vec::new();
        self.receive_packets(&mut packets)?;
        Ok(packets)
    }

    fn codec_parameters(&self) -> CodecParameters {
        self.params.clone()
    }
}

/// Copy a tightly-packed frame into an FFmpeg video frame, honoring the
/// destination plane strides.
fn copy_into_video(dst: &mut Video, frame: &Frame, data: &[u8]) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    match frame.format {
        PixelFormat::Bgra8 => {
            let stride = dst.stride(0);
            let row_bytes = width * 4;
            let plane = dst.data_mut(0);
            for y in 0..height {
                let src_off = y * row_bytes;
                let dst_off = y * stride;
                if src_off + row_bytes <= data.len() && dst_off + row_bytes <= plane.len() {
                    plane[dst_off..dst_off + row_bytes]
                        .copy_from_slice(&data[src_off..src_off + row_bytes]);
                }
            }
        }
        PixelFormat::Nv12 => {
            let luma_stride = dst.stride(0);
            {
                let plane = dst.data_mut(0);
                for y in 0..height {
                    let src_off = y * width;
                    let dst_off = y * luma_stride;
                    if src_off + width <= data.len() && dst_off + width <= plane.len() {
                        plane[dst_off..dst_off + width]
                            .copy_from_slice(&data[src_off..src_off + width]);
                    }
                }
            }
            let chroma_stride = dst.stride(1);
            let chroma_base = width * height;
            let plane = dst.data_mut(1);
            for y in 0..height / 2 {
                let src_off = chroma_base + y * width;
                let dst_off = y * chroma_stride;
                if src_off + width <= data.len() && dst_off + width <= plane.len() {
                    plane[dst_off..dst_off + width]
                        .copy_from_slice(&data[src_off..src_off + width]);
                }
            }
        }
    }
}
