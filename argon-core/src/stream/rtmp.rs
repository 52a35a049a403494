//! FLV-over-RTMP stream writer via FFmpeg.
//!
//! Opens an `flv` output context for the ingest URL, writes the stream
//! header from the codec parameters (including SPS/PPS extradata), then
//! writes interleaved packets in the `{1, 1000}` stream timebase. A plain
//! file path also works, which is how the tests read the muxed stream back.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::Id;
use ffmpeg_next::format::{self, context::Output};
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, info};

use crate::config::StreamSettings;
use crate::error::{ArgonError, Result};
use crate::stream::sink::{SinkConnector, StreamWriter};
use crate::stream::STREAM_TIMEBASE;
use crate::types::{CodecParameters, Packet};

/// Production connector: FLV mux over RTMP/RTMPS (or to a file path)
pub struct RtmpConnector;

impl SinkConnector for RtmpConnector {
    fn connect(
        &self,
        url: &str,
        params: &CodecParameters,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamWriter>> {
        Ok(Box::new(FlvWriter::open(url, params, settings)?))
    }
}

pub struct FlvWriter {
    output: Output,
    stream_index: usize,
    finished: bool,
}

impl FlvWriter {
    pub fn open(url: &str, params: &CodecParameters, settings: &StreamSettings) -> Result<Self> {
        ffmpeg::init().map_err(|e| ArgonError::init(format!("FFmpeg init failed: {e}")))?;

        let mut options = Dictionary::new();
        if url.starts_with("rtmp://") || url.starts_with("rtmps://") {
            let timeout_us = settings.connect_timeout_secs as u64 * 1_000_000;
            options.set("timeout", &timeout_us.to_string());
            options.set("buffer_size", &settings.send_buffer_size.to_string());
            options.set("rtmp_live", "live");
            // 1 second server-side buffer hint
            options.set("rtmp_buffer", "1000");
        }

        let mut output = format::output_as_with(&url, "flv", options)
            .map_err(|e| ArgonError::stream(format!("failed to open stream output: {e}")))?;

        {
            let mut stream = output
                .add_stream(Id::H264)
                .map_err(|e| ArgonError::stream(format!("failed to add video stream: {e}")))?;

            let codec_par = stream.parameters();
            // SAFETY: rust-ffmpeg exposes no setters for codec parameters.
            // The pointer comes from the stream we just created and stays
            // valid for its lifetime; we only write standard field values,
            // and the extradata buffer is allocated with av_mallocz so the
            // muxer can take ownership and free it.
            unsafe {
                let ptr = codec_par.as_ptr() as *mut ffmpeg::ffi::AVCodecParameters;
                (*ptr).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*ptr).codec_id = Id::H264.into();
                (*ptr).width = params.width as i32;
                (*ptr).height = params.height as i32;
                (*ptr).bit_rate = params.bitrate as i64 * 1000;
                if let Some(extradata) = &params.extradata {
                    let size = extradata.len();
                    let buf = ffmpeg::ffi::av_mallocz(
                        size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                    ) as *mut u8;
                    if !buf.is_null() {
                        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, size);
                        (*ptr).extradata = buf;
                        (*ptr).extradata_size = size as i32;
                    }
                }
            }

            stream.set_time_base(Rational::new(STREAM_TIMEBASE.num, STREAM_TIMEBASE.den));
        }

        let stream_index = output.nb_streams() as usize - 1;

        output
            .write_header()
            .map_err(|e| ArgonError::stream(format!("failed to write stream header: {e}")))?;

        info!(
            "Stream header written: {}x{} H.264 @ {} kbps, extradata {} bytes",
            params.width,
            params.height,
            params.bitrate,
            params.extradata.as_ref().map_or(0, Vec::len)
        );

        Ok(Self {
            output,
            stream_index,
            finished: false,
        })
    }
}

impl StreamWriter for FlvWriter {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut pkt = ffmpeg::Packet::copy(&packet.data);
        pkt.set_stream(self.stream_index);
        pkt.set_pts(Some(packet.pts));
        pkt.set_dts(Some(packet.dts));
        pkt.set_duration(packet.duration);
        if packet.keyframe {
            pkt.set_flags(ffmpeg::packet::Flags::KEY);
        }
        pkt.write_interleaved(&mut self.output)
            .map_err(|e| ArgonError::stream(format!("failed to write packet: {e}")))
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.output
            .write_trailer()
            .map_err(|e| ArgonError::stream(format!("failed to write trailer: {e}")))?;
        debug!("stream trailer written");
        Ok(())
    }
}
