//! Encoder backend contract.
//!
//! The encoder stage drives a closed set of backends registered at
//! construction time. On start it probes them in order and opens the first
//! one whose codec is available.

use serde::{Deserialize, Serialize};

use crate::config::{EncoderSettings, RateControlMode};
use crate::error::{ArgonError, Result};
use crate::types::{CodecParameters, Frame, Packet};

/// Whether a backend encodes on a GPU or in software
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Hardware,
    Software,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "hardware"),
            Self::Software => write!(f, "software"),
        }
    }
}

/// A concrete encoder implementation the stage can open
pub trait EncoderBackend: Send + Sync {
    /// Encoder name, e.g. `h264_nvenc`
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Whether the codec reports available on this machine
    fn is_available(&self) -> bool;

    /// Open an encode session for the given settings
    fn open(&self, settings: &EncoderSettings) -> Result<Box<dyn EncoderSession>>;
}

/// An open encode session, owned by the encoder worker thread
pub trait EncoderSession: Send {
    /// Encode one frame. The codec may return zero, one or more packets
    /// (B-frames, look-ahead).
    fn encode(&mut self, frame: &Frame, pts: i64) -> Result<Vec<Packet>>;

    /// Signal end of stream and drain the remaining packets
    fn flush(&mut self) -> Result<Vec<Packet>>;

    /// Parameters the transmitter needs to write the stream header
    fn codec_parameters(&self) -> CodecParameters;
}

/// Refuse rate-control modes the chosen backend cannot honor: CRF is
/// software-only, CQP is hardware-only.
pub fn validate_rate_control(settings: &EncoderSettings, kind: BackendKind) -> Result<()> {
    match (settings.rate_control, kind) {
        (RateControlMode::Crf, BackendKind::Hardware) => Err(ArgonError::config(
            "CRF rate control requires a software encoder",
        )),
        (RateControlMode::Cqp, BackendKind::Software) => Err(ArgonError::config(
            "CQP rate control requires a hardware encoder",
        )),
        _ => Ok(()),
    }
}
