//! Sink seam between the transmitter and the wire.
//!
//! The transmitter owns timestamp rescaling and the reconnect state machine;
//! a connector only knows how to open a writer for a URL and push packets
//! whose timestamps are already in the stream timebase. Any consumer that
//! accepts the packet contract is a valid sink — production uses
//! FLV-over-RTMP, tests use collecting or flaky connectors.

use crate::config::StreamSettings;
use crate::error::Result;
use crate::types::{CodecParameters, Packet};

/// An open stream connection
pub trait StreamWriter: Send {
    /// Write one packet. Timestamps are in the stream timebase `{1, 1000}`.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Write the trailer and close the connection
    fn finish(&mut self) -> Result<()>;
}

/// Opens stream connections for the transmitter
pub trait SinkConnector: Send + Sync {
    /// Open a connection, negotiate, and write the stream header from the
    /// codec parameters. Every error is treated as a transient connect
    /// failure by the reconnect policy.
    fn connect(
        &self,
        url: &str,
        params: &CodecParameters,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamWriter>>;
}
