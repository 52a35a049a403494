//! Pipeline event fan-out.
//!
//! Stages publish plain-data events into a broadcast channel; any number of
//! observers (UI, logging, tests) subscribe. Events never carry references
//! into stage-internal state.

use tokio::sync::broadcast;

use crate::stream::StreamState;
use crate::types::Handle;

/// Events emitted by the pipeline stages
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The render loop started ticking
    RenderStarted,
    /// The render loop exited
    RenderStopped,
    /// The encoder selected a backend and is accepting frames
    EncoderReady { backend: String },
    /// The encoder flushed and released its backend
    EncoderStopped,
    /// The transmitter state machine moved
    StreamStateChanged(StreamState),
    /// The transmitter established a connection
    StreamConnected,
    /// The transmitter closed its connection
    StreamDisconnected { reason: String },
    /// A reconnection attempt is in progress
    StreamReconnecting { attempt: u32 },
    /// A transmission error occurred (terminal when state is `Error`)
    StreamError { message: String },
    /// A source's capture target disappeared and the source quiesced
    SourceClosed { source: Handle },
}

/// Shared broadcast hub for pipeline events.
///
/// Cloning the hub is cheap; all clones publish into the same channel.
/// Slow subscribers lag and lose old events rather than blocking a stage.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; lack of subscribers is not an error
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        hub.emit(PipelineEvent::RenderStarted);
        match rx.try_recv() {
            Ok(PipelineEvent::RenderStarted) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let hub = EventHub::new(8);
        hub.emit(PipelineEvent::EncoderStopped);
    }
}
