//! Pipeline controller.
//!
//! An explicit value owning the five stages — source registry, scenes,
//! render loop, encoder, transmitter — created by the host and injected
//! wherever needed; there are no process-wide singletons. The controller
//! starts and stops stages in dependency order and aggregates their
//! statistics.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{fps_to_rational, EncoderSettings, PipelineSettings, StreamSettings};
use crate::encode::{default_backends, Encoder, EncoderBackend, EncoderStats};
use crate::error::{ArgonError, Result};
use crate::events::{EventHub, PipelineEvent};
use crate::render::{PreviewTap, RenderLoop, RenderStats};
use crate::scene::Scene;
use crate::source::{Source, SourceRegistry};
use crate::stream::{RtmpConnector, SinkConnector, StreamState, StreamStats, Transmitter};
use crate::types::Handle;

/// Aggregated statistics of all stages
#[derive(Debug, Clone)]
pub struct PipelineStatistics {
    pub render: RenderStats,
    pub encoder: EncoderStats,
    pub stream: StreamStats,
}

impl std::fmt::Display for PipelineStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "render {:.1}/{:.0} fps ({} frames, {} late), encoder {} ({} encoded, {} dropped, {} bytes), stream {} ({} packets, {} dropped, {} reconnects)",
            self.render.current_fps,
            self.render.target_fps,
            self.render.frames_rendered,
            self.render.late_ticks,
            self.encoder.backend.as_deref().unwrap_or("-"),
            self.encoder.frames_encoded,
            self.encoder.frames_dropped,
            self.encoder.bytes_encoded,
            self.stream.state,
            self.stream.packets_written,
            self.stream.dropped_packets,
            self.stream.reconnects,
        )
    }
}

/// The live compositing and transmission pipeline
pub struct Pipeline {
    settings: Mutex<PipelineSettings>,
    sources: SourceRegistry,
    scenes: Mutex<Vec<Arc<Scene>>>,
    active_scene: Mutex<Option<Arc<Scene>>>,
    render: RenderLoop,
    encoder: Encoder,
    transmitter: Transmitter,
    events: EventHub,
}

impl Pipeline {
    /// Pipeline with the production FFmpeg backends and RTMP sink
    pub fn new(settings: PipelineSettings) -> Self {
        let backends = default_backends(settings.encoder.encoder);
        Self::with_components(settings, backends, Box::new(RtmpConnector))
    }

    /// Pipeline with injected encoder backends and sink connector.
    ///
    /// The backend set and the sink are fixed for the pipeline's lifetime;
    /// this is also the seam tests use to substitute mock stages.
    pub fn with_components(
        settings: PipelineSettings,
        backends: Vec<Box<dyn EncoderBackend>>,
        connector: Box<dyn SinkConnector>,
    ) -> Self {
        let events = EventHub::default();
        let render = RenderLoop::new(
            settings.fps,
            (settings.canvas_width, settings.canvas_height),
            settings.background,
            events.clone(),
        );
        let encoder = Encoder::new(
            settings.encoder.clone(),
            settings.encoder_queue_size,
            backends,
            events.clone(),
        );
        let transmitter = Transmitter::new(
            settings.stream.clone(),
            settings.stream_queue_size,
            connector,
            events.clone(),
        );

        let pipeline = Self {
            settings: Mutex::new(settings),
            sources: SourceRegistry::new(events.clone()),
            scenes: Mutex::new(Vec::new()),
            active_scene: Mutex::new(None),
            render,
            encoder,
            transmitter,
            events,
        };

        // At least one scene always exists
        let first = pipeline.create_scene("Scene 1");
        pipeline
            .set_active_scene(first)
            .expect("default scene exists");
        pipeline
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> EventHub {
        self.events.clone()
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    pub fn register_source(&self, source: Arc<dyn Source>) -> Result<Handle> {
        self.sources.register(source)
    }

    pub fn source(&self, id: Handle) -> Option<Arc<dyn Source>> {
        self.sources.get(id)
    }

    /// Remove a source. Refused while any layer still references it, so a
    /// source shared across layers is only shut down once unreferenced.
    pub fn remove_source(&self, id: Handle) -> Result<()> {
        let in_use = self
            .scenes
            .lock()
            .iter()
            .any(|scene| scene.references_source(id));
        if in_use {
            return Err(ArgonError::config(format!(
                "source {id} is still referenced by a layer"
            )));
        }
        self.sources.remove(id)
    }

    pub fn source_ids(&self) -> Vec<Handle> {
        self.sources.ids()
    }

    // ------------------------------------------------------------------
    // Scenes
    // ------------------------------------------------------------------

    pub fn create_scene(&self, name: impl Into<String>) -> Handle {
        let mut scenes = self.scenes.lock();
        let mut name = name.into();
        if name.is_empty() {
            name = format!("Scene {}", scenes.len() + 1);
        }
        let settings = self.settings.lock();
        let scene = Arc::new(Scene::new(
            name,
            (settings.canvas_width, settings.canvas_height),
            settings.background,
        ));
        let id = scene.id();
        scenes.push(scene);
        id
    }

    /// Remove a scene; the last remaining scene cannot be removed
    pub fn remove_scene(&self, id: Handle) -> Result<()> {
        let mut scenes = self.scenes.lock();
        if scenes.len() <= 1 {
            return Err(ArgonError::config("cannot remove the last scene"));
        }
        let index = scenes
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| ArgonError::config(format!("unknown scene {id}")))?;
        scenes.remove(index);

        let mut active = self.active_scene.lock();
        if active.as_ref().map(|s| s.id()) == Some(id) {
            let replacement = scenes.first().cloned();
            *active = replacement.clone();
            self.render.set_active_scene(replacement);
        }
        Ok(())
    }

    pub fn set_active_scene(&self, id: Handle) -> Result<()> {
        let scene = self
            .scene(id)
            .ok_or_else(|| ArgonError::config(format!("unknown scene {id}")))?;
        *self.active_scene.lock() = Some(Arc::clone(&scene));
        self.render.set_active_scene(Some(scene));
        Ok(())
    }

    pub fn active_scene(&self) -> Option<Arc<Scene>> {
        self.active_scene.lock().clone()
    }

    pub fn scene(&self, id: Handle) -> Option<Arc<Scene>> {
        self.scenes.lock().iter().find(|s| s.id() == id).cloned()
    }

    pub fn scene_by_name(&self, name: &str) -> Option<Arc<Scene>> {
        self.scenes.lock().iter().find(|s| s.name() == name).cloned()
    }

    pub fn scene_ids(&self) -> Vec<Handle> {
        self.scenes.lock().iter().map(|s| s.id()).collect()
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.lock().len()
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Change the canvas resolution. Propagates to every scene and the
    /// encoder profile; refused while the encoder is running.
    pub fn set_canvas(&self, width: u32, height: u32) -> Result<()> {
        if self.encoder.is_running() {
            return Err(ArgonError::config(
                "cannot change the canvas while streaming",
            ));
        }
        let encoder_settings = {
            let mut settings = self.settings.lock();
            settings.canvas_width = width;
            settings.canvas_height = height;
            settings.encoder.width = width;
            settings.encoder.height = height;
            settings.encoder.clone()
        };
        self.encoder.configure(encoder_settings)?;
        self.render.set_canvas(width, height);
        for scene in self.scenes.lock().iter() {
            scene.set_canvas_size((width, height));
        }
        Ok(())
    }

    /// Change the target frame rate for rendering and encoding
    pub fn set_fps(&self, fps: f64) -> Result<()> {
        if self.encoder.is_running() {
            return Err(ArgonError::config("cannot change fps while streaming"));
        }
        let (num, den) = fps_to_rational(fps);
        let encoder_settings = {
            let mut settings = self.settings.lock();
            settings.fps = fps;
            settings.encoder.fps_num = num;
            settings.encoder.fps_den = den;
            settings.stream.fps_num = num;
            settings.stream.fps_den = den;
            settings.encoder.clone()
        };
        self.encoder.configure(encoder_settings)?;
        let stream_settings = self.settings.lock().stream.clone();
        self.transmitter.configure(stream_settings)?;
        self.render.set_fps(fps);
        Ok(())
    }

    /// Replace the encoder profile; refused while the encoder is running
    pub fn set_encoder(&self, encoder: EncoderSettings) -> Result<()> {
        self.encoder.configure(encoder.clone())?;
        self.settings.lock().encoder = encoder;
        Ok(())
    }

    /// Set the ingest URL and stream key
    pub fn set_sink(&self, url: impl Into<String>, stream_key: impl Into<String>) -> Result<()> {
        let stream_settings = {
            let mut settings = self.settings.lock();
            settings.stream.service = crate::config::StreamService::Custom;
            settings.stream.url = url.into();
            settings.stream.stream_key = stream_key.into();
            settings.stream.clone()
        };
        self.transmitter.configure(stream_settings)
    }

    /// Replace the full stream settings
    pub fn set_stream(&self, stream: StreamSettings) -> Result<()> {
        self.transmitter.configure(stream.clone())?;
        self.settings.lock().stream = stream;
        Ok(())
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings.lock().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the render loop; the preview tap begins receiving frames
    pub fn start_preview(&self) -> Result<()> {
        self.render.start()
    }

    pub fn stop_preview(&self) {
        self.render.stop()
    }

    pub fn preview(&self) -> &PreviewTap {
        self.render.preview()
    }

    /// Bring up the full chain: encoder backend, stream connection, packet
    /// wiring, encoder feed. The render loop is started if it was not
    /// already; preview cadence is unaffected by streaming.
    pub fn start_stream(&self) -> Result<()> {
        if self.transmitter.state() != StreamState::Stopped {
            return Ok(());
        }

        self.encoder.start()?;
        let params = self
            .encoder
            .codec_parameters()
            .ok_or_else(|| ArgonError::init("encoder produced no codec parameters"))?;
        self.transmitter.set_codec_parameters(params);
        self.encoder
            .set_packet_callback(self.transmitter.packet_sink());

        if let Err(e) = self.transmitter.start() {
            self.encoder.clear_packet_callback();
            self.encoder.stop();
            return Err(e);
        }

        self.render.set_encoder_feed(Some(self.encoder.frame_sink()));
        self.render.start()?;
        info!("Stream started");
        Ok(())
    }

    /// Tear the chain down in reverse order: stop the encoder feed, flush
    /// the encoder into the transmitter, drain and close the connection.
    /// The render loop and preview keep running. Idempotent.
    pub fn stop_stream(&self) {
        self.render.set_encoder_feed(None);
        self.encoder.stop();
        self.transmitter.stop();
        self.encoder.clear_packet_callback();
    }

    pub fn is_streaming(&self) -> bool {
        self.transmitter.is_streaming()
    }

    pub fn stream_state(&self) -> StreamState {
        self.transmitter.state()
    }

    /// Stop everything: stream chain, render loop, sources. Idempotent.
    pub fn shutdown(&self) {
        self.stop_stream();
        self.render.stop();
        self.sources.shutdown_all();
    }

    // ------------------------------------------------------------------
    // Statistics & stage access
    // ------------------------------------------------------------------

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            render: self.render.statistics(),
            encoder: self.encoder.statistics(),
            stream: self.transmitter.statistics(),
        }
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
