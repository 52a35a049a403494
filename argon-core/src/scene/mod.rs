//! Scenes and layer stacks.
//!
//! A scene is an ordered, mutable collection of layers, each wrapping one
//! source with a transform, blend mode and state flags. Index 0 is the
//! bottom layer. Mutations come from the control thread while exactly one
//! renderer reads the scene; all public operations take a scene-wide lock,
//! and the renderer works from a [`SceneSnapshot`] so the lock is never held
//! across a source's `latest_frame` call.

mod transform;

pub use transform::{Mat2x3, Transform};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{ArgonError, Result};
use crate::source::Source;
use crate::types::{Color, Handle};

/// Blend mode for layer compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Source-over alpha blending
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    /// Plus-lighter
    Additive,
}

struct Layer {
    id: Handle,
    name: String,
    source_id: Handle,
    source: Weak<dyn Source>,
    transform: Transform,
    blend: BlendMode,
    visible: bool,
    locked: bool,
}

/// Clone-out view of a layer for queries
#[derive(Debug, Clone)]
pub struct LayerView {
    pub id: Handle,
    pub name: String,
    pub source_id: Handle,
    pub transform: Transform,
    pub blend: BlendMode,
    pub visible: bool,
    pub locked: bool,
}

/// Immutable picture of a scene taken under the lock, composited lock-free
#[derive(Clone)]
pub struct SceneSnapshot {
    pub canvas_size: (u32, u32),
    pub background: Color,
    /// Visible layers, bottom to top
    pub layers: Vec<LayerSnapshot>,
}

#[derive(Clone)]
pub struct LayerSnapshot {
    pub id: Handle,
    pub transform: Transform,
    pub blend: BlendMode,
    pub source: Weak<dyn Source>,
}

struct SceneState {
    name: String,
    canvas_size: (u32, u32),
    background: Color,
    layers: Vec<Layer>,
}

/// An ordered stack of layers rendered onto a canvas
pub struct Scene {
    id: Handle,
    state: Mutex<SceneState>,
}

impl Scene {
    pub fn new(name: impl Into<String>, canvas_size: (u32, u32), background: Color) -> Self {
        Self {
            id: Handle::new(),
            state: Mutex::new(SceneState {
                name: name.into(),
                canvas_size,
                background,
                layers: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> Handle {
        self.id
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.state.lock().name = name.into();
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.state.lock().canvas_size
    }

    pub fn set_canvas_size(&self, size: (u32, u32)) {
        self.state.lock().canvas_size = size;
    }

    pub fn background(&self) -> Color {
        self.state.lock().background
    }

    pub fn set_background(&self, color: Color) {
        self.state.lock().background = color;
    }

    // ------------------------------------------------------------------
    // Layer management
    // ------------------------------------------------------------------

    /// Append a layer on top of the stack, returning its id.
    ///
    /// The layer holds only a weak handle to the source; the source registry
    /// keeps it alive.
    pub fn add_layer(
        &self,
        name: impl Into<String>,
        source_id: Handle,
        source: &Arc<dyn Source>,
    ) -> Handle {
        let id = Handle::new();
        let name = name.into();
        debug!("Layer added: {name} ({id})");
        self.state.lock().layers.push(Layer {
            id,
            name,
            source_id,
            source: Arc::downgrade(source),
            transform: Transform::default(),
            blend: BlendMode::Normal,
            visible: true,
            locked: false,
        });
        id
    }

    /// Remove a layer; removing it destroys it
    pub fn remove_layer(&self, id: Handle) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| ArgonError::render(format!("unknown layer {id}")))?;
        state.layers.remove(index);
        Ok(())
    }

    /// Move a layer from one stack index to another
    pub fn move_layer(&self, from: usize, to: usize) -> Result<()> {
        let mut state = self.state.lock();
        let len = state.layers.len();
        if from >= len || to >= len {
            return Err(ArgonError::render(format!(
                "layer index out of range: {from} -> {to} (len {len})"
            )));
        }
        let layer = state.layers.remove(from);
        state.layers.insert(to, layer);
        Ok(())
    }

    /// Move a layer to the top of the stack
    pub fn bring_to_front(&self, id: Handle) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| ArgonError::render(format!("unknown layer {id}")))?;
        let layer = state.layers.remove(index);
        state.layers.push(layer);
        Ok(())
    }

    /// Move a layer to the bottom of the stack
    pub fn send_to_back(&self, id: Handle) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| ArgonError::render(format!("unknown layer {id}")))?;
        let layer = state.layers.remove(index);
        state.layers.insert(0, layer);
        Ok(())
    }

    /// Remove all layers
    pub fn clear(&self) {
        self.state.lock().layers.clear();
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn layer_count(&self) -> usize {
        self.state.lock().layers.len()
    }

    /// Layer ids in stack order, bottom to top
    pub fn layer_ids(&self) -> Vec<Handle> {
        self.state.lock().layers.iter().map(|l| l.id).collect()
    }

    pub fn layer(&self, id: Handle) -> Option<LayerView> {
        self.state
            .lock()
            .layers
            .iter()
            .find(|l| l.id == id)
            .map(view)
    }

    pub fn layers(&self) -> Vec<LayerView> {
        self.state.lock().layers.iter().map(view).collect()
    }

    pub fn layer_by_name(&self, name: &str) -> Option<LayerView> {
        self.state
            .lock()
            .layers
            .iter()
            .find(|l| l.name == name)
            .map(view)
    }

    /// Whether any layer references the given source
    pub fn references_source(&self, source_id: Handle) -> bool {
        self.state
            .lock()
            .layers
            .iter()
            .any(|l| l.source_id == source_id)
    }

    // ------------------------------------------------------------------
    // Per-layer setters
    // ------------------------------------------------------------------

    pub fn set_layer_name(&self, id: Handle, name: impl Into<String>) -> Result<()> {
        self.with_layer(id, |layer| {
            layer.name = name.into();
            Ok(())
        })
    }

    /// Replace the whole transform. Rejected while the layer is locked.
    pub fn set_layer_transform(&self, id: Handle, transform: Transform) -> Result<()> {
        self.with_unlocked_layer(id, |layer| {
            layer.transform = transform;
            layer.transform.opacity = layer.transform.opacity.clamp(0.0, 1.0);
        })
    }

    pub fn set_layer_position(&self, id: Handle, x: f64, y: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| layer.transform.position = (x, y))
    }

    pub fn set_layer_size(&self, id: Handle, w: f64, h: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| layer.transform.size = (w, h))
    }

    pub fn set_layer_rotation(&self, id: Handle, degrees: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| layer.transform.rotation_deg = degrees)
    }

    pub fn set_layer_scale(&self, id: Handle, sx: f64, sy: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| layer.transform.scale = (sx, sy))
    }

    pub fn set_layer_anchor(&self, id: Handle, ax: f64, ay: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| {
            layer.transform.anchor = (ax.clamp(0.0, 1.0), ay.clamp(0.0, 1.0))
        })
    }

    pub fn set_layer_flip(&self, id: Handle, flip_h: bool, flip_v: bool) -> Result<()> {
        self.with_unlocked_layer(id, |layer| {
            layer.transform.flip_h = flip_h;
            layer.transform.flip_v = flip_v;
        })
    }

    pub fn set_layer_opacity(&self, id: Handle, opacity: f64) -> Result<()> {
        self.with_unlocked_layer(id, |layer| {
            layer.transform.opacity = opacity.clamp(0.0, 1.0)
        })
    }

    /// Visibility is a state flag, allowed while locked
    pub fn set_layer_visible(&self, id: Handle, visible: bool) -> Result<()> {
        self.with_layer(id, |layer| {
            layer.visible = visible;
            Ok(())
        })
    }

    pub fn set_layer_locked(&self, id: Handle, locked: bool) -> Result<()> {
        self.with_layer(id, |layer| {
            layer.locked = locked;
            Ok(())
        })
    }

    pub fn set_layer_blend(&self, id: Handle, blend: BlendMode) -> Result<()> {
        self.with_layer(id, |layer| {
            layer.blend = blend;
            Ok(())
        })
    }

    /// Point the layer at a different source
    pub fn set_layer_source(
        &self,
        id: Handle,
        source_id: Handle,
        source: &Arc<dyn Source>,
    ) -> Result<()> {
        self.with_layer(id, |layer| {
            layer.source_id = source_id;
            layer.source = Arc::downgrade(source);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Snapshot the visible layers for lock-free compositing
    pub fn snapshot(&self) -> SceneSnapshot {
        let state = self.state.lock();
        SceneSnapshot {
            canvas_size: state.canvas_size,
            background: state.background,
            layers: state
                .layers
                .iter()
                .filter(|l| l.visible)
                .map(|l| LayerSnapshot {
                    id: l.id,
                    transform: l.transform,
                    blend: l.blend,
                    source: l.source.clone(),
                })
                .collect(),
        }
    }

    fn with_layer<R>(&self, id: Handle, f: impl FnOnce(&mut Layer) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        let layer = state
            .layers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| ArgonError::render(format!("unknown layer {id}")))?;
        f(layer)
    }

    fn with_unlocked_layer(&self, id: Handle, f: impl FnOnce(&mut Layer)) -> Result<()> {
        self.with_layer(id, |layer| {
            if layer.locked {
                return Err(ArgonError::config(format!("layer {id} is locked")));
            }
            f(layer);
            Ok(())
        })
    }
}

fn view(layer: &Layer) -> LayerView {
    LayerView {
        id: layer.id,
        name: layer.name.clone(),
        source_id: layer.source_id,
        transform: layer.transform,
        blend: layer.blend,
        visible: layer.visible,
        locked: layer.locked,
    }
}
