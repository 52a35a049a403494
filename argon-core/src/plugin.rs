//! Plugin contract for pipeline extensions.
//!
//! Sources advertise metadata and capability flags through this contract.
//! Plugin discovery is host-defined; the pipeline only works with a closed
//! set of implementations registered at construction time.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Plugin category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Provides video input (capture devices, generators)
    Source,
    /// Processes frames (color correction, effects)
    Filter,
    /// Handles scene transitions
    Transition,
    /// Handles output destinations
    Output,
    /// Background services
    Service,
}

/// Plugin capability flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const HAS_VIDEO: Capabilities = Capabilities(1 << 0);
    pub const HAS_AUDIO: Capabilities = Capabilities(1 << 1);
    pub const HAS_SETTINGS: Capabilities = Capabilities(1 << 2);
    pub const HAS_PREVIEW: Capabilities = Capabilities(1 << 3);
    pub const SUPPORTS_ASYNC: Capabilities = Capabilities(1 << 4);
    pub const REQUIRES_GPU: Capabilities = Capabilities(1 << 5);
    pub const THREAD_SAFE: Capabilities = Capabilities(1 << 6);

    pub fn contains(&self, flag: Capabilities) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

/// Plugin metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Globally unique dotted identifier, e.g. `argon.source.color`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Brief description
    pub description: String,
    /// Semantic version
    pub version: String,
    /// Author name
    pub author: String,
    /// Support or documentation URL
    pub website: String,
    /// Plugin category
    pub plugin_type: PluginType,
    /// Feature flags
    pub capabilities: Capabilities,
}

impl PluginInfo {
    /// Metadata for a source plugin with the common defaults filled in
    pub fn source(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: "0.1".to_string(),
            author: String::new(),
            website: String::new(),
            plugin_type: PluginType::Source,
            capabilities: Capabilities::HAS_VIDEO,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Base plugin lifecycle.
///
/// `initialize` is called once when the plugin is registered and `shutdown`
/// before it is released. Implementations advertising `THREAD_SAFE` must
/// tolerate calls from any thread.
pub trait Plugin: Send + Sync {
    /// Plugin metadata
    fn info(&self) -> PluginInfo;

    /// One-time setup; device enumeration and resource allocation go here
    fn initialize(&self) -> Result<()>;

    /// Release all resources and stop any threads
    fn shutdown(&self);

    /// Whether the plugin is initialized and usable
    fn is_active(&self) -> bool;

    /// Last error description, if any
    fn last_error(&self) -> Option<String> {
        None
    }
}
