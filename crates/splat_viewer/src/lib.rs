//! Seam between the lifecycle controller and a Gaussian-splat rendering engine.
//!
//! The engine itself is opaque: it can be constructed against a mount target,
//! asked to load a scene from a URL, started, and disposed. [`headless`] ships an
//! engine that streams and validates assets without drawing frames.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod headless;
pub mod ply;

pub use headless::{HeadlessViewer, HeadlessViewerFactory, SceneStats};

/// Drawing surface or container the engine attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountTarget(pub String);

impl MountTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Presentation constants handed to every engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    pub camera_up: [f32; 3],
    pub initial_camera_position: [f32; 3],
    pub initial_camera_look_at: [f32; 3],
    /// Splats whose alpha (0-255) falls below this are dropped at load time.
    pub splat_alpha_removal_threshold: u8,
    pub progressive_load: bool,
    pub show_loading_ui: bool,
    pub shared_memory_for_workers: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            camera_up: [0.0, -1.0, 0.0],
            initial_camera_position: [0.0, 0.0, -5.0],
            initial_camera_look_at: [0.0, 0.0, 0.0],
            splat_alpha_removal_threshold: 5,
            progressive_load: true,
            show_loading_ui: true,
            shared_memory_for_workers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    #[error("failed to initialize viewer: {0}")]
    ViewerInit(String),
    #[error("failed to fetch asset: {0}")]
    AssetFetch(String),
    #[error("failed to parse asset: {0}")]
    AssetParse(String),
    #[error("no scene has been loaded")]
    NotLoaded,
}

impl From<ply::PlyError> for ViewerError {
    fn from(value: ply::PlyError) -> Self {
        Self::AssetParse(value.to_string())
    }
}

#[async_trait]
pub trait SplatViewer: Send + Sync {
    /// Resolves once the whole scene has arrived and been parsed. Engines may
    /// render partial geometry before that.
    async fn add_splat_scene(&self, url: &str) -> Result<(), ViewerError>;
    fn start(&self) -> Result<(), ViewerError>;
    /// Releases workers, buffers and listeners. Calling it twice is harmless.
    async fn dispose(&self);
    fn request_fullscreen(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait SplatViewerFactory: Send + Sync {
    async fn create(
        &self,
        mount: &MountTarget,
        options: &ViewerOptions,
    ) -> Result<Arc<dyn SplatViewer>, ViewerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_face_the_scene_from_behind() {
        let options = ViewerOptions::default();
        assert_eq!(options.camera_up, [0.0, -1.0, 0.0]);
        assert_eq!(options.initial_camera_position, [0.0, 0.0, -5.0]);
        assert_eq!(options.splat_alpha_removal_threshold, 5);
        assert!(options.progressive_load);
        assert!(!options.shared_memory_for_workers);
    }

    #[test]
    fn ply_errors_map_to_parse_failures() {
        let err: ViewerError = ply::PlyError::BadMagic.into();
        assert!(matches!(err, ViewerError::AssetParse(_)));
    }
}
