//! Exclusive owner of the one live rendering-engine instance.

use std::sync::Arc;

use splat_viewer::{MountTarget, SplatViewer, SplatViewerFactory, ViewerError, ViewerOptions};
use tracing::{debug, info};

struct ActiveViewer {
    viewer: Arc<dyn SplatViewer>,
    url: String,
    loaded: bool,
}

pub struct ViewerHandle {
    factory: Arc<dyn SplatViewerFactory>,
    mount: MountTarget,
    options: ViewerOptions,
    active: Option<ActiveViewer>,
}

impl ViewerHandle {
    pub fn new(
        factory: Arc<dyn SplatViewerFactory>,
        mount: MountTarget,
        options: ViewerOptions,
    ) -> Self {
        Self {
            factory,
            mount,
            options,
            active: None,
        }
    }

    /// Replaces whatever is held with a fresh engine instance showing `url`.
    ///
    /// The previous instance is disposed before the new one is constructed. A
    /// failed load disposes the new instance too, leaving the handle empty.
    pub async fn load(&mut self, url: &str) -> Result<(), ViewerError> {
        self.dispose().await;

        let viewer = self.factory.create(&self.mount, &self.options).await?;
        self.active = Some(ActiveViewer {
            viewer: Arc::clone(&viewer),
            url: url.to_string(),
            loaded: false,
        });
        debug!(mount = %self.mount.as_str(), %url, "viewer constructed");

        if let Err(error) = viewer.add_splat_scene(url).await {
            self.dispose().await;
            return Err(error);
        }
        if let Some(active) = self.active.as_mut() {
            active.loaded = true;
        }
        Ok(())
    }

    pub fn start(&self) -> Result<(), ViewerError> {
        match &self.active {
            Some(active) if active.loaded => {
                active.viewer.start()?;
                info!(url = %active.url, "viewer render loop started");
                Ok(())
            }
            _ => Err(ViewerError::NotLoaded),
        }
    }

    /// Safe at any time; an empty handle stays empty.
    pub async fn dispose(&mut self) {
        if let Some(active) = self.active.take() {
            active.viewer.dispose().await;
            debug!(url = %active.url, "viewer disposed");
        }
    }

    pub fn request_fullscreen(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.loaded && active.viewer.request_fullscreen())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.url.as_str())
    }
}

#[cfg(test)]
#[path = "tests/viewer_handle_tests.rs"]
mod tests;
