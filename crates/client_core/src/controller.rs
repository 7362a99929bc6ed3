//! Generation & viewer lifecycle state machine.
//!
//! Every intent that talks to the backend or the engine takes a sequence
//! number from its operation class before suspending. When the call settles,
//! its effect is applied only if that number is still the latest issued for the
//! class; older completions are dropped.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use shared::{
    domain::{
        AssetDescriptor, AssetPath, GenerationPhase, SceneInfo, UploadedImage, ViewerPhase,
    },
    error::{ErrorInfo, MISSING_UPLOAD_MESSAGE},
};
use splat_viewer::ViewerError;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    gateway::{AssetGateway, GatewayError, ImageUpload},
    viewer_handle::ViewerHandle,
};

const PROGRESS_GENERATING: &str = "Processing...";
const PROGRESS_DONE: &str = "Done!";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ControllerState {
    pub uploaded_image: Option<UploadedImage>,
    pub assets: Vec<AssetDescriptor>,
    pub selected_asset: Option<AssetPath>,
    pub generation: GenerationPhase,
    pub viewer: ViewerPhase,
    pub last_error: Option<ErrorInfo>,
}

impl ControllerState {
    pub fn find_asset(&self, path: &AssetPath) -> Option<&AssetDescriptor> {
        self.assets.iter().find(|asset| &asset.path == path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Upload,
    Generation,
    Refresh,
    Load,
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Generation => "generation",
            Self::Refresh => "refresh",
            Self::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    StateChanged(ControllerState),
    ResultDiscarded {
        operation: OperationClass,
        sequence: u64,
    },
}

/// How a settled operation affected controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied,
    /// A newer operation of the same class was issued first; nothing changed.
    Superseded,
    /// The intent did not apply (e.g. a non-image drop).
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Viewer(#[from] ViewerError),
    #[error("no uploaded image to generate from")]
    MissingUpload,
    #[error("a generation request is already in flight")]
    GenerationInFlight,
    #[error("asset '{0}' is not in the current listing")]
    UnknownAsset(AssetPath),
}

impl From<&ControllerError> for ErrorInfo {
    fn from(value: &ControllerError) -> Self {
        match value {
            ControllerError::Gateway(error) => error.into(),
            ControllerError::Viewer(_) => ErrorInfo::viewer(),
            ControllerError::MissingUpload => ErrorInfo::validation(MISSING_UPLOAD_MESSAGE),
            other => ErrorInfo::validation(other.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    fn issue(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, sequence: u64) -> bool {
        self.0.load(Ordering::SeqCst) == sequence
    }

    /// Makes every outstanding sequence number stale.
    fn invalidate(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Sequences {
    upload: SequenceCounter,
    generation: SequenceCounter,
    refresh: SequenceCounter,
    load: SequenceCounter,
}

impl Sequences {
    fn counter(&self, operation: OperationClass) -> &SequenceCounter {
        match operation {
            OperationClass::Upload => &self.upload,
            OperationClass::Generation => &self.generation,
            OperationClass::Refresh => &self.refresh,
            OperationClass::Load => &self.load,
        }
    }
}

pub struct LifecycleController {
    gateway: Arc<dyn AssetGateway>,
    viewer: Mutex<ViewerHandle>,
    state: Mutex<ControllerState>,
    sequences: Sequences,
    events: broadcast::Sender<ControllerEvent>,
}

impl LifecycleController {
    /// Builds the controller and performs the initial asset listing.
    ///
    /// A failed initial listing is recorded in `last_error`, not returned.
    pub async fn new(gateway: Arc<dyn AssetGateway>, viewer: ViewerHandle) -> Arc<Self> {
        let controller = Self::detached(gateway, viewer);
        if let Err(error) = controller.refresh_assets().await {
            warn!(%error, "initial asset listing failed");
        }
        controller
    }

    /// Builds the controller without touching the backend.
    pub fn detached(gateway: Arc<dyn AssetGateway>, viewer: ViewerHandle) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            gateway,
            viewer: Mutex::new(viewer),
            state: Mutex::new(ControllerState::default()),
            sequences: Sequences::default(),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ControllerState {
        self.state.lock().await.clone()
    }

    pub async fn can_generate(&self) -> bool {
        let state = self.state.lock().await;
        state.uploaded_image.is_some() && state.generation != GenerationPhase::Generating
    }

    pub async fn progress_label(&self) -> &'static str {
        match self.state.lock().await.generation {
            GenerationPhase::Generating => PROGRESS_GENERATING,
            GenerationPhase::Succeeded => PROGRESS_DONE,
            GenerationPhase::Idle | GenerationPhase::Failed => "",
        }
    }

    /// Size of the scene on screen, once it has fully loaded.
    pub async fn scene_info(&self) -> Option<SceneInfo> {
        let state = self.state.lock().await;
        if state.viewer != ViewerPhase::Loaded {
            return None;
        }
        let path = state.selected_asset.clone()?;
        let size_mb = state.find_asset(&path).map(|a| a.size_mb).unwrap_or(0.0);
        Some(SceneInfo { path, size_mb })
    }

    fn publish(&self, state: &ControllerState) {
        let _ = self
            .events
            .send(ControllerEvent::StateChanged(state.clone()));
    }

    fn discard(&self, operation: OperationClass, sequence: u64) {
        debug!(%operation, sequence, "discarding superseded result");
        let _ = self.events.send(ControllerEvent::ResultDiscarded {
            operation,
            sequence,
        });
    }

    fn is_current(&self, operation: OperationClass, sequence: u64) -> bool {
        self.sequences.counter(operation).is_current(sequence)
    }

    async fn record_failure(&self, error: ControllerError) -> ControllerError {
        let mut state = self.state.lock().await;
        state.last_error = Some(ErrorInfo::from(&error));
        self.publish(&state);
        error
    }

    /// Uploads a picked image. On failure the previous upload is kept.
    pub async fn select_image(&self, upload: ImageUpload) -> Result<Settled, ControllerError> {
        let sequence = self.sequences.upload.issue();
        info!(
            file = %upload.file_name,
            mime = %upload.mime_type,
            bytes = upload.bytes.len(),
            sequence,
            "uploading image"
        );
        let result = self.gateway.upload_image(upload).await;

        let mut state = self.state.lock().await;
        if !self.is_current(OperationClass::Upload, sequence) {
            self.discard(OperationClass::Upload, sequence);
            return Ok(Settled::Superseded);
        }
        match result {
            Ok(image) => {
                info!(filename = %image.filename, "image uploaded");
                state.uploaded_image = Some(image);
                state.last_error = None;
                self.publish(&state);
                Ok(Settled::Applied)
            }
            Err(error) => {
                warn!(%error, "image upload failed");
                state.last_error = Some(ErrorInfo::from(&error));
                self.publish(&state);
                Err(error.into())
            }
        }
    }

    /// Same as [`select_image`](Self::select_image) but ignores non-image drops.
    pub async fn drop_image(&self, upload: ImageUpload) -> Result<Settled, ControllerError> {
        if !upload.is_image() {
            debug!(file = %upload.file_name, mime = %upload.mime_type, "ignoring non-image drop");
            return Ok(Settled::Ignored);
        }
        self.select_image(upload).await
    }

    /// Replaces the asset listing with the backend's current snapshot.
    pub async fn refresh_assets(&self) -> Result<Settled, ControllerError> {
        let sequence = self.sequences.refresh.issue();
        let result = self.gateway.list_assets().await;

        let mut state = self.state.lock().await;
        if !self.is_current(OperationClass::Refresh, sequence) {
            self.discard(OperationClass::Refresh, sequence);
            return Ok(Settled::Superseded);
        }
        match result {
            Ok(assets) => {
                if let Some(selected) = &state.selected_asset {
                    if !assets.iter().any(|asset| &asset.path == selected) {
                        warn!(asset = %selected, "selected asset missing from refreshed listing");
                    }
                }
                debug!(count = assets.len(), "asset listing replaced");
                state.assets = assets;
                self.publish(&state);
                Ok(Settled::Applied)
            }
            Err(error) => {
                warn!(%error, "asset listing failed");
                state.last_error = Some(ErrorInfo::from(&error));
                self.publish(&state);
                Err(error.into())
            }
        }
    }

    /// Runs generation for the current upload, then refreshes the listing and
    /// opens the new asset. Returns the generated asset's path.
    pub async fn request_generation(&self) -> Result<AssetPath, ControllerError> {
        let (sequence, filename) = {
            let mut state = self.state.lock().await;
            if state.generation == GenerationPhase::Generating {
                return Err(ControllerError::GenerationInFlight);
            }
            let filename = state
                .uploaded_image
                .as_ref()
                .map(|image| image.filename.clone());
            let Some(filename) = filename else {
                drop(state);
                return Err(self.record_failure(ControllerError::MissingUpload).await);
            };
            state.generation = GenerationPhase::Generating;
            state.last_error = None;
            self.publish(&state);
            (self.sequences.generation.issue(), filename)
        };

        info!(%filename, sequence, "requesting generation");
        let result = self.gateway.request_generation(&filename).await;

        // Generation is single-flight, so its completion is always the latest issued.
        let receipt = {
            let mut state = self.state.lock().await;
            match result {
                Ok(receipt) => {
                    state.generation = GenerationPhase::Succeeded;
                    self.publish(&state);
                    receipt
                }
                Err(error) => {
                    warn!(%filename, %error, "generation failed");
                    state.generation = GenerationPhase::Failed;
                    state.last_error = Some(ErrorInfo::from(&error));
                    self.publish(&state);
                    return Err(error.into());
                }
            }
        };
        info!(asset = %receipt.asset_path, "generation finished");

        // The listing must be refreshed before the new asset counts as selectable.
        if let Err(error) = self.refresh_assets().await {
            warn!(%error, "listing refresh after generation failed");
        }
        if self
            .state
            .lock()
            .await
            .find_asset(&receipt.asset_path)
            .is_none()
        {
            warn!(asset = %receipt.asset_path, "generated asset not present in listing");
        }

        if let Err(error) = self.load_asset(receipt.asset_path.clone()).await {
            warn!(asset = %receipt.asset_path, %error, "generated asset failed to load");
        }
        Ok(receipt.asset_path)
    }

    /// Opens an asset picked from the current listing.
    pub async fn select_asset(&self, path: AssetPath) -> Result<Settled, ControllerError> {
        let listed = self.state.lock().await.find_asset(&path).is_some();
        if !listed {
            return Err(self
                .record_failure(ControllerError::UnknownAsset(path))
                .await);
        }
        self.load_asset(path).await
    }

    async fn load_asset(&self, path: AssetPath) -> Result<Settled, ControllerError> {
        let sequence = self.sequences.load.issue();
        {
            let mut state = self.state.lock().await;
            state.selected_asset = Some(path.clone());
            state.viewer = ViewerPhase::Loading;
            self.publish(&state);
        }
        let url = self.gateway.asset_url(&path);

        // Waits here until any earlier load on the handle has settled.
        let mut viewer = self.viewer.lock().await;
        if !self.is_current(OperationClass::Load, sequence) {
            self.discard(OperationClass::Load, sequence);
            return Ok(Settled::Superseded);
        }

        info!(asset = %path, %url, sequence, "loading asset into viewer");
        let loaded = viewer.load(&url).await;

        let mut state = self.state.lock().await;
        if !self.is_current(OperationClass::Load, sequence) {
            self.discard(OperationClass::Load, sequence);
            return Ok(Settled::Superseded);
        }
        let outcome = loaded.and_then(|()| viewer.start());
        match outcome {
            Ok(()) => {
                state.viewer = ViewerPhase::Loaded;
                self.publish(&state);
                Ok(Settled::Applied)
            }
            Err(error) => {
                warn!(asset = %path, %error, "viewer failed to load asset");
                // A failed start leaves a loaded instance behind; release it too.
                viewer.dispose().await;
                let error = ControllerError::from(error);
                state.viewer = ViewerPhase::Failed;
                state.last_error = Some(ErrorInfo::from(&error));
                self.publish(&state);
                Err(error)
            }
        }
    }

    /// Asks the engine for fullscreen. `false` when nothing is selected, a load
    /// is still running, or the engine cannot do it.
    pub async fn request_fullscreen(&self) -> bool {
        if self.state.lock().await.selected_asset.is_none() {
            return false;
        }
        match self.viewer.try_lock() {
            Ok(viewer) => viewer.request_fullscreen(),
            Err(_) => false,
        }
    }

    /// Releases the viewer. Loads still in flight are discarded when they settle.
    pub async fn teardown(&self) {
        self.sequences.load.invalidate();
        {
            let mut state = self.state.lock().await;
            state.viewer = ViewerPhase::Empty;
            self.publish(&state);
        }
        self.viewer.lock().await.dispose().await;
        info!("viewer torn down");
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
