//! In-memory gateway and engine doubles shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use shared::domain::{AssetDescriptor, AssetPath, UploadFilename, UploadedImage};
use splat_viewer::{MountTarget, SplatViewer, SplatViewerFactory, ViewerError, ViewerOptions};
use tokio::sync::{oneshot, Mutex};

use crate::gateway::{AssetGateway, GatewayError, GenerationReceipt, ImageUpload};

pub fn asset(path: &str, size_mb: f64) -> AssetDescriptor {
    AssetDescriptor {
        path: AssetPath::new(path),
        name: path.replace('/', " - "),
        size_mb,
        created: None,
    }
}

pub fn asset_url(path: &str) -> String {
    format!("mem://assets/{path}")
}

/// Returns a sender that releases the operation gated on `key`.
async fn install_gate(
    gates: &Mutex<HashMap<String, oneshot::Receiver<()>>>,
    key: &str,
) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    gates.lock().await.insert(key.to_string(), rx);
    tx
}

async fn wait_gate(gates: &Mutex<HashMap<String, oneshot::Receiver<()>>>, key: &str) {
    let gate = gates.lock().await.remove(key);
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

#[derive(Default)]
pub struct ScriptedGateway {
    listings: Mutex<VecDeque<Result<Vec<AssetDescriptor>, GatewayError>>>,
    last_listing: Mutex<Vec<AssetDescriptor>>,
    uploads: Mutex<HashMap<String, Result<String, GatewayError>>>,
    generation: Mutex<Option<Result<String, GatewayError>>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn with_listing(assets: Vec<AssetDescriptor>) -> Arc<Self> {
        let mut gateway = Self::default();
        *gateway.last_listing.get_mut() = assets;
        Arc::new(gateway)
    }

    /// Queues listings returned by the next refreshes; the last one sticks.
    pub async fn queue_listing(&self, listing: Result<Vec<AssetDescriptor>, GatewayError>) {
        self.listings.lock().await.push_back(listing);
    }

    pub async fn script_upload(&self, file_name: &str, result: Result<&str, GatewayError>) {
        self.uploads
            .lock()
            .await
            .insert(file_name.to_string(), result.map(str::to_string));
    }

    pub async fn script_generation(&self, result: Result<&str, GatewayError>) {
        *self.generation.lock().await = Some(result.map(str::to_string));
    }

    /// Holds the operation named `key` (`upload:<file>`, `generate`, `list`) until released.
    pub async fn gate(&self, key: &str) -> oneshot::Sender<()> {
        install_gate(&self.gates, key).await
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl AssetGateway for ScriptedGateway {
    async fn list_assets(&self) -> Result<Vec<AssetDescriptor>, GatewayError> {
        self.record("list".to_string()).await;
        wait_gate(&self.gates, "list").await;
        let queued = self.listings.lock().await.pop_front();
        match queued {
            Some(Ok(assets)) => {
                *self.last_listing.lock().await = assets.clone();
                Ok(assets)
            }
            Some(Err(error)) => Err(error),
            None => Ok(self.last_listing.lock().await.clone()),
        }
    }

    async fn upload_image(&self, upload: ImageUpload) -> Result<UploadedImage, GatewayError> {
        self.record(format!("upload:{}", upload.file_name)).await;
        wait_gate(&self.gates, &format!("upload:{}", upload.file_name)).await;
        let scripted = self.uploads.lock().await.get(&upload.file_name).cloned();
        let filename = scripted.unwrap_or_else(|| Ok(upload.file_name.clone()))?;
        Ok(UploadedImage {
            filename: UploadFilename::new(filename),
            preview_data: upload.preview_data_uri(),
        })
    }

    async fn request_generation(
        &self,
        filename: &UploadFilename,
    ) -> Result<GenerationReceipt, GatewayError> {
        self.record(format!("generate:{filename}")).await;
        wait_gate(&self.gates, "generate").await;
        let scripted = self
            .generation
            .lock()
            .await
            .clone()
            .unwrap_or(Err(GatewayError::Network));
        scripted.map(|path| GenerationReceipt {
            asset_path: AssetPath::new(path),
        })
    }

    async fn health(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn asset_url(&self, path: &AssetPath) -> String {
        asset_url(path.as_str())
    }
}

#[derive(Default)]
struct EngineLedger {
    live: AtomicUsize,
    max_live: AtomicUsize,
    created: AtomicUsize,
    disposed: AtomicUsize,
    started: Mutex<Vec<String>>,
    requested: Mutex<Vec<String>>,
}

/// Engine double that counts live instances and lets tests script each URL.
#[derive(Default)]
pub struct RecordingViewerFactory {
    ledger: Arc<EngineLedger>,
    failures: Mutex<HashMap<String, ViewerError>>,
    start_failures: Mutex<HashMap<String, ViewerError>>,
    gates: Arc<Mutex<HashMap<String, oneshot::Receiver<()>>>>,
    fail_create: AtomicBool,
    fullscreen: AtomicBool,
}

impl RecordingViewerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail_url(&self, url: &str, error: ViewerError) {
        self.failures.lock().await.insert(url.to_string(), error);
    }

    /// Lets the scene for `url` load, then fails its `start()`.
    pub async fn fail_start(&self, url: &str, error: ViewerError) {
        self.start_failures.lock().await.insert(url.to_string(), error);
    }

    pub fn fail_construction(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn support_fullscreen(&self) {
        self.fullscreen.store(true, Ordering::SeqCst);
    }

    /// Holds the scene load for `url` until the returned sender fires or drops.
    pub async fn gate(&self, url: &str) -> oneshot::Sender<()> {
        install_gate(&self.gates, url).await
    }

    pub fn live(&self) -> usize {
        self.ledger.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.ledger.max_live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.ledger.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.ledger.disposed.load(Ordering::SeqCst)
    }

    pub async fn requested(&self) -> Vec<String> {
        self.ledger.requested.lock().await.clone()
    }

    pub async fn started(&self) -> Vec<String> {
        self.ledger.started.lock().await.clone()
    }
}

#[async_trait]
impl SplatViewerFactory for RecordingViewerFactory {
    async fn create(
        &self,
        _mount: &MountTarget,
        _options: &ViewerOptions,
    ) -> Result<Arc<dyn SplatViewer>, ViewerError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ViewerError::ViewerInit("no drawing surface".to_string()));
        }
        let live = self.ledger.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_live.fetch_max(live, Ordering::SeqCst);
        self.ledger.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingViewer {
            ledger: Arc::clone(&self.ledger),
            failures: self.failures.lock().await.clone(),
            start_failures: self.start_failures.lock().await.clone(),
            gates: Arc::clone(&self.gates),
            url: std::sync::Mutex::new(None),
            disposed: AtomicBool::new(false),
            fullscreen: self.fullscreen.load(Ordering::SeqCst),
        }))
    }
}

struct RecordingViewer {
    ledger: Arc<EngineLedger>,
    failures: HashMap<String, ViewerError>,
    start_failures: HashMap<String, ViewerError>,
    gates: Arc<Mutex<HashMap<String, oneshot::Receiver<()>>>>,
    url: std::sync::Mutex<Option<String>>,
    disposed: AtomicBool,
    fullscreen: bool,
}

#[async_trait]
impl SplatViewer for RecordingViewer {
    async fn add_splat_scene(&self, url: &str) -> Result<(), ViewerError> {
        self.ledger.requested.lock().await.push(url.to_string());
        if let Ok(mut current) = self.url.lock() {
            *current = Some(url.to_string());
        }
        wait_gate(&self.gates, url).await;
        match self.failures.get(url) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn start(&self) -> Result<(), ViewerError> {
        let url = self.url.lock().ok().and_then(|url| url.clone());
        let url = url.ok_or(ViewerError::NotLoaded)?;
        if let Some(error) = self.start_failures.get(&url) {
            return Err(error.clone());
        }
        // try_lock keeps this synchronous; tests never contend on it here.
        if let Ok(mut started) = self.ledger.started.try_lock() {
            started.push(url);
        }
        Ok(())
    }

    async fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.ledger.live.fetch_sub(1, Ordering::SeqCst);
            self.ledger.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request_fullscreen(&self) -> bool {
        self.fullscreen
    }
}
