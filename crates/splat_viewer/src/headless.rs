//! Engine that streams and validates splat assets without a GPU.
//!
//! Used by command-line front ends, where "showing" a scene means confirming
//! the asset downloads and parses.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    ply::PlyHeader, MountTarget, SplatViewer, SplatViewerFactory, ViewerError, ViewerOptions,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneStats {
    pub url: String,
    pub bytes: usize,
    pub vertex_count: usize,
    /// `None` when the asset has no inspectable opacity channel.
    pub retained_splats: Option<usize>,
}

pub struct HeadlessViewerFactory {
    http: Client,
}

impl HeadlessViewerFactory {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ViewerError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ViewerError::ViewerInit(e.to_string()))?;
        Ok(Self { http })
    }
}

impl Default for HeadlessViewerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SplatViewerFactory for HeadlessViewerFactory {
    async fn create(
        &self,
        mount: &MountTarget,
        options: &ViewerOptions,
    ) -> Result<Arc<dyn SplatViewer>, ViewerError> {
        Ok(Arc::new(HeadlessViewer::new(
            self.http.clone(),
            mount.clone(),
            options.clone(),
        )))
    }
}

#[derive(Default)]
struct HeadlessScene {
    buffer: Vec<u8>,
    stats: Option<SceneStats>,
}

pub struct HeadlessViewer {
    http: Client,
    mount: MountTarget,
    options: ViewerOptions,
    scene: Mutex<HeadlessScene>,
    running: AtomicBool,
    disposed: AtomicBool,
    loaded: AtomicBool,
}

impl HeadlessViewer {
    pub fn new(http: Client, mount: MountTarget, options: ViewerOptions) -> Self {
        Self {
            http,
            mount,
            options,
            scene: Mutex::new(HeadlessScene::default()),
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        }
    }

    pub async fn stats(&self) -> Option<SceneStats> {
        self.scene.lock().await.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn stream_scene(&self, url: &str) -> Result<SceneStats, ViewerError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ViewerError::AssetFetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ViewerError::AssetFetch(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut header: Option<PlyHeader> = None;
        let mut scene = self.scene.lock().await;
        scene.buffer.clear();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ViewerError::AssetFetch(e.to_string()))?;
            if self.is_disposed() {
                return Err(ViewerError::AssetFetch(
                    "viewer disposed while loading".to_string(),
                ));
            }
            scene.buffer.extend_from_slice(&chunk);

            if header.is_none() && self.options.progressive_load {
                if let Some(parsed) = PlyHeader::parse_prefix(&scene.buffer)? {
                    debug!(
                        mount = %self.mount.as_str(),
                        vertices = parsed.vertex_count(),
                        "splat header received, rendering progressively"
                    );
                    header = Some(parsed);
                }
            }
        }

        let header = match header {
            Some(header) => header,
            None => PlyHeader::parse_prefix(&scene.buffer)?.ok_or_else(|| {
                ViewerError::AssetParse("asset ended before end_header".to_string())
            })?,
        };
        let body = &scene.buffer[header.header_len..];
        header.validate_body(body)?;

        Ok(SceneStats {
            url: url.to_string(),
            bytes: scene.buffer.len(),
            vertex_count: header.vertex_count(),
            retained_splats: header
                .count_retained_splats(body, self.options.splat_alpha_removal_threshold),
        })
    }
}

#[async_trait]
impl SplatViewer for HeadlessViewer {
    async fn add_splat_scene(&self, url: &str) -> Result<(), ViewerError> {
        if self.is_disposed() {
            return Err(ViewerError::ViewerInit("viewer already disposed".to_string()));
        }
        let stats = self.stream_scene(url).await?;
        info!(
            url = %stats.url,
            bytes = stats.bytes,
            vertices = stats.vertex_count,
            retained = ?stats.retained_splats,
            "splat scene loaded"
        );
        self.scene.lock().await.stats = Some(stats);
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self) -> Result<(), ViewerError> {
        if !self.loaded.load(Ordering::SeqCst) || self.is_disposed() {
            return Err(ViewerError::NotLoaded);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
        let mut scene = self.scene.lock().await;
        scene.buffer = Vec::new();
        scene.stats = None;
        debug!(mount = %self.mount.as_str(), "headless viewer disposed");
    }
}
