//! Typed access to the generation backend.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use shared::{
    domain::{AssetDescriptor, AssetPath, UploadFilename, UploadedImage},
    error::ErrorInfo,
    protocol::{
        AssetListResponse, GenerateRequest, GenerateResponse, HealthResponse, UploadResponse,
    },
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const UPLOAD_FIELD: &str = "image";
const UPLOAD_FAILED_MESSAGE: &str = "upload failed";
const GENERATION_FAILED_MESSAGE: &str = "generation failed";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Timeouts, refused connections and malformed responses all end up here.
    #[error("network error")]
    Network,
    /// The backend rejected the input; the message is shown verbatim.
    #[error("{0}")]
    Validation(String),
}

impl From<&GatewayError> for ErrorInfo {
    fn from(value: &GatewayError) -> Self {
        match value {
            GatewayError::Network => ErrorInfo::network(),
            GatewayError::Validation(message) => ErrorInfo::validation(message.clone()),
        }
    }
}

/// An image picked or dropped by the user, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn preview_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReceipt {
    pub asset_path: AssetPath,
}

#[async_trait]
pub trait AssetGateway: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<AssetDescriptor>, GatewayError>;
    async fn upload_image(&self, upload: ImageUpload) -> Result<UploadedImage, GatewayError>;
    /// One request, one response: the call stays pending for the whole generation.
    async fn request_generation(
        &self,
        filename: &UploadFilename,
    ) -> Result<GenerationReceipt, GatewayError>;
    async fn health(&self) -> Result<(), GatewayError>;
    /// Address the viewer streams the asset from. Never fails.
    fn asset_url(&self, path: &AssetPath) -> String;
}

pub struct HttpAssetGateway {
    http: Client,
    base_url: Url,
}

impl HttpAssetGateway {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_timeouts(
        base_url: &str,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Self::with_client(base_url, http)
    }

    pub fn with_client(base_url: &str, http: Client) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid API base url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("API base url '{base_url}' cannot carry a path"));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn network(operation: &'static str) -> impl FnOnce(reqwest::Error) -> GatewayError {
    move |error| {
        warn!(operation, %error, "backend request failed");
        GatewayError::Network
    }
}

/// Folds the backend's `{ success, <payload>?, error? }` envelope into a result.
fn interpret_envelope(
    operation: &'static str,
    success: bool,
    payload: Option<String>,
    error: Option<String>,
    fallback: &str,
) -> Result<String, GatewayError> {
    match (success, payload, error) {
        (true, Some(payload), _) => Ok(payload),
        (_, _, Some(message)) => Err(GatewayError::Validation(message)),
        (false, _, None) => Err(GatewayError::Validation(fallback.to_string())),
        (true, None, None) => {
            warn!(operation, "backend reported success without a payload");
            Err(GatewayError::Network)
        }
    }
}

#[async_trait]
impl AssetGateway for HttpAssetGateway {
    async fn list_assets(&self) -> Result<Vec<AssetDescriptor>, GatewayError> {
        let body: AssetListResponse = self
            .http
            .get(self.endpoint(["outputs"]))
            .send()
            .await
            .map_err(network("list_assets"))?
            .error_for_status()
            .map_err(network("list_assets"))?
            .json()
            .await
            .map_err(network("list_assets"))?;
        debug!(count = body.files.len(), "asset listing received");
        Ok(body.files)
    }

    async fn upload_image(&self, upload: ImageUpload) -> Result<UploadedImage, GatewayError> {
        let preview_data = upload.preview_data_uri();
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.mime_type)
            .map_err(|_| {
                GatewayError::Validation(format!("invalid MIME type '{}'", upload.mime_type))
            })?;

        // Rejections come back as 4xx with a JSON body, so the status is not checked.
        let body: UploadResponse = self
            .http
            .post(self.endpoint(["upload"]))
            .multipart(Form::new().part(UPLOAD_FIELD, part))
            .send()
            .await
            .map_err(network("upload_image"))?
            .json()
            .await
            .map_err(network("upload_image"))?;

        let filename = interpret_envelope(
            "upload_image",
            body.success,
            body.filename,
            body.error,
            UPLOAD_FAILED_MESSAGE,
        )?;
        Ok(UploadedImage {
            filename: UploadFilename::new(filename),
            preview_data,
        })
    }

    async fn request_generation(
        &self,
        filename: &UploadFilename,
    ) -> Result<GenerationReceipt, GatewayError> {
        let body: GenerateResponse = self
            .http
            .post(self.endpoint(["generate"]))
            .json(&GenerateRequest {
                filename: filename.to_string(),
            })
            .send()
            .await
            .map_err(network("request_generation"))?
            .json()
            .await
            .map_err(network("request_generation"))?;

        if let Some(details) = &body.details {
            debug!(%details, "generation diagnostics from backend");
        }
        let asset_path = interpret_envelope(
            "request_generation",
            body.success,
            body.ply_file,
            body.error,
            GENERATION_FAILED_MESSAGE,
        )?;
        Ok(GenerationReceipt {
            asset_path: AssetPath::new(asset_path),
        })
    }

    async fn health(&self) -> Result<(), GatewayError> {
        let body: HealthResponse = self
            .http
            .get(self.endpoint(["health"]))
            .send()
            .await
            .map_err(network("health"))?
            .error_for_status()
            .map_err(network("health"))?
            .json()
            .await
            .map_err(network("health"))?;
        if body.status == "ok" {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!(
                "backend reported status '{}'",
                body.status
            )))
        }
    }

    fn asset_url(&self, path: &AssetPath) -> String {
        let segments = std::iter::once("ply").chain(path.as_str().split('/'));
        self.endpoint(segments).to_string()
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
