use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NETWORK_ERROR_MESSAGE: &str = "could not reach the server";
pub const VIEWER_ERROR_MESSAGE: &str = "failed to load the 3D model";
pub const MISSING_UPLOAD_MESSAGE: &str = "upload an image first";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Network,
    Validation,
    Viewer,
}

/// The single line of error text a front end shows to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn network() -> Self {
        Self::new(ErrorCode::Network, NETWORK_ERROR_MESSAGE)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn viewer() -> Self {
        Self::new(ErrorCode::Viewer, VIEWER_ERROR_MESSAGE)
    }
}
