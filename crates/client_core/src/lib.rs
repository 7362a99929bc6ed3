//! Client side of the image-to-splat workflow: backend gateway, viewer
//! ownership and the lifecycle controller that sequences them.

pub mod config;
pub mod controller;
pub mod gateway;
pub mod viewer_handle;

#[cfg(test)]
mod test_support;

pub use config::{load_settings, Settings};
pub use controller::{
    ControllerError, ControllerEvent, ControllerState, LifecycleController, OperationClass,
    Settled,
};
pub use gateway::{AssetGateway, GatewayError, GenerationReceipt, HttpAssetGateway, ImageUpload};
pub use viewer_handle::ViewerHandle;
