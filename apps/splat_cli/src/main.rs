use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, AssetGateway, HttpAssetGateway, ImageUpload, LifecycleController, Settings,
    Settled, ViewerHandle,
};
use shared::domain::AssetPath;
use splat_viewer::{HeadlessViewerFactory, MountTarget};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Turn images into Gaussian splat scenes and inspect the results")]
struct Cli {
    /// Backend API root, e.g. http://localhost:5001/api
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Health,
    List,
    Upload { image: PathBuf },
    /// Uploads the image, generates a scene from it and loads the result.
    Generate { image: PathBuf },
    View { asset: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    info!(api = %settings.api_base_url, "using backend");

    let gateway = Arc::new(HttpAssetGateway::with_timeouts(
        &settings.api_base_url,
        settings.request_timeout(),
        settings.connect_timeout(),
    )?);

    match cli.command {
        Command::Health => {
            gateway.health().await?;
            println!("backend healthy at {}", gateway.base_url());
        }
        Command::List => {
            let assets = gateway.list_assets().await?;
            println!("{}", serde_json::to_string_pretty(&assets)?);
        }
        Command::Upload { image } => {
            let controller = controller(&settings, gateway).await?;
            select_image(&controller, &image).await?;
            if let Some(uploaded) = controller.snapshot().await.uploaded_image {
                println!("uploaded filename={}", uploaded.filename);
            }
        }
        Command::Generate { image } => {
            let controller = controller(&settings, gateway).await?;
            select_image(&controller, &image).await?;
            let asset = controller.request_generation().await?;
            println!("generated asset={asset}");
            report_scene(&controller).await?;
            controller.teardown().await;
        }
        Command::View { asset } => {
            let controller = controller(&settings, gateway).await?;
            controller.select_asset(AssetPath::new(asset)).await?;
            report_scene(&controller).await?;
            controller.teardown().await;
        }
    }

    Ok(())
}

async fn controller(
    settings: &Settings,
    gateway: Arc<HttpAssetGateway>,
) -> Result<Arc<LifecycleController>> {
    let factory = HeadlessViewerFactory::with_timeout(settings.request_timeout())?;
    let viewer = ViewerHandle::new(
        Arc::new(factory),
        MountTarget::new(settings.mount_target.clone()),
        settings.viewer.clone(),
    );
    Ok(LifecycleController::new(gateway, viewer).await)
}

async fn select_image(controller: &LifecycleController, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read image '{}'", path.display()))?;
    let mime_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream");
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    match controller
        .drop_image(ImageUpload::new(file_name, mime_type, bytes))
        .await?
    {
        Settled::Applied => Ok(()),
        Settled::Ignored => bail!("'{}' is not an image", path.display()),
        Settled::Superseded => bail!("upload was superseded"),
    }
}

async fn report_scene(controller: &LifecycleController) -> Result<()> {
    let info = controller
        .scene_info()
        .await
        .context("viewer did not finish loading")?;
    println!("loaded {} ({:.2} MB)", info.path, info.size_mb);
    Ok(())
}
