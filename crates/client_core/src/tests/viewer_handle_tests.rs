use super::*;
use crate::test_support::{asset_url, RecordingViewerFactory};

fn handle(factory: &Arc<RecordingViewerFactory>) -> ViewerHandle {
    ViewerHandle::new(
        factory.clone(),
        MountTarget::new("viewer-canvas"),
        ViewerOptions::default(),
    )
}

#[tokio::test]
async fn sequential_loads_keep_a_single_live_instance() {
    let factory = RecordingViewerFactory::new();
    let mut handle = handle(&factory);

    for name in ["a.ply", "b.ply", "c.ply"] {
        handle.load(&asset_url(name)).await.expect("load");
        handle.start().expect("start");
        assert_eq!(factory.live(), 1);
    }

    assert_eq!(factory.created(), 3);
    assert_eq!(factory.disposed(), 2);
    assert_eq!(factory.max_live(), 1);
    assert_eq!(handle.current_url(), Some(asset_url("c.ply").as_str()));
}

#[tokio::test]
async fn dispose_is_idempotent_and_safe_before_load() {
    let factory = RecordingViewerFactory::new();
    let mut handle = handle(&factory);

    handle.dispose().await;
    handle.dispose().await;
    assert!(!handle.is_active());

    handle.load(&asset_url("a.ply")).await.expect("load");
    handle.dispose().await;
    handle.dispose().await;
    assert!(!handle.is_active());
    assert_eq!(factory.live(), 0);
    assert_eq!(factory.disposed(), 1);
}

#[tokio::test]
async fn start_requires_a_successful_load() {
    let factory = RecordingViewerFactory::new();
    let mut handle = handle(&factory);
    assert_eq!(handle.start(), Err(ViewerError::NotLoaded));

    let url = asset_url("broken.ply");
    factory
        .fail_url(&url, ViewerError::AssetParse("bad header".into()))
        .await;
    let err = handle.load(&url).await.expect_err("parse failure");
    assert!(matches!(err, ViewerError::AssetParse(_)));
    assert_eq!(handle.start(), Err(ViewerError::NotLoaded));
}

#[tokio::test]
async fn failed_load_releases_the_new_instance() {
    let factory = RecordingViewerFactory::new();
    let mut handle = handle(&factory);
    handle.load(&asset_url("good.ply")).await.expect("load");

    let url = asset_url("missing.ply");
    factory
        .fail_url(&url, ViewerError::AssetFetch("404".into()))
        .await;
    handle.load(&url).await.expect_err("fetch failure");

    assert!(!handle.is_active());
    assert_eq!(factory.live(), 0);
    assert_eq!(factory.max_live(), 1);
}

#[tokio::test]
async fn construction_failure_is_viewer_init() {
    let factory = RecordingViewerFactory::new();
    factory.fail_construction();
    let mut handle = handle(&factory);

    let err = handle.load(&asset_url("a.ply")).await.expect_err("init");
    assert!(matches!(err, ViewerError::ViewerInit(_)));
    assert!(!handle.is_active());
}

#[tokio::test]
async fn fullscreen_needs_a_loaded_engine_that_supports_it() {
    let factory = RecordingViewerFactory::new();
    let mut handle = handle(&factory);
    assert!(!handle.request_fullscreen());

    handle.load(&asset_url("a.ply")).await.expect("load");
    assert!(!handle.request_fullscreen());

    factory.support_fullscreen();
    handle.load(&asset_url("b.ply")).await.expect("load");
    assert!(handle.request_fullscreen());
}
