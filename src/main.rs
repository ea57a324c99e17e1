//! Cambridge NVR Bridge
//!
//! Main entry point for the bridge daemon.

use cambridge::{
    hap::{HostEvent, HostHandle},
    motion::MotionPoller,
    nvr_client::NvrClient,
    port_pool::PortPool,
    registry::CameraRegistry,
    state::{BridgeConfig, BridgeState},
    stream_session::SessionCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cambridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Cambridge NVR Bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(BridgeConfig::default());
    tracing::info!(
        nvr_url = %config.nvr_url,
        ffmpeg_path = %config.ffmpeg_path,
        port_range_start = config.port_range_start,
        port_range_end = config.port_range_end,
        libfdk_available = config.libfdk_available,
        "Configuration loaded"
    );

    let nvr = Arc::new(NvrClient::new(
        config.nvr_url.clone(),
        config.nvr_api_key.clone(),
    ));
    match nvr.health_check().await {
        Ok(true) => tracing::info!("Controller reachable"),
        Ok(false) => tracing::warn!("Controller reports unhealthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Controller unreachable at startup, continuing")
        }
    }

    let ports = Arc::new(PortPool::new(
        config.port_range_start,
        config.port_range_end,
    ));
    let registry = Arc::new(CameraRegistry::new());
    let (host, mut host_events) = HostHandle::channel();

    // One coordinator per online camera
    match nvr.list_cameras().await {
        Ok(cameras) => {
            for camera in cameras {
                if !camera.online {
                    tracing::info!(
                        camera_id = %camera.camera_id,
                        name = %camera.name,
                        "Skipping offline camera"
                    );
                    continue;
                }
                tracing::info!(
                    camera_id = %camera.camera_id,
                    name = %camera.name,
                    codec = ?camera.codec,
                    supports_talkback = camera.supports_talkback,
                    "Registering camera"
                );
                let coordinator = Arc::new(SessionCoordinator::new(
                    camera,
                    nvr.clone(),
                    ports.clone(),
                    host.clone(),
                    config.clone(),
                ));
                registry.insert(coordinator).await;
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Camera enumeration failed, starting with empty registry")
        }
    }
    tracing::info!(cameras = registry.len().await, "Camera registry ready");

    let motion = Arc::new(MotionPoller::new(
        nvr.clone(),
        Duration::from_secs(config.motion_poll_interval_secs),
    ));
    motion.start().await;
    tracing::info!("MotionPoller started");

    let state = BridgeState {
        config,
        nvr,
        ports,
        registry: registry.clone(),
        motion: motion.clone(),
        host,
    };

    // Surface motion events in the log; the accessory layer subscribes
    // through BridgeState the same way.
    let mut motion_feed = state.motion.subscribe();
    tokio::spawn(async move {
        loop {
            match motion_feed.recv().await {
                Ok(event) => {
                    tracing::info!(
                        camera_id = %event.camera_id,
                        score = event.score,
                        "Motion detected"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed = missed, "Motion feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Deliver forced stops from watchdogs and exit watchers
    let dispatch = registry.clone();
    tokio::spawn(async move {
        while let Some(event) = host_events.recv().await {
            let HostEvent::ForceStopSession {
                camera_id,
                session_id,
            } = event;
            dispatch.force_stop(&camera_id, &session_id).await;
        }
    });

    tracing::info!("Bridge running");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    state.motion.shutdown().await;
    state.registry.stop_all().await;

    Ok(())
}
