use anyhow::{Context, Result};
use smartlock_core::{DecisionBoard, FrameBuffer, SignatureStore};
use smartlock_hw::Camera;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{GateService, ServiceInfo, BUS_NAME, OBJECT_PATH};
use engine::Outputs;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "smartlockd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    for device in Camera::list_devices() {
        tracing::debug!(path = %device.path, name = %device.name, driver = %device.driver, "capture device");
    }

    let gallery = Arc::new(load_gallery(&config)?);

    let board = Arc::new(DecisionBoard::new());
    let frames = Arc::new(FrameBuffer::new());
    let outputs = Outputs {
        board: Arc::clone(&board),
        frames: Arc::clone(&frames),
    };

    let mut engine = engine::spawn_engine(&config, Arc::clone(&gallery), outputs)
        .context("failed to start recognition engine")?;

    let service = GateService::new(
        Arc::clone(&board),
        frames,
        gallery,
        ServiceInfo {
            camera_device: config.camera_device.clone(),
            tolerance: config.tolerance,
            recognize_every: config.recognize_every,
            match_policy: config.match_policy.to_string(),
        },
        engine.running(),
    );

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, system = config.system_bus, "smartlockd ready");

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = {
        let board = Arc::clone(&board);
        tokio::task::spawn_blocking(move || dbus_interface::watch_board(board, tx))
    };
    let emitter = {
        let conn = conn.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if let Err(e) = dbus_interface::emit_decision_changed(&conn, &snapshot).await {
                    tracing::warn!(error = %e, "failed to emit DecisionChanged");
                }
            }
        })
    };

    let outcome = tokio::select! {
        result = engine.finished() => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("smartlockd shutting down");
            engine.stop();
            engine.finished().await
        }
    };

    // The engine closes the board on every exit; this covers a thread that
    // died without reaching that point.
    board.close();
    let _ = watcher.await;
    let _ = emitter.await;

    match outcome {
        Ok(stats) => {
            tracing::info!(?stats, "recognition engine stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "recognition engine failed");
            Err(anyhow::Error::new(e).context("recognition engine terminated"))
        }
    }
}

/// Load the gallery, honoring `gallery_required`.
fn load_gallery(config: &Config) -> Result<SignatureStore> {
    match SignatureStore::load(&config.gallery_path) {
        Ok(store) => {
            if store.is_empty() {
                tracing::warn!(path = %config.gallery_path.display(), "gallery is empty; every face will be NO_ENROLLED");
            }
            Ok(store)
        }
        Err(e) if !config.gallery_required => {
            tracing::warn!(error = %e, "gallery unavailable; running with no enrolled faces");
            Ok(SignatureStore::default())
        }
        Err(e) => Err(e).context("gallery is required but could not be loaded"),
    }
}
