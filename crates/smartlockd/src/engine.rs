use crate::config::Config;
use smartlock_core::detector::DetectorError;
use smartlock_core::extractor::ExtractionError;
use smartlock_core::{
    ArcFaceExtractor, DecisionBoard, FrameBuffer, LoopError, LoopStats, RecognitionLoop,
    ScrfdDetector, SignatureStore, Throttle,
};
use smartlock_hw::{Camera, CameraError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractionError),
    #[error("recognition loop failed: {0}")]
    Loop(#[from] LoopError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Shared state the engine writes and the D-Bus side reads.
#[derive(Clone)]
pub struct Outputs {
    pub board: Arc<DecisionBoard>,
    pub frames: Arc<FrameBuffer>,
}

/// Handle to the running engine thread.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    done: oneshot::Receiver<Result<LoopStats, EngineError>>,
}

impl EngineHandle {
    /// Ask the loop to exit at the next frame boundary.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Live flag for status reporting.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Resolves once the engine thread has exited and released the camera.
    pub async fn finished(&mut self) -> Result<LoopStats, EngineError> {
        (&mut self.done).await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera and loads both ONNX models synchronously so startup
/// fails fast. The thread discards warmup frames and then runs the
/// recognition loop until stopped or the camera fails.
pub fn spawn_engine(
    config: &Config,
    gallery: Arc<SignatureStore>,
    outputs: Outputs,
) -> Result<EngineHandle, EngineError> {
    let mut camera = Camera::open(
        &config.camera_device,
        config.frame_width,
        config.frame_height,
        config.frame_rate,
    )?;
    camera.set_capture_timeout(config.capture_timeout());
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        capture_timeout_ms = config.capture_timeout_ms,
        "camera opened"
    );

    let detector_path = config.detector_model_path();
    let detector = ScrfdDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

    let extractor_path = config.extractor_model_path();
    let extractor = ArcFaceExtractor::load(&extractor_path)?;
    tracing::info!(path = %extractor_path.display(), "ArcFace extractor loaded");

    let mut recognition = RecognitionLoop::new(
        detector,
        extractor,
        config.match_policy,
        gallery,
        config.tolerance,
        Throttle::new(config.recognize_every),
        Arc::clone(&outputs.board),
        outputs.frames,
    );

    let warmup_frames = config.warmup_frames;
    let stop = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(true));
    let (done_tx, done_rx) = oneshot::channel();

    let thread_stop = Arc::clone(&stop);
    let thread_running = Arc::clone(&running);
    let board = outputs.board;

    std::thread::Builder::new()
        .name("smartlock-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = run(&camera, &mut recognition, warmup_frames, &thread_stop);
            // Feed and camera are released before anyone is told we're done.
            drop(recognition);
            drop(camera);
            board.close();
            thread_running.store(false, Ordering::Release);
            tracing::info!("engine thread exiting");
            let _ = done_tx.send(result);
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle {
        stop,
        running,
        done: done_rx,
    })
}

fn run<M: smartlock_core::Matcher>(
    camera: &Camera,
    recognition: &mut RecognitionLoop<ScrfdDetector, ArcFaceExtractor, M>,
    warmup_frames: u32,
    stop: &AtomicBool,
) -> Result<LoopStats, EngineError> {
    let mut feed = camera.feed()?;

    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        feed.discard(warmup_frames)?;
    }

    Ok(recognition.run(&mut feed, stop)?)
}
