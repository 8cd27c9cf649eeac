use smartlock_core::{DecisionBoard, FrameBuffer, Snapshot, SignatureStore, Verdict};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.smartlock.Gate1";
pub const OBJECT_PATH: &str = "/org/smartlock/Gate1";

/// How long the board watcher blocks before re-checking.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Static facts reported by `Status()`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub camera_device: String,
    pub tolerance: f32,
    pub recognize_every: u32,
    pub match_policy: String,
}

/// D-Bus interface for SmartLock decision consumers.
///
/// Bus name: org.smartlock.Gate1
/// Object path: /org/smartlock/Gate1
pub struct GateService {
    board: Arc<DecisionBoard>,
    frames: Arc<FrameBuffer>,
    gallery: Arc<SignatureStore>,
    info: ServiceInfo,
    running: Arc<AtomicBool>,
}

impl GateService {
    pub fn new(
        board: Arc<DecisionBoard>,
        frames: Arc<FrameBuffer>,
        gallery: Arc<SignatureStore>,
        info: ServiceInfo,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            board,
            frames,
            gallery,
            info,
            running,
        }
    }
}

#[interface(name = "org.smartlock.Gate1")]
impl GateService {
    /// Current decision snapshot as JSON.
    async fn decision(&self) -> zbus::fdo::Result<String> {
        to_json(&self.board.read())
    }

    /// Enrolled identity names, in gallery order.
    async fn enrolled(&self) -> zbus::fdo::Result<String> {
        to_json(&self.gallery.names().collect::<Vec<_>>())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.info.camera_device,
            "enrolled": self.gallery.len(),
            "tolerance": self.info.tolerance,
            "recognize_every": self.info.recognize_every,
            "match_policy": self.info.match_policy,
            "engine_running": self.running.load(Ordering::Acquire),
        })
        .to_string())
    }

    /// Overlays and decision of the most recent display frame.
    async fn latest_overlays(&self) -> zbus::fdo::Result<String> {
        match self.frames.latest() {
            Some(frame) => to_json(&*frame),
            None => Ok("null".into()),
        }
    }

    /// Emitted when the verdict or approved identity changes, and once when
    /// the board stops.
    #[zbus(signal)]
    async fn decision_changed(emitter: &SignalEmitter<'_>, snapshot: &str) -> zbus::Result<()>;
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Emit `DecisionChanged` for `snapshot` on the served object.
pub async fn emit_decision_changed(conn: &zbus::Connection, snapshot: &Snapshot) -> zbus::Result<()> {
    let iface = conn
        .object_server()
        .interface::<_, GateService>(OBJECT_PATH)
        .await?;
    let json = serde_json::to_string(snapshot).map_err(|e| zbus::Error::Failure(e.to_string()))?;
    GateService::decision_changed(iface.signal_emitter(), &json).await
}

/// Whether `next` differs from `previous` in a way consumers care about.
///
/// Liveness re-asserts of the same verdict (fresh timestamp only) are not
/// changes; the terminal state always is.
pub fn is_change(previous: Option<&Verdict>, next: &Snapshot) -> bool {
    if next.state.is_stopped() {
        return true;
    }
    match (previous, next.state.decision()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(prev), Some(decision)) => *prev != decision.verdict,
    }
}

/// Block on the board and forward change-worthy snapshots to `tx`.
///
/// Returns after forwarding the terminal snapshot, or when the receiver
/// goes away. Runs on a blocking thread.
pub fn watch_board(board: Arc<DecisionBoard>, tx: mpsc::Sender<Snapshot>) {
    let mut seen = 0;
    let mut last: Option<Verdict> = None;

    loop {
        let snapshot = board.wait_newer(seen, WATCH_INTERVAL);
        if snapshot.generation == seen {
            if tx.is_closed() {
                return;
            }
            continue;
        }
        seen = snapshot.generation;

        if !is_change(last.as_ref(), &snapshot) {
            continue;
        }
        last = snapshot.state.decision().map(|d| d.verdict.clone());
        let stopped = snapshot.state.is_stopped();
        if tx.blocking_send(snapshot).is_err() || stopped {
            return;
        }
    }
}
