//! smartlock-core — Face recognition pipeline for the SmartLock gate.
//!
//! SCRFD finds faces, ArcFace turns each face into a signature, and the
//! matcher compares signatures against the enrolled gallery. The
//! recognition loop drives all of it on a throttled cadence and keeps the
//! decision board current for concurrent readers.

pub mod alignment;
pub mod board;
pub mod decision;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod source;
pub mod types;

use std::path::PathBuf;

pub use board::{BoardState, DecisionBoard, FrameBuffer, Snapshot};
pub use decision::{Decision, Verdict};
pub use detector::{FaceDetector, ScrfdDetector};
pub use extractor::{ArcFaceExtractor, SignatureExtractor};
pub use gallery::{GalleryEntry, GalleryError, SignatureStore};
pub use matcher::{FirstMatch, MatchPolicy, MatchResult, Matcher, NearestMatch, DEFAULT_TOLERANCE};
pub use overlay::{AnnotatedFrame, Overlay, RegionClass};
pub use pipeline::{LoopError, LoopStats, RecognitionLoop, Throttle};
pub use source::{CaptureError, Frame, FrameSource};
pub use types::{FaceRegion, Signature};

/// Default location of the ONNX model files.
///
/// `$XDG_DATA_HOME/smartlock/models` when set, otherwise the system-wide
/// `/usr/share/smartlock/models`.
pub fn default_model_dir() -> PathBuf {
    match std::env::var("XDG_DATA_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir).join("smartlock/models"),
        _ => PathBuf::from("/usr/share/smartlock/models"),
    }
}
