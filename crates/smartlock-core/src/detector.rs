//! Face detection.
//!
//! [`ScrfdDetector`] runs the SCRFD model (anchor-free, three strides) via
//! ONNX Runtime and post-processes with NMS.

use crate::source::Frame;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; place det_10g.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds face regions in a frame.
///
/// Zero, one or many regions are all valid results. Order carries no
/// meaning beyond the implementation's own ranking.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Scale and padding applied when fitting a frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Pre-NMS detection in frame space, unclamped.
#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamp to the frame; `None` when nothing of the box remains.
    fn into_region(self, width: u32, height: u32) -> Option<FaceRegion> {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        let left = clamp(self.x1, width);
        let right = clamp(self.x2, width);
        let top = clamp(self.y1, height);
        let bottom = clamp(self.y2, height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(FaceRegion {
            top,
            right,
            bottom,
            left,
            confidence: self.score,
            landmarks: self.landmarks,
        })
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    strides: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let strides = map_outputs(&output_names);
        tracing::debug!(?strides, "SCRFD output mapping");

        Ok(Self { session, strides })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
        let (input, letterbox) = preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.strides[slot];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = tensor(score_idx, "scores")?;
            let bboxes = tensor(bbox_idx, "bboxes")?;
            let kps = tensor(kps_idx, "kps")?;

            candidates.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let regions: Vec<FaceRegion> = nms(candidates, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter_map(|c| c.into_region(frame.width(), frame.height()))
            .collect();

        tracing::trace!(faces = regions.len(), seq = frame.sequence, "SCRFD detect");
        Ok(regions)
    }
}

/// Letterbox the frame into a normalised 1×3×640×640 tensor.
fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height(), SCRFD_INPUT_SIZE);
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
    let resized = imageops::resize(&frame.image, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    // Padding is zero after normalisation, which is what the model expects.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (ox + x as usize, oy + y as usize);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map SCRFD outputs to stride slots.
///
/// Named exports ("score_8", "bbox_16", "kps_32", ...) are matched by name.
/// Anything else uses the standard positional layout:
/// scores 0–2, bboxes 3–5, kps 6–8.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut named = [(0, 0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => named[slot] = (s, b, k),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognised; using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Decode anchor-relative boxes and landmarks for a single stride.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut out = Vec::new();
    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= threshold {
            continue;
        }
        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let ax = (cell % grid) as f32 * s;
        let ay = (cell / grid) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
        let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

        let landmarks: Option<[(f32, f32); 5]> = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        out.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
            landmarks,
        });
    }
    out
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if keep.iter().all(|k| k.iou(&c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}
