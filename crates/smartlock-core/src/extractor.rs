//! Face signature extraction.
//!
//! [`ArcFaceExtractor`] aligns each face to the canonical 112×112 crop and
//! runs the ArcFace (w600k_r50) model, producing an L2-normalised signature.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::source::Frame;
use crate::types::{FaceRegion, Signature};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;

/// Regions narrower or shorter than this cannot carry a usable face.
pub const MIN_FACE_SIDE: u32 = 16;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("model file not found: {0}; place w600k_r50.onnx in the model directory")]
    ModelNotFound(String),
    #[error("region {width}x{height} is too small or degenerate")]
    DegenerateRegion { width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Computes one signature per face region.
///
/// The returned vector lines up with `regions`; a region whose extraction
/// failed holds its error in place, so later regions keep their index.
pub trait SignatureExtractor {
    fn extract(
        &mut self,
        frame: &Frame,
        regions: &[FaceRegion],
    ) -> Vec<Result<Signature, ExtractionError>>;
}

/// ArcFace-based signature extractor.
pub struct ArcFaceExtractor {
    session: Session,
}

impl ArcFaceExtractor {
    /// Load the ArcFace ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, ExtractionError> {
        if !model_path.exists() {
            return Err(ExtractionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    fn extract_one(&mut self, frame: &Frame, region: &FaceRegion) -> Result<Signature, ExtractionError> {
        let crop = face_crop(&frame.image, region)?;
        let input = to_tensor(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractionError::InferenceFailed(format!("embedding output: {e}")))?;

        Signature::new(l2_normalize(raw))
            .map_err(|e| ExtractionError::InferenceFailed(e.to_string()))
    }
}

impl SignatureExtractor for ArcFaceExtractor {
    fn extract(
        &mut self,
        frame: &Frame,
        regions: &[FaceRegion],
    ) -> Vec<Result<Signature, ExtractionError>> {
        regions
            .iter()
            .map(|region| self.extract_one(frame, region))
            .collect()
    }
}

/// Produce the 112×112 crop for `region`.
///
/// Landmarks give a properly aligned crop; without them the box itself is
/// resized.
fn face_crop(image: &RgbImage, region: &FaceRegion) -> Result<RgbImage, ExtractionError> {
    if region.is_degenerate(MIN_FACE_SIDE)
        || region.right > image.width()
        || region.bottom > image.height()
    {
        return Err(ExtractionError::DegenerateRegion {
            width: region.width(),
            height: region.height(),
        });
    }

    if let Some(landmarks) = &region.landmarks {
        if let Some(aligned) = alignment::align_face(image, landmarks) {
            return Ok(aligned);
        }
        tracing::debug!(?landmarks, "landmarks degenerate; falling back to box crop");
    }

    let view = imageops::crop_imm(image, region.left, region.top, region.width(), region.height());
    Ok(imageops::resize(
        &view.to_image(),
        ALIGNED_SIZE,
        ALIGNED_SIZE,
        FilterType::Triangle,
    ))
}

/// NCHW float tensor with symmetric ArcFace normalisation.
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
