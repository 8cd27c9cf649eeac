use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A detected face rectangle in pixel coordinates of one frame.
///
/// Edges follow the `(top, right, bottom, left)` convention; `right` and
/// `bottom` are exclusive. Regions are produced fresh for every frame and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
    /// Detector score in [0, 1].
    pub confidence: f32,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceRegion {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// True when either side is shorter than `min_side` pixels.
    pub fn is_degenerate(&self, min_side: u32) -> bool {
        self.width() < min_side || self.height() < min_side
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SignatureError {
    #[error("signature has no components")]
    Empty,
    #[error("signature component {index} is not finite")]
    NonFinite { index: usize },
}

/// Fixed-length face signature.
///
/// Immutable once built. Two signatures are compared by Euclidean distance;
/// signatures of different dimension are infinitely far apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`, or `f32::INFINITY` on a dimension mismatch.
    pub fn distance(&self, other: &Signature) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(signature: Signature) -> Self {
        signature.values
    }
}
