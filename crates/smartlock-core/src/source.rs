//! Frames and the capture seam the recognition loop pulls from.

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;

/// A captured RGB camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Driver sequence number (or a local counter for sources without one).
    pub sequence: u32,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u32) -> Self {
        Self {
            image,
            sequence,
            captured_at: Local::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Anything that hands out frames on demand.
///
/// Implementations are owned by a single producer; nothing else calls
/// `next_frame` concurrently.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;
}
