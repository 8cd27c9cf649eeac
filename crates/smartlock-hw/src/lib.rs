//! smartlock-hw — Camera capture for the recognition loop.
//!
//! Provides V4L2 camera access and conversion of the negotiated pixel
//! format into the RGB frames `smartlock-core` consumes.

pub mod camera;
pub mod convert;

pub use camera::{Camera, CameraError, DeviceInfo, LiveFeed, PixelFormat, DEFAULT_CAPTURE_TIMEOUT};
