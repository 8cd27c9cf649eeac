//! V4L2 camera capture via the `v4l` crate.

use crate::convert;
use smartlock_core::{CaptureError, Frame, FrameSource};
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const STREAM_BUFFERS: u32 = 4;

/// How long a dequeue may wait for the driver before the camera counts as stalled.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no frame within {0:?}")]
    Stalled(Duration),
}

impl From<CameraError> for CaptureError {
    fn from(e: CameraError) -> Self {
        CaptureError::DeviceUnavailable(e.to_string())
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG, one JPEG per buffer (typical USB webcam output).
    Mjpg,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (IR cameras).
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(Self::Mjpg),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    capture_timeout: Duration,
}

impl Camera {
    /// Open a V4L2 camera and negotiate `width`×`height` at `fps`.
    ///
    /// MJPG is requested first; the driver may answer with YUYV or GREY
    /// instead, which are accepted too.
    pub fn open(device_path: &str, width: u32, height: u32, fps: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"MJPG");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need MJPG, YUYV, or GREY)",
                negotiated.fourcc
            ))
        })?;

        if negotiated.width != width || negotiated.height != height {
            tracing::warn!(
                requested = %format!("{width}x{height}"),
                actual = %format!("{}x{}", negotiated.width, negotiated.height),
                "camera resolution differs from requested"
            );
        }

        // Frame rate is advisory; some drivers reject it.
        match device.set_params(&Parameters::with_fps(fps)) {
            Ok(params) => tracing::debug!(interval = ?params.interval, "frame interval set"),
            Err(e) => tracing::warn!(fps, error = %e, "could not set frame rate; using driver default"),
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        })
    }

    /// Bound every dequeue on feeds created after this call.
    pub fn set_capture_timeout(&mut self, timeout: Duration) {
        self.capture_timeout = timeout.max(Duration::from_millis(1));
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start streaming. Frames are pulled through [`FrameSource`].
    pub fn feed(&self) -> Result<LiveFeed<'_>, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
                |e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")),
            )?;
        // Without a timeout the driver poll waits forever on a stalled device.
        stream.set_timeout(self.capture_timeout);
        Ok(LiveFeed {
            camera: self,
            stream,
            timeout: self.capture_timeout,
        })
    }

    /// Convert a raw buffer to RGB based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<image::RgbImage, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Mjpg => convert::mjpg_to_rgb(buf),
            PixelFormat::Yuyv => convert::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => convert::grey_to_rgb(buf, self.width, self.height),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// An open capture stream on a [`Camera`].
///
/// Dropping the feed stops streaming and releases the buffers.
pub struct LiveFeed<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    timeout: Duration,
}

impl LiveFeed<'_> {
    /// Pull and drop `count` frames (auto-exposure settles during these).
    pub fn discard(&mut self, count: u32) -> Result<(), CameraError> {
        for i in 0..count {
            let timeout = self.timeout;
            let (_, meta) = self
                .stream
                .next()
                .map_err(|e| dequeue_error(e, timeout, &format!("warmup frame {i}")))?;
            tracing::trace!(seq = meta.sequence, "discarded warmup frame");
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        let timeout = self.timeout;
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| dequeue_error(e, timeout, "buffer"))?;
        let sequence = meta.sequence;
        let used = (meta.bytesused as usize).min(buf.len());
        let image = self.camera.buf_to_rgb(if used > 0 { &buf[..used] } else { buf })?;
        Ok(Frame::new(image, sequence))
    }
}

fn dequeue_error(e: io::Error, timeout: Duration, what: &str) -> CameraError {
    if e.kind() == io::ErrorKind::TimedOut {
        tracing::error!(?timeout, what, "camera stopped delivering frames");
        CameraError::Stalled(timeout)
    } else {
        CameraError::CaptureFailed(format!("failed to dequeue {what}: {e}"))
    }
}

impl FrameSource for LiveFeed<'_> {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.capture().map_err(CaptureError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", 640, 480, 30).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_dequeue_timeout_is_stall() {
        let timeout = Duration::from_millis(250);
        let err = dequeue_error(io::Error::from(io::ErrorKind::TimedOut), timeout, "buffer");
        assert!(matches!(err, CameraError::Stalled(t) if t == timeout));

        // A stall ends the recognition loop like any other capture failure.
        let CaptureError::DeviceUnavailable(msg) = CaptureError::from(err);
        assert!(msg.contains("no frame within"), "{msg}");
    }

    #[test]
    fn test_other_dequeue_errors_are_capture_failures() {
        let err = dequeue_error(
            io::Error::from(io::ErrorKind::BrokenPipe),
            DEFAULT_CAPTURE_TIMEOUT,
            "buffer",
        );
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }

    #[test]
    fn test_camera_error_becomes_capture_error() {
        let CaptureError::DeviceUnavailable(msg) = CaptureError::from(CameraError::DeviceBusy);
        assert_eq!(msg, "device busy");
    }
}
