//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, ChannelOrder, Frame};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// `EBUSY` from errno.h; another process holds the device.
const EBUSY: i32 = 16;

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
}

/// Anything that can hand out still frames on demand.
///
/// Dropping the source releases whatever device it holds.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
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
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// Motion-JPEG, each buffer decoded as a JPEG image.
    Mjpeg,
    /// Packed 24-bit RGB.
    Rgb24,
    /// Packed 24-bit BGR (delivered as-is, tagged `Bgr`).
    Bgr24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            _ => None,
        }
    }
}

/// An open, streaming V4L2 camera.
///
/// The device is held for the lifetime of this value and released on drop.
pub struct Camera {
    stream: MmapStream<'static>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 webcam (e.g. "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        let device = open_capture_device(device_path)?;

        let (negotiated, pixel_format) = negotiate_format(&device)?;
        let fourcc = negotiated.fourcc;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("mmap stream setup: {e}")))?;

        Ok(Self {
            stream,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Convert a raw buffer into a color frame based on the negotiated format.
    fn decode_buffer(&self, buf: &[u8]) -> Result<(Vec<u8>, ChannelOrder), CameraError> {
        let packed_len = (self.width * self.height * 3) as usize;

        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map(|rgb| (rgb, ChannelOrder::Rgb))
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                    .to_rgb8();
                if decoded.width() != self.width || decoded.height() != self.height {
                    return Err(CameraError::CaptureFailed(format!(
                        "MJPG frame is {}x{}, expected {}x{}",
                        decoded.width(),
                        decoded.height(),
                        self.width,
                        self.height
                    )));
                }
                Ok((decoded.into_raw(), ChannelOrder::Rgb))
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
                if buf.len() < packed_len {
                    return Err(CameraError::CaptureFailed(format!(
                        "packed buffer too short: expected {packed_len}, got {}",
                        buf.len()
                    )));
                }
                let order = if self.pixel_format == PixelFormat::Bgr24 {
                    ChannelOrder::Bgr
                } else {
                    ChannelOrder::Rgb
                };
                Ok((buf[..packed_len].to_vec(), order))
            }
        }
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                supports_capture(&caps).then(|| DeviceInfo {
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                    path,
                })
            })
            .collect()
    }
}

fn supports_capture(caps: &v4l::capability::Capabilities) -> bool {
    caps.capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
}

/// Request 640x480 YUYV and accept whatever supported format the driver settles on.
fn negotiate_format(device: &Device) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let mut requested = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("reading format: {e}")))?;
    requested.fourcc = FourCC::new(b"YUYV");
    requested.width = CAPTURE_WIDTH;
    requested.height = CAPTURE_HEIGHT;

    let negotiated = device
        .set_format(&requested)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("setting format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "driver chose {:?}; only YUYV, MJPG, RGB3 and BGR3 are handled",
            negotiated.fourcc
        ))
    })?;

    tracing::info!(
        width = negotiated.width,
        height = negotiated.height,
        format = ?pixel_format,
        "capture format negotiated"
    );
    Ok((negotiated, pixel_format))
}

/// Open `path` and check it can capture video.
fn open_capture_device(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }

    let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(code) if code == EBUSY => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::CaptureFailed(format!("querying {path}: {e}")))?;
    if !supports_capture(&caps) {
        return Err(CameraError::StreamingNotSupported);
    }

    tracing::info!(device = path, card = %caps.card, driver = %caps.driver, "webcam opened");
    Ok(device)
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;
        let buf = buf.to_vec();

        let (data, order) = self.decode_buffer(&buf)?;

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            order,
            timestamp: Instant::now(),
            sequence,
        })
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}
