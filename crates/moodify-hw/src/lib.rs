//! moodify-hw: Image sources for the mood pipeline.
//!
//! Provides V4L2 webcam capture and decoding of uploaded image files,
//! both producing channel-order tagged [`Frame`]s.

pub mod camera;
pub mod frame;
pub mod upload;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::{ChannelOrder, Frame, FrameError};
pub use upload::{decode_upload, decode_upload_bytes, UploadError};
