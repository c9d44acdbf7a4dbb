//! Decoding of user-supplied image files (jpg, jpeg, png).

use crate::frame::{ChannelOrder, Frame};
use image::ImageFormat;
use std::path::Path;
use thiserror::Error;

/// File extensions accepted for upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("unsupported file type: {0} (expected jpg, jpeg or png)")]
    UnsupportedType(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Read and decode an uploaded image file into an RGB frame.
pub fn decode_upload(path: &Path) -> Result<Frame, UploadError> {
    let name = path.to_string_lossy();
    // Reject by extension before touching the file.
    image_format_for(&name)?;

    let bytes = std::fs::read(path).map_err(|source| UploadError::Read {
        path: name.to_string(),
        source,
    })?;
    decode_upload_bytes(&bytes, &name)
}

/// Decode uploaded image bytes; `name` supplies the extension used to pick the decoder.
pub fn decode_upload_bytes(bytes: &[u8], name: &str) -> Result<Frame, UploadError> {
    let format = image_format_for(name)?;

    let rgb = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| UploadError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();

    tracing::debug!(name, width, height, ?format, "decoded upload");

    Frame::new(rgb.into_raw(), width, height, ChannelOrder::Rgb)
        .map_err(|e| UploadError::Decode(e.to_string()))
}

fn image_format_for(name: &str) -> Result<ImageFormat, UploadError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError::UnsupportedType(if ext.is_empty() {
            name.to_string()
        } else {
            ext
        }));
    }
    ImageFormat::from_extension(&ext).ok_or(UploadError::UnsupportedType(ext))
}
