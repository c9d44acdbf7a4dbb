//! Emotion classifier seam shared by the local and remote backends.

use crate::types::EmotionResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0} (place the ONNX model in the model directory)")]
    ModelNotFound(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("classifier returned no usable emotion")]
    NoResult,
    #[error("classifier service error: {0}")]
    Service(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Classifies the dominant facial emotion in an RGB image.
///
/// Implementations never require a confidently located face: when none is
/// found they classify the whole image and still return a best-effort label.
pub trait EmotionClassifier: Send {
    /// `rgb` holds `width * height` pixels, three bytes each, in RGB order.
    fn classify(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionResult, ClassifierError>;
}

impl<T: EmotionClassifier + ?Sized> EmotionClassifier for Box<T> {
    fn classify(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionResult, ClassifierError> {
        (**self).classify(rgb, width, height)
    }
}

/// Check that an RGB buffer matches its stated dimensions.
pub(crate) fn check_rgb_input(rgb: &[u8], width: u32, height: u32) -> Result<(), ClassifierError> {
    let expected = width as usize * height as usize * 3;
    if width == 0 || height == 0 {
        return Err(ClassifierError::InvalidInput(format!(
            "empty image ({width}x{height})"
        )));
    }
    if rgb.len() != expected {
        return Err(ClassifierError::InvalidInput(format!(
            "expected {expected} bytes for {width}x{height} RGB, got {}",
            rgb.len()
        )));
    }
    Ok(())
}
