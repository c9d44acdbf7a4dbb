//! Facial-expression classifier via ONNX Runtime.
//!
//! Runs a 7-class expression model on a 48x48 grayscale face crop. The crop
//! comes from the optional [`FaceLocator`]; without one, or when no face is
//! found, the whole frame is classified.

use crate::classifier::{check_rgb_input, ClassifierError, EmotionClassifier};
use crate::face::FaceLocator;
use crate::types::{Emotion, EmotionResult};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::BTreeMap;
use std::path::Path;

const EXPRESSION_INPUT_SIZE: u32 = 48;
const EXPRESSION_CLASSES: usize = Emotion::ALL.len();

/// ONNX facial-expression classifier with optional face cropping.
pub struct ExpressionClassifier {
    session: Session,
    locator: Option<FaceLocator>,
}

impl ExpressionClassifier {
    /// Load the expression model; `locator` crops faces before classification.
    pub fn load(model_path: &str, locator: Option<FaceLocator>) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            face_locator = locator.is_some(),
            "loaded expression model"
        );

        Ok(Self { session, locator })
    }

    /// Grayscale crop to classify: the located face, or the whole frame.
    fn face_crop(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<GrayImage, ClassifierError> {
        let image = RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
            ClassifierError::InvalidInput(format!("buffer does not hold {width}x{height} RGB"))
        })?;
        let gray = DynamicImage::ImageRgb8(image).to_luma8();

        let Some(locator) = self.locator.as_mut() else {
            return Ok(gray);
        };

        let region = match locator.locate(rgb, width, height) {
            Ok(Some(face)) => face.clamp_to(width, height),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "face locator failed; classifying whole frame");
                None
            }
        };

        match region {
            Some((x, y, w, h)) => {
                tracing::debug!(x, y, w, h, "classifying face crop");
                Ok(image::imageops::crop_imm(&gray, x, y, w, h).to_image())
            }
            None => {
                tracing::debug!("no face located; classifying whole frame");
                Ok(gray)
            }
        }
    }
}

impl EmotionClassifier for ExpressionClassifier {
    fn classify(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionResult, ClassifierError> {
        check_rgb_input(rgb, width, height)?;

        let crop = self.face_crop(rgb, width, height)?;
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("expression scores: {e}")))?;

        scores_to_result(raw)
    }
}

/// Resize a grayscale crop into a 1x48x48x1 tensor scaled to [0, 1].
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let size = EXPRESSION_INPUT_SIZE;
    let resized = image::imageops::resize(crop, size, size, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, size as usize, size as usize, 1));
    for (x, y, px) in resized.enumerate_pixels() {
        tensor[[0, y as usize, x as usize, 0]] = px[0] as f32 / 255.0;
    }
    tensor
}

/// Turn raw model output into an [`EmotionResult`], applying softmax to logits.
fn scores_to_result(raw: &[f32]) -> Result<EmotionResult, ClassifierError> {
    if raw.len() != EXPRESSION_CLASSES {
        return Err(ClassifierError::InferenceFailed(format!(
            "expected {EXPRESSION_CLASSES} expression scores, got {}",
            raw.len()
        )));
    }

    let is_distribution =
        raw.iter().all(|v| (0.0..=1.0).contains(v)) && (raw.iter().sum::<f32>() - 1.0).abs() < 1e-3;
    let probs = if is_distribution {
        raw.to_vec()
    } else {
        softmax(raw)
    };

    let scores: BTreeMap<String, f32> = Emotion::ALL
        .iter()
        .zip(probs)
        .map(|(emotion, p)| (emotion.as_str().to_string(), p))
        .collect();

    EmotionResult::from_scores(scores).ok_or(ClassifierError::NoResult)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
