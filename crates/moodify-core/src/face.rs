//! SCRFD face locator via ONNX Runtime.
//!
//! Finds the most confident face in an RGB frame so the expression model can
//! work on a face crop. Only scores and boxes are decoded; landmarks are unused.

use crate::classifier::ClassifierError;
use crate::types::FaceRegion;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Scale and padding applied when fitting a frame into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> (Self, usize, usize) {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let letterbox = Letterbox {
            scale,
            pad_x: ((SCRFD_INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((SCRFD_INPUT_SIZE - new_h) / 2) as f32,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output positions of the (scores, boxes) tensors for each stride.
type StrideOutputs = [(usize, usize); 3];

/// SCRFD-based face locator.
pub struct FaceLocator {
    session: Session,
    stride_outputs: StrideOutputs,
}

impl FaceLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ClassifierError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        // 6 outputs: scores + boxes per stride; 9 adds keypoints.
        if num_outputs < 6 {
            return Err(ClassifierError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let stride_outputs = stride_output_indices(&names);
        tracing::info!(
            path = model_path,
            outputs = num_outputs,
            ?stride_outputs,
            "loaded SCRFD face locator"
        );

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Return the most confident face in the frame, or `None` if there is none.
    pub fn locate(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceRegion>, ClassifierError> {
        let (input, letterbox) = preprocess(rgb, width, height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, box_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_outputs) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                ClassifierError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[box_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| {
                    ClassifierError::InferenceFailed(format!("boxes stride {stride}: {e}"))
                })?;
            candidates.extend(decode_level(
                scores,
                boxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detections");
        Ok(faces.into_iter().next())
    }
}

/// Find `score_<stride>` / `bbox_<stride>` outputs by name. Exports without
/// those names are assumed to list all scores first, then all boxes.
fn stride_output_indices(names: &[String]) -> StrideOutputs {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut indices = [(0, 0); 3];
    for (slot, &stride) in indices.iter_mut().zip(&SCRFD_STRIDES) {
        match (position("score", stride), position("bbox", stride)) {
            (Some(score), Some(bbox)) => *slot = (score, bbox),
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized; using positional mapping");
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    indices
}

/// Letterbox an RGB frame into a 1×3×640×640 tensor, padding with the mean.
fn preprocess(
    rgb: &[u8],
    width: u32,
    height: u32,
) -> Result<(Array4<f32>, Letterbox), ClassifierError> {
    let image = RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
        ClassifierError::InvalidInput(format!("buffer does not hold {width}x{height} RGB"))
    })?;

    let (letterbox, new_w, new_h) = Letterbox::fit(width as usize, height as usize);
    let resized = image::imageops::resize(&image, new_w as u32, new_h as u32, FilterType::Triangle);

    // Padding pixels normalize to 0.0.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let (x_off, y_off) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + x_off, y as usize + y_off);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    Ok((tensor, letterbox))
}

/// Decode boxes above `threshold` for one stride level, in frame coordinates.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let s = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let off = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = ((cell % grid_w) * stride) as f32;
            let cy = ((cell / grid_w) * stride) as f32;

            let (x1, y1) = letterbox.unmap(cx - off[0] * s, cy - off[1] * s);
            let (x2, y2) = letterbox.unmap(cx + off[2] * s, cy + off[3] * s);
            Some(FaceRegion {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression; the result is sorted by descending confidence.
fn nms(mut candidates: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<FaceRegion> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, size: f32, confidence: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: size,
            height: size,
            confidence,
        }
    }

    #[test]
    fn test_letterbox_landscape() {
        let (lb, new_w, new_h) = Letterbox::fit(1280, 720);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!((new_w, new_h), (640, 360));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        assert_eq!(lb.unmap(0.0, 140.0), (0.0, 0.0));
        assert_eq!(lb.unmap(640.0, 500.0), (1280.0, 720.0));
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let rgb = vec![255u8; 64 * 32 * 3];
        let (tensor, lb) = preprocess(&rgb, 64, 32).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // Top rows are padding.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Image content sits below the padding.
        let y = lb.pad_y as usize + 10;
        let expected = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, y, 10]] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_rejects_bad_buffer() {
        assert!(preprocess(&[0u8; 10], 64, 32).is_err());
    }

    #[test]
    fn test_decode_level_single_anchor() {
        let stride = 32;
        let grid_w = SCRFD_INPUT_SIZE / stride;
        let anchors = grid_w * grid_w * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];

        // Cell (row 2, col 3), first anchor.
        let idx = (2 * grid_w + 3) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let faces = decode_level(&scores, &boxes, stride, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = faces[0];
        assert_eq!((f.x, f.y), (96.0 - 32.0, 64.0 - 32.0));
        assert_eq!((f.width, f.height), (64.0, 64.0));
        assert_eq!(f.confidence, 0.9);
    }

    #[test]
    fn test_decode_level_below_threshold() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let faces = decode_level(&[0.3, 0.5], &[1.0; 8], 32, &lb, 0.5);
        assert!(faces.is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlap() {
        let faces = nms(
            vec![
                region(0.0, 0.0, 100.0, 0.7),
                region(5.0, 5.0, 100.0, 0.9),
                region(300.0, 300.0, 50.0, 0.6),
            ],
            SCRFD_NMS_THRESHOLD,
        );
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].confidence, 0.9);
        assert_eq!(faces[1].confidence, 0.6);
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_stride_outputs_by_name() {
        let outputs = names(&[
            "bbox_8", "score_8", "kps_8", "bbox_16", "score_16", "kps_16", "bbox_32", "score_32",
            "kps_32",
        ]);
        assert_eq!(stride_output_indices(&outputs), [(1, 0), (4, 3), (7, 6)]);
    }

    #[test]
    fn test_stride_outputs_positional_fallback() {
        let outputs = names(&["448", "471", "494", "451", "474", "497"]);
        assert_eq!(stride_output_indices(&outputs), [(0, 3), (1, 4), (2, 5)]);

        // A partial naming is not trusted either.
        let partial = names(&["score_8", "bbox_8", "x", "y", "z", "w"]);
        assert_eq!(stride_output_indices(&partial), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_load_missing_model() {
        let result = FaceLocator::load("/nonexistent/det_10g.onnx");
        assert!(matches!(result, Err(ClassifierError::ModelNotFound(_))));
    }
}
