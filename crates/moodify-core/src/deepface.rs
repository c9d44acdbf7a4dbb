//! Remote classifier talking to a DeepFace-compatible `/analyze` endpoint.
//!
//! The service has answered with a bare record, a list of records, or an
//! object wrapping either under `results` depending on its version. All of
//! them are normalized here into one [`EmotionResult`] (first record wins).

use crate::classifier::{check_rgb_input, ClassifierError, EmotionClassifier};
use crate::types::EmotionResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// One face analysis record as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRecord {
    pub dominant_emotion: Option<String>,
    /// Per-emotion scores, in percent.
    #[serde(default)]
    pub emotion: BTreeMap<String, f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<AnalysisRecord>),
    One(AnalysisRecord),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: OneOrMany },
    Bare(OneOrMany),
}

/// Parse an `/analyze` response body into a single emotion result.
pub fn parse_analyze_response(body: &str) -> Result<EmotionResult, ClassifierError> {
    let response: AnalyzeResponse = serde_json::from_str(body)
        .map_err(|e| ClassifierError::Service(format!("unexpected response: {e}")))?;

    let payload = match response {
        AnalyzeResponse::Wrapped { results } => results,
        AnalyzeResponse::Bare(payload) => payload,
    };
    let record = match payload {
        OneOrMany::One(record) => record,
        OneOrMany::Many(records) => records.into_iter().next().ok_or(ClassifierError::NoResult)?,
    };

    record_to_result(record)
}

fn record_to_result(record: AnalysisRecord) -> Result<EmotionResult, ClassifierError> {
    // Scores come in percent; keep them as fractions.
    let percent = record.emotion.values().sum::<f32>() > 1.5;
    let scores: BTreeMap<String, f32> = record
        .emotion
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), if percent { v / 100.0 } else { v }))
        .collect();

    match record.dominant_emotion {
        Some(label) if !label.trim().is_empty() => Ok(EmotionResult {
            label: label.to_lowercase(),
            scores,
        }),
        _ => EmotionResult::from_scores(scores).ok_or(ClassifierError::NoResult),
    }
}

/// Classifier backed by a DeepFace-compatible HTTP service.
pub struct DeepFaceClassifier {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl DeepFaceClassifier {
    /// `base_url` is the service root, e.g. `http://127.0.0.1:5005`.
    pub fn new(base_url: &str) -> Result<Self, ClassifierError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ClassifierError::Service(e.to_string()))?;

        let endpoint = format!("{}/analyze", base_url.trim_end_matches('/'));
        tracing::info!(endpoint = %endpoint, "using DeepFace classifier service");

        Ok(Self { http, endpoint })
    }
}

impl EmotionClassifier for DeepFaceClassifier {
    fn classify(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionResult, ClassifierError> {
        check_rgb_input(rgb, width, height)?;

        let body = analyze_request_body(rgb, width, height)?;

        tracing::debug!(endpoint = %self.endpoint, width, height, "requesting emotion analysis");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| ClassifierError::Service(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ClassifierError::Service(e.to_string()))?;

        if !status.is_success() {
            return Err(ClassifierError::Service(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        parse_analyze_response(&text)
    }
}

/// `/analyze` payload: emotion only, and no error when the service finds no face.
fn analyze_request_body(
    rgb: &[u8],
    width: u32,
    height: u32,
) -> Result<serde_json::Value, ClassifierError> {
    Ok(serde_json::json!({
        "img": encode_data_uri(rgb, width, height)?,
        "actions": ["emotion"],
        "enforce_detection": false,
    }))
}

/// JPEG-encode an RGB buffer as a base64 `data:` URI.
fn encode_data_uri(rgb: &[u8], width: u32, height: u32) -> Result<String, ClassifierError> {
    let image = RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
        ClassifierError::InvalidInput(format!("buffer does not hold {width}x{height} RGB"))
    })?;

    let mut jpeg = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut jpeg, ImageFormat::Jpeg)
        .map_err(|e| ClassifierError::InvalidInput(format!("JPEG encoding failed: {e}")))?;

    Ok(format!(
        "data:image/jpeg;base64,{}",
        STANDARD.encode(jpeg.into_inner())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "dominant_emotion": "happy",
        "emotion": {"angry": 1.0, "disgust": 0.0, "fear": 1.0, "happy": 90.0,
                    "sad": 2.0, "surprise": 3.0, "neutral": 3.0},
        "region": {"x": 10, "y": 20, "w": 100, "h": 100}
    }"#;

    #[test]
    fn test_parse_bare_record() {
        let result = parse_analyze_response(RECORD).unwrap();
        assert_eq!(result.label, "happy");
        assert!((result.scores["happy"] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_parse_record_list() {
        let body = format!("[{RECORD}, {{\"dominant_emotion\": \"sad\"}}]");
        let result = parse_analyze_response(&body).unwrap();
        assert_eq!(result.label, "happy");
    }

    #[test]
    fn test_parse_wrapped_results() {
        let list = parse_analyze_response(&format!("{{\"results\": [{RECORD}]}}")).unwrap();
        let single = parse_analyze_response(&format!("{{\"results\": {RECORD}}}")).unwrap();
        assert_eq!(list, single);
    }

    #[test]
    fn test_parse_label_is_lowercased() {
        let result = parse_analyze_response(r#"{"dominant_emotion": "Neutral"}"#).unwrap();
        assert_eq!(result.label, "neutral");
        assert!(result.scores.is_empty());
    }

    #[test]
    fn test_parse_falls_back_to_top_score() {
        let result =
            parse_analyze_response(r#"{"emotion": {"fear": 70.0, "sad": 30.0}}"#).unwrap();
        assert_eq!(result.label, "fear");
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(matches!(
            parse_analyze_response("[]"),
            Err(ClassifierError::NoResult)
        ));
        assert!(matches!(
            parse_analyze_response(r#"{"results": []}"#),
            Err(ClassifierError::NoResult)
        ));
    }

    #[test]
    fn test_parse_record_without_anything() {
        assert!(matches!(
            parse_analyze_response("{}"),
            Err(ClassifierError::NoResult)
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_analyze_response("not json"),
            Err(ClassifierError::Service(_))
        ));
    }

    #[test]
    fn test_encode_data_uri() {
        let uri = encode_data_uri(&[200u8; 4 * 4 * 3], 4, 4).unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,/9j/"));
    }

    #[test]
    fn test_analyze_request_body() {
        let body = analyze_request_body(&[90u8; 6 * 4 * 3], 6, 4).unwrap();
        assert_eq!(body["actions"], serde_json::json!(["emotion"]));
        assert_eq!(body["enforce_detection"], serde_json::json!(false));
        assert!(body["img"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_analyze_request_body_rejects_short_buffer() {
        assert!(matches!(
            analyze_request_body(&[0u8; 10], 6, 4),
            Err(ClassifierError::InvalidInput(_))
        ));
    }
}
