use std::collections::BTreeMap;

use serde::Serialize;

/// The payload every detection endpoint produces. Video responses carry the
/// extra frame-level counters; other modalities leave them unset and the
/// fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub prediction: String,
    pub is_positive: bool,
    pub confidence: f32,
    pub raw_scores: BTreeMap<String, f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_analyzed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fake_frames: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fake_percentage: Option<f32>,
}

impl DetectionResult {
    pub fn classified(
        prediction: impl Into<String>,
        is_positive: bool,
        confidence: f32,
        raw_scores: BTreeMap<String, f32>,
    ) -> Self {
        Self {
            prediction: prediction.into(),
            is_positive,
            confidence,
            raw_scores,
            error: None,
            frames_analyzed: None,
            fake_frames: None,
            fake_percentage: None,
        }
    }

    pub fn processing_error(message: impl Into<String>) -> Self {
        Self {
            prediction: "Error in processing".to_string(),
            is_positive: false,
            confidence: 0.0,
            raw_scores: BTreeMap::new(),
            error: Some(message.into()),
            frames_analyzed: None,
            fake_frames: None,
            fake_percentage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_result_shape() {
        let result = DetectionResult::processing_error("corrupt file");
        assert_eq!(result.prediction, "Error in processing");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error.as_deref(), Some("corrupt file"));
        assert!(!result.is_positive);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let result = DetectionResult::classified("Genuine", false, 95.0, BTreeMap::new());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("frames_analyzed").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["confidence"], 95.0);
    }
}
