use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::sync::Arc;

/// Result payload produced by the external diagnosis processor.
///
/// The schema belongs to the processor, so the payload is kept as the exact
/// JSON text it arrived as and handed back unchanged. The only rule enforced
/// is that it carries something: `null`, `{}`, `[]` and `""` are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisResult(Arc<str>);

impl DiagnosisResult {
    pub fn from_raw(raw: &RawValue) -> Result<Self, ResultError> {
        Self::from_json_text(raw.get())
    }

    pub fn from_json_text(text: &str) -> Result<Self, ResultError> {
        let value: Value = serde_json::from_str(text).map_err(ResultError::Malformed)?;
        let empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        if empty {
            return Err(ResultError::Empty);
        }
        Ok(Self(Arc::from(text.trim())))
    }

    /// The stored JSON text, byte for byte.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("Result is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Result is empty")]
    Empty,
}

/// Webhook body delivered by the processor for the keyed flow.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[garde(required, length(min = 1, max = 128))]
    pub diagnosis_id: Option<String>,

    #[garde(skip)]
    pub result: Option<Box<RawValue>>,
}

/// POST /api/v1/diagnosis body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// Reference returned by the upload endpoint.
    #[serde(alias = "fileName", alias = "fileReference")]
    #[garde(length(min = 1, max = 2048))]
    pub image_url: String,

    #[serde(default)]
    #[garde(length(max = 32), inner(length(min = 1, max = 64)))]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub diagnosis_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackAck {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub image_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    pub id: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_keeps_exact_text() {
        let text = r#"{"weather":"cloudy","isAppropriate":true,"temperature":18}"#;
        let result = DiagnosisResult::from_json_text(text).unwrap();
        assert_eq!(result.as_str(), text);
    }

    #[test]
    fn test_empty_results_rejected() {
        for text in ["null", "{}", "[]", "\"\"", "  {  }  "] {
            assert!(
                matches!(DiagnosisResult::from_json_text(text), Err(ResultError::Empty)),
                "{text} should be rejected"
            );
        }
        assert!(matches!(
            DiagnosisResult::from_json_text("{not json"),
            Err(ResultError::Malformed(_))
        ));
    }

    #[test]
    fn test_callback_payload_validation() {
        let payload: CallbackPayload =
            serde_json::from_str(r#"{"diagnosisId":"abc123","result":{"ok":1}}"#).unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.result.unwrap().get(), r#"{"ok":1}"#);

        let missing: CallbackPayload = serde_json::from_str(r#"{"result":{"ok":1}}"#).unwrap();
        assert!(missing.validate().is_err());

        let blank: CallbackPayload =
            serde_json::from_str(r#"{"diagnosisId":"","result":{"ok":1}}"#).unwrap();
        assert!(blank.validate().is_err());

        let null_result: CallbackPayload =
            serde_json::from_str(r#"{"diagnosisId":"abc","result":null}"#).unwrap();
        assert!(null_result.result.is_none());
    }

    #[test]
    fn test_initiate_request_accepts_file_name_alias() {
        let req: InitiateRequest =
            serde_json::from_str(r#"{"fileName":"clothes/1.jpg","tags":["winter"]}"#).unwrap();
        assert_eq!(req.image_url, "clothes/1.jpg");
        assert!(req.validate().is_ok());

        let bad: InitiateRequest =
            serde_json::from_str(r#"{"imageUrl":"x","tags":[""]}"#).unwrap();
        assert!(bad.validate().is_err());
    }
}
