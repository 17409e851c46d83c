use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::token::CorrelationToken;

/// Job handed to the external diagnosis processor. Built once and never
/// mutated after it is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub correlation_token: CorrelationToken,
    pub content: JobContent,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContent {
    pub file_reference: String,
    pub tags: Vec<String>,
    pub callback_address: String,
}

impl JobRequest {
    pub fn new(
        correlation_token: CorrelationToken,
        file_reference: String,
        tags: Vec<String>,
        callback_address: String,
    ) -> Self {
        Self {
            correlation_token,
            content: JobContent {
                file_reference,
                tags,
                callback_address,
            },
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_request_wire_shape() {
        let token = CorrelationToken::parse("abc123").unwrap();
        let request = JobRequest::new(
            token,
            "https://bucket/clothes/1.jpg".to_string(),
            vec!["coat".to_string()],
            "http://localhost:3000/api/v1/diagnosis/callback".to_string(),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["correlationToken"], "abc123");
        assert_eq!(json["content"]["fileReference"], "https://bucket/clothes/1.jpg");
        assert_eq!(json["content"]["tags"][0], "coat");
        assert_eq!(
            json["content"]["callbackAddress"],
            "http://localhost:3000/api/v1/diagnosis/callback"
        );
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
