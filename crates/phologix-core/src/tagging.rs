//! Tagging service contract.
//!
//! The tagging service predicts tags for an image on disk. [`Tagger`] is
//! the seam the ingestion pipeline calls through; the HTTP client lives in
//! the `phologix` crate and tests substitute their own implementations.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One prediction, as returned by `POST /predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub file_path: String,
    #[serde(default)]
    pub predicted_tags: Vec<String>,
    #[serde(default)]
    pub scores: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait Tagger: Send + Sync {
    /// Predict tags for a single file.
    async fn predict(&self, file: &Path) -> Result<PredictResponse>;

    /// Predict tags for many files in one request, in input order.
    async fn predict_batch(&self, files: &[&Path]) -> Result<Vec<PredictResponse>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_response_without_optional_fields() {
        let resp: PredictResponse =
            serde_json::from_str(r#"{"file_path": "/a.png", "predicted_tags": ["cat"]}"#).unwrap();
        assert_eq!(resp.predicted_tags, vec!["cat".to_string()]);
        assert!(resp.scores.is_empty());
        assert!(resp.error.is_none());
    }
}
