//! HTTP client for the tagging service.
//!
//! Sends `POST /predict` with `{"file_path": ...}` for one file and
//! `POST /predict/batch` with a JSON array of paths for many. A non-2xx
//! status, a body that does not parse, or a single-file response that
//! carries an `error` field are all failures.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use phologix_core::tagging::{PredictResponse, Tagger};

use crate::config::TaggerConfig;

pub struct HttpTagger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTagger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &TaggerConfig) -> Result<Self> {
        Self::new(
            config.base_url(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        route: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, route);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("tagger returned {}: {}", status, body_text);
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .with_context(|| format!("malformed tagger response from {route}: {text}"))
    }
}

#[async_trait]
impl Tagger for HttpTagger {
    async fn predict(&self, file: &Path) -> Result<PredictResponse> {
        let body = serde_json::json!({ "file_path": file.to_string_lossy() });
        let response: PredictResponse = self.post("/predict", &body).await?;
        if let Some(err) = &response.error {
            bail!("tagger failed on {}: {}", file.display(), err);
        }
        Ok(response)
    }

    async fn predict_batch(&self, files: &[&Path]) -> Result<Vec<PredictResponse>> {
        let paths: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.post("/predict/batch", &serde_json::json!(paths)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn tagger(base: String) -> HttpTagger {
        HttpTagger::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn predict_parses_tags() {
        let app = Router::new().route(
            "/predict",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "file_path": body["file_path"],
                    "predicted_tags": ["cat", "sofa"],
                    "scores": {"cat": 0.9, "sofa": 0.6}
                }))
            }),
        );
        let client = tagger(serve(app).await);

        let resp = client.predict(Path::new("/photos/a.png")).await.unwrap();
        assert_eq!(resp.file_path, "/photos/a.png");
        assert_eq!(resp.predicted_tags, vec!["cat".to_string(), "sofa".to_string()]);
        assert_eq!(resp.scores["cat"], 0.9);
    }

    #[tokio::test]
    async fn server_error_is_a_failure() {
        let app = Router::new().route(
            "/predict",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let client = tagger(serve(app).await);

        let err = client.predict(Path::new("/a.png")).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn error_field_is_a_failure() {
        let app = Router::new().route(
            "/predict",
            post(|| async {
                Json(serde_json::json!({"file_path": "/a.png", "error": "cannot open"}))
            }),
        );
        let client = tagger(serve(app).await);
        assert!(client.predict(Path::new("/a.png")).await.is_err());
    }

    #[tokio::test]
    async fn batch_must_be_an_array() {
        let app = Router::new()
            .route(
                "/predict/batch",
                post(|Json(paths): Json<Vec<String>>| async move {
                    Json(serde_json::json!(paths
                        .iter()
                        .map(|p| serde_json::json!({"file_path": p, "predicted_tags": ["x"]}))
                        .collect::<Vec<_>>()))
                }),
            )
            .route(
                "/predict",
                post(|| async { Json(serde_json::json!({"not": "a prediction"})) }),
            );
        let client = tagger(serve(app).await);

        let out = client
            .predict_batch(&[Path::new("/a.png"), Path::new("/b.png")])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].file_path, "/b.png");

        assert!(client.predict(Path::new("/a.png")).await.is_err());
    }
}
