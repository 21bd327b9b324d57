//! Meilisearch-compatible [`SearchIndex`] over HTTP.
//!
//! All documents live in one index (uid `phologix`, primary key
//! `fingerprint`). Writes are fire-and-forget: the server enqueues a task and
//! answers `202`, and this client does not poll the task queue.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use phologix_core::index::{
    EmbedderSettings, EmbedderSource, SearchHits, SearchIndex, SearchRequest, SimilarRequest,
};
use phologix_core::models::IndexDocument;

use crate::config::IndexConfig;

pub const INDEX_UID: &str = "phologix";
pub const PRIMARY_KEY: &str = "fingerprint";
const EMBEDDER: &str = "default";

pub struct MeiliIndex {
    client: reqwest::Client,
    base_url: String,
    uid: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HitsResponse {
    hits: Vec<Hit>,
    #[serde(default)]
    total_hits: Option<u64>,
    #[serde(default)]
    estimated_total_hits: Option<u64>,
    #[serde(default)]
    processing_time_ms: u64,
}

#[derive(Deserialize)]
struct Hit {
    fingerprint: String,
}

impl From<HitsResponse> for SearchHits {
    fn from(resp: HitsResponse) -> Self {
        let total_hits = resp
            .total_hits
            .or(resp.estimated_total_hits)
            .unwrap_or(resp.hits.len() as u64);
        SearchHits {
            fingerprints: resp.hits.into_iter().map(|h| h.fingerprint).collect(),
            total_hits,
            processing_time_ms: resp.processing_time_ms,
        }
    }
}

impl MeiliIndex {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            uid: INDEX_UID.to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Self::new(
            config.base_url(),
            config.api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn url(&self, route: &str) -> String {
        format!("{}/indexes/{}{}", self.base_url, self.uid, route)
    }

    async fn send(
        &self,
        method: Method,
        route: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = self.url(route);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req
            .send()
            .await
            .with_context(|| format!("{method} {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("index returned {} for {} {}: {}", status, method, route, body_text);
        }
        Ok(response)
    }

    async fn query(&self, route: &str, body: &Value) -> Result<SearchHits> {
        let response = self.send(Method::POST, route, Some(body)).await?;
        let parsed: HitsResponse = response
            .json()
            .await
            .with_context(|| format!("malformed index response from {route}"))?;
        Ok(parsed.into())
    }
}

/// Map user-facing settings onto the index's embedder schema. `openAi`
/// becomes a generic `rest` embedder with OpenAI request/response templates.
pub fn embedder_to_index(settings: &EmbedderSettings) -> Value {
    let mut value = match settings.source {
        EmbedderSource::OpenAi => json!({
            "source": "rest",
            "url": settings.url,
            "request": {
                "input": ["{{text}}", "{{..}}"],
                "model": settings.model,
            },
            "response": {
                "data": [{ "embedding": "{{embedding}}" }, "{{..}}"],
            },
            "dimensions": settings.dimensions,
        }),
        EmbedderSource::Ollama => json!({
            "source": "ollama",
            "url": settings.url,
            "model": settings.model,
            "dimensions": settings.dimensions,
        }),
    };
    if let Some(obj) = value.as_object_mut() {
        if let Some(key) = &settings.api_key {
            obj.insert("apiKey".into(), json!(key));
        }
        if let Some(template) = &settings.document_template {
            obj.insert("documentTemplate".into(), json!(template));
        }
        if let Some(max) = settings.document_template_max_bytes {
            obj.insert("documentTemplateMaxBytes".into(), json!(max));
        }
    }
    value
}

/// Inverse of [`embedder_to_index`]. Returns `None` for embedder sources
/// this library does not manage.
pub fn embedder_from_index(value: &Value) -> Option<EmbedderSettings> {
    let source = match value.get("source")?.as_str()? {
        "rest" => EmbedderSource::OpenAi,
        "ollama" => EmbedderSource::Ollama,
        _ => return None,
    };
    let model = match source {
        EmbedderSource::OpenAi => value.pointer("/request/model"),
        EmbedderSource::Ollama => value.get("model"),
    }
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();

    Some(EmbedderSettings {
        source,
        url: value
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        model,
        api_key: value.get("apiKey").and_then(Value::as_str).map(String::from),
        dimensions: value
            .get("dimensions")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        document_template: value
            .get("documentTemplate")
            .and_then(Value::as_str)
            .map(String::from),
        document_template_max_bytes: value
            .get("documentTemplateMaxBytes")
            .and_then(Value::as_u64)
            .map(|n| n as u32),
    })
}

#[async_trait]
impl SearchIndex for MeiliIndex {
    async fn upsert_documents(&self, docs: &[IndexDocument]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(docs)?;
        let route = format!("/documents?primaryKey={PRIMARY_KEY}");
        self.send(Method::POST, &route, Some(&body)).await?;
        Ok(())
    }

    async fn delete_document(&self, fingerprint: &str) -> Result<()> {
        self.send(Method::DELETE, &format!("/documents/{fingerprint}"), None)
            .await?;
        Ok(())
    }

    async fn delete_documents(&self, fingerprints: &[String]) -> Result<()> {
        if fingerprints.is_empty() {
            return Ok(());
        }
        self.send(
            Method::POST,
            "/documents/delete-batch",
            Some(&json!(fingerprints)),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits> {
        let mut body = json!({
            "q": request.query,
            "hitsPerPage": request.hits_per_page,
            "page": request.page,
            "attributesToRetrieve": [PRIMARY_KEY],
        });
        if request.semantic_ratio > 0.0 {
            body["hybrid"] = json!({
                "embedder": EMBEDDER,
                "semanticRatio": request.semantic_ratio,
            });
        }
        if let Some(threshold) = request.ranking_score_threshold {
            body["rankingScoreThreshold"] = json!(threshold);
        }
        self.query("/search", &body).await
    }

    async fn similar(&self, request: &SimilarRequest) -> Result<SearchHits> {
        let mut body = json!({
            "id": request.fingerprint,
            "limit": request.limit,
            "offset": request.offset,
            "embedder": EMBEDDER,
            "attributesToRetrieve": [PRIMARY_KEY],
        });
        if let Some(threshold) = request.ranking_score_threshold {
            body["rankingScoreThreshold"] = json!(threshold);
        }
        self.query("/similar", &body).await
    }

    async fn embedder_settings(&self) -> Result<Option<EmbedderSettings>> {
        let response = self.send(Method::GET, "/settings", None).await?;
        let settings: Value = response.json().await?;
        Ok(settings
            .pointer("/embedders/default")
            .and_then(embedder_from_index))
    }

    async fn update_embedder_settings(&self, settings: &EmbedderSettings) -> Result<()> {
        let body = json!({ "embedders": { "default": embedder_to_index(settings) } });
        self.send(Method::PATCH, "/settings", Some(&body)).await?;
        Ok(())
    }

    async fn update_searchable_attributes(&self, attributes: &[&str]) -> Result<()> {
        self.send(
            Method::PUT,
            "/settings/searchable-attributes",
            Some(&json!(attributes)),
        )
        .await?;
        Ok(())
    }

    async fn update_max_total_hits(&self, max_total_hits: u64) -> Result<()> {
        self.send(
            Method::PATCH,
            "/settings/pagination",
            Some(&json!({ "maxTotalHits": max_total_hits })),
        )
        .await?;
        Ok(())
    }
}
