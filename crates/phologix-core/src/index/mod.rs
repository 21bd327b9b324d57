//! Search index abstraction.
//!
//! [`SearchIndex`] is the contract Phologix consumes from the external
//! full-text/vector index: add or replace documents, delete them, run text,
//! hybrid and similarity queries, and configure the embedder. Documents are
//! the [`IndexDocument`] projection of a picture, keyed by fingerprint.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::IndexDocument;

/// A text or hybrid query.
///
/// `semantic_ratio == 0.0` means pure keyword search; anything above mixes
/// in vector similarity from the default embedder.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub hits_per_page: u32,
    /// 1-based page number.
    pub page: u32,
    pub semantic_ratio: f32,
    pub ranking_score_threshold: Option<f64>,
}

/// Documents similar to an already-indexed one.
#[derive(Debug, Clone)]
pub struct SimilarRequest {
    pub fingerprint: String,
    pub limit: u32,
    pub offset: u32,
    pub ranking_score_threshold: Option<f64>,
}

/// Matching fingerprints in rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub fingerprints: Vec<String>,
    pub total_hits: u64,
    pub processing_time_ms: u64,
}

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmbedderSource {
    Ollama,
    /// Any OpenAI-compatible REST endpoint.
    OpenAi,
}

/// User-facing embedder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedderSettings {
    pub source: EmbedderSource,
    pub url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub dimensions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_template_max_bytes: Option<u32>,
}

pub const DEFAULT_DOCUMENT_TEMPLATE: &str = "A picture with tags {{doc.tags}} {% if doc.description %} and description {{doc.description}} {% endif %}";

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            source: EmbedderSource::Ollama,
            url: "http://localhost:11434/api/embed".to_string(),
            model: "bge-m3".to_string(),
            api_key: None,
            dimensions: 1024,
            document_template: Some(DEFAULT_DOCUMENT_TEMPLATE.to_string()),
            document_template_max_bytes: Some(2000),
        }
    }
}

/// Abstract search index backend.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add documents, replacing any with the same fingerprint.
    async fn upsert_documents(&self, docs: &[IndexDocument]) -> Result<()>;

    /// Delete one document. Deleting an absent key is not an error.
    async fn delete_document(&self, fingerprint: &str) -> Result<()>;

    /// Delete a batch of documents in one request.
    async fn delete_documents(&self, fingerprints: &[String]) -> Result<()>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits>;

    async fn similar(&self, request: &SimilarRequest) -> Result<SearchHits>;

    /// The default embedder, if one is configured.
    async fn embedder_settings(&self) -> Result<Option<EmbedderSettings>>;

    async fn update_embedder_settings(&self, settings: &EmbedderSettings) -> Result<()>;

    async fn update_searchable_attributes(&self, attributes: &[&str]) -> Result<()>;

    async fn update_max_total_hits(&self, max_total_hits: u64) -> Result<()>;
}
