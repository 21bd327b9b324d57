//! Keeps the search index in step with persisted pictures.

use std::sync::Arc;

use phologix_core::index::{EmbedderSettings, SearchIndex};
use phologix_core::models::{IndexDocument, Picture};
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const SEARCHABLE_ATTRIBUTES: [&str; 2] = ["tags", "description"];
pub const MAX_TOTAL_HITS: u64 = 10_000;

#[derive(Clone)]
pub struct IndexSync {
    index: Arc<dyn SearchIndex>,
}

impl IndexSync {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Add or replace the picture's document.
    pub async fn push(&self, picture: &Picture) -> Result<()> {
        self.push_many(std::slice::from_ref(picture)).await
    }

    pub async fn push_many(&self, pictures: &[Picture]) -> Result<()> {
        let docs: Vec<IndexDocument> = pictures.iter().map(IndexDocument::from).collect();
        self.index.upsert_documents(&docs).await.map_err(Error::index)
    }

    pub async fn remove(&self, fingerprint: &str) -> Result<()> {
        self.index
            .delete_document(fingerprint)
            .await
            .map_err(Error::index)
    }

    pub async fn remove_many(&self, fingerprints: &[String]) -> Result<()> {
        self.index
            .delete_documents(fingerprints)
            .await
            .map_err(Error::index)
    }

    /// One-time index setup after the server comes up.
    ///
    /// Installs `embedder` unless a default embedder already exists, then
    /// sets the pagination cap and searchable attributes. A failed settings
    /// read counts as no embedder: a fresh server has no index yet and
    /// answers 404. Each step is attempted even if an earlier one failed;
    /// failures are logged.
    pub async fn configure(&self, embedder: &EmbedderSettings) {
        let existing = match self.index.embedder_settings().await {
            Ok(existing) => existing,
            Err(e) => {
                info!(error = %e, "index settings unreadable, assuming no embedder");
                None
            }
        };
        match existing {
            Some(existing) => info!(
                source = ?existing.source,
                model = %existing.model,
                "index already has a default embedder"
            ),
            None => match self.index.update_embedder_settings(embedder).await {
                Ok(()) => info!(model = %embedder.model, "installed default embedder"),
                Err(e) => warn!(error = %e, "failed to install default embedder"),
            },
        }

        if let Err(e) = self.index.update_max_total_hits(MAX_TOTAL_HITS).await {
            warn!(error = %e, "failed to set pagination limit");
        }

        if let Err(e) = self
            .index
            .update_searchable_attributes(&SEARCHABLE_ATTRIBUTES)
            .await
        {
            warn!(error = %e, "failed to set searchable attributes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use phologix_core::index::memory::InMemoryIndex;
    use phologix_core::index::{EmbedderSource, SearchHits, SearchRequest, SimilarRequest};

    /// An index whose settings endpoint 404s, like a server that has not
    /// created the index yet.
    struct MissingIndex(InMemoryIndex);

    #[async_trait]
    impl SearchIndex for MissingIndex {
        async fn upsert_documents(&self, docs: &[IndexDocument]) -> anyhow::Result<()> {
            self.0.upsert_documents(docs).await
        }
        async fn delete_document(&self, fingerprint: &str) -> anyhow::Result<()> {
            self.0.delete_document(fingerprint).await
        }
        async fn delete_documents(&self, fingerprints: &[String]) -> anyhow::Result<()> {
            self.0.delete_documents(fingerprints).await
        }
        async fn search(&self, request: &SearchRequest) -> anyhow::Result<SearchHits> {
            self.0.search(request).await
        }
        async fn similar(&self, request: &SimilarRequest) -> anyhow::Result<SearchHits> {
            self.0.similar(request).await
        }
        async fn embedder_settings(&self) -> anyhow::Result<Option<EmbedderSettings>> {
            bail!("404 Not Found: index_not_found")
        }
        async fn update_embedder_settings(
            &self,
            settings: &EmbedderSettings,
        ) -> anyhow::Result<()> {
            self.0.update_embedder_settings(settings).await
        }
        async fn update_searchable_attributes(&self, attributes: &[&str]) -> anyhow::Result<()> {
            self.0.update_searchable_attributes(attributes).await
        }
        async fn update_max_total_hits(&self, max_total_hits: u64) -> anyhow::Result<()> {
            self.0.update_max_total_hits(max_total_hits).await
        }
    }

    #[tokio::test]
    async fn configure_keeps_an_existing_embedder() {
        let index = Arc::new(InMemoryIndex::new());
        let custom = EmbedderSettings {
            source: EmbedderSource::OpenAi,
            model: "custom".into(),
            ..EmbedderSettings::default()
        };
        index.update_embedder_settings(&custom).await.unwrap();

        let sync = IndexSync::new(index.clone());
        sync.configure(&EmbedderSettings::default()).await;

        assert_eq!(index.embedder_settings().await.unwrap(), Some(custom));
        assert_eq!(index.max_total_hits(), Some(10_000));
        assert_eq!(
            index.searchable_attributes(),
            vec!["tags".to_string(), "description".to_string()]
        );
    }

    #[tokio::test]
    async fn configure_installs_default_when_missing() {
        let index = Arc::new(InMemoryIndex::new());
        IndexSync::new(index.clone())
            .configure(&EmbedderSettings::default())
            .await;
        assert_eq!(
            index.embedder_settings().await.unwrap(),
            Some(EmbedderSettings::default())
        );
    }

    #[tokio::test]
    async fn configure_installs_default_on_a_fresh_index() {
        let index = Arc::new(MissingIndex(InMemoryIndex::new()));
        IndexSync::new(index.clone())
            .configure(&EmbedderSettings::default())
            .await;

        assert_eq!(
            index.0.embedder_settings().await.unwrap(),
            Some(EmbedderSettings::default())
        );
        assert_eq!(index.0.max_total_hits(), Some(10_000));
    }
}
