//! In-memory [`SearchIndex`] for tests.
//!
//! Keyword search is a case-insensitive substring match over tags and
//! description. Similarity ranks other documents by shared tag count; the
//! semantic ratio is ignored.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::IndexDocument;

use super::{EmbedderSettings, SearchHits, SearchIndex, SearchRequest, SimilarRequest};

#[derive(Default)]
struct State {
    docs: BTreeMap<String, IndexDocument>,
    embedder: Option<EmbedderSettings>,
    searchable: Vec<String>,
    max_total_hits: Option<u64>,
}

pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, fingerprint: &str) -> Option<IndexDocument> {
        self.state.read().unwrap().docs.get(fingerprint).cloned()
    }

    pub fn searchable_attributes(&self) -> Vec<String> {
        self.state.read().unwrap().searchable.clone()
    }

    pub fn max_total_hits(&self) -> Option<u64> {
        self.state.read().unwrap().max_total_hits
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn page(matches: Vec<String>, offset: usize, limit: usize) -> SearchHits {
    let total_hits = matches.len() as u64;
    let fingerprints = matches.into_iter().skip(offset).take(limit).collect();
    SearchHits {
        fingerprints,
        total_hits,
        processing_time_ms: 0,
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert_documents(&self, docs: &[IndexDocument]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for doc in docs {
            state.docs.insert(doc.fingerprint.clone(), doc.clone());
        }
        Ok(())
    }

    async fn delete_document(&self, fingerprint: &str) -> Result<()> {
        self.state.write().unwrap().docs.remove(fingerprint);
        Ok(())
    }

    async fn delete_documents(&self, fingerprints: &[String]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for fp in fingerprints {
            state.docs.remove(fp);
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits> {
        let needle = request.query.to_lowercase();
        let state = self.state.read().unwrap();
        let matches: Vec<String> = state
            .docs
            .values()
            .filter(|doc| {
                doc.tags.iter().any(|t| t.to_lowercase().contains(&needle))
                    || doc
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .map(|doc| doc.fingerprint.clone())
            .collect();
        let per_page = request.hits_per_page.max(1) as usize;
        let offset = (request.page.max(1) as usize - 1) * per_page;
        Ok(page(matches, offset, per_page))
    }

    async fn similar(&self, request: &SimilarRequest) -> Result<SearchHits> {
        let state = self.state.read().unwrap();
        let Some(target) = state.docs.get(&request.fingerprint) else {
            bail!("document `{}` not found", request.fingerprint);
        };
        let mut scored: Vec<(usize, &String)> = state
            .docs
            .values()
            .filter(|doc| doc.fingerprint != target.fingerprint)
            .map(|doc| {
                let shared = doc.tags.iter().filter(|t| target.tags.contains(t)).count();
                (shared, &doc.fingerprint)
            })
            .filter(|(shared, _)| *shared > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        let matches = scored.into_iter().map(|(_, fp)| fp.clone()).collect();
        Ok(page(
            matches,
            request.offset as usize,
            request.limit as usize,
        ))
    }

    async fn embedder_settings(&self) -> Result<Option<EmbedderSettings>> {
        Ok(self.state.read().unwrap().embedder.clone())
    }

    async fn update_embedder_settings(&self, settings: &EmbedderSettings) -> Result<()> {
        self.state.write().unwrap().embedder = Some(settings.clone());
        Ok(())
    }

    async fn update_searchable_attributes(&self, attributes: &[&str]) -> Result<()> {
        self.state.write().unwrap().searchable = attributes.iter().map(|a| a.to_string()).collect();
        Ok(())
    }

    async fn update_max_total_hits(&self, max_total_hits: u64) -> Result<()> {
        self.state.write().unwrap().max_total_hits = Some(max_total_hits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(fp: &str, tags: &[&str]) -> IndexDocument {
        IndexDocument {
            fingerprint: fp.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            description: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_fingerprint() {
        let index = InMemoryIndex::new();
        index.upsert_documents(&[doc("a", &["cat"])]).await.unwrap();
        index.upsert_documents(&[doc("a", &["dog"])]).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap().tags, vec!["dog".to_string()]);
    }

    #[tokio::test]
    async fn similar_ranks_by_shared_tags() {
        let index = InMemoryIndex::new();
        index
            .upsert_documents(&[
                doc("a", &["cat", "sofa", "window"]),
                doc("b", &["cat", "sofa"]),
                doc("c", &["cat"]),
                doc("d", &["car"]),
            ])
            .await
            .unwrap();

        let hits = index
            .similar(&SimilarRequest {
                fingerprint: "a".into(),
                limit: 10,
                offset: 0,
                ranking_score_threshold: None,
            })
            .await
            .unwrap();
        assert_eq!(hits.fingerprints, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(hits.total_hits, 2);
    }
}
