//! Core data models used throughout Phologix.
//!
//! These types represent the albums, pictures, and tags that flow through
//! the ingestion pipeline, plus the searchable projection pushed to the
//! external index.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// A registered root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    /// Root directory path; unique across albums.
    pub path: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Whether a live watcher should follow this directory.
    pub watch: bool,
}

/// Album fields supplied on registration.
#[derive(Debug, Clone)]
pub struct NewAlbum {
    pub path: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub watch: bool,
}

/// A tag name, unique and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Optional translated label shown instead of the raw name.
    pub translation: Option<String>,
}

/// Outcome of trying to create a tag row.
///
/// Concurrent workers may race to create the same tag name; the loser
/// gets [`TagInsert::AlreadyExists`] and re-reads the winner's row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagInsert {
    Created(Tag),
    AlreadyExists,
}

/// A persisted picture.
///
/// Unique by both `path` and `fingerprint`. The fingerprint never changes
/// once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub id: i64,
    pub path: String,
    pub fingerprint: String,
    pub width: u32,
    pub height: u32,
    pub thumbnail_path: Option<String>,
    pub description: Option<String>,
    /// Unix seconds of the last row modification.
    pub updated_at: i64,
    pub album_id: i64,
    pub tags: Vec<Tag>,
}

impl Picture {
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }
}

/// Picture fields supplied on insert. Tags must already be persisted.
#[derive(Debug, Clone)]
pub struct NewPicture {
    pub path: String,
    pub fingerprint: String,
    pub width: u32,
    pub height: u32,
    pub thumbnail_path: Option<String>,
    pub description: Option<String>,
    pub updated_at: i64,
    pub album_id: i64,
    pub tags: Vec<Tag>,
}

/// The searchable projection of a [`Picture`], keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub fingerprint: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<&Picture> for IndexDocument {
    fn from(picture: &Picture) -> Self {
        Self {
            fingerprint: picture.fingerprint.clone(),
            tags: picture.tag_names(),
            description: picture.description.clone(),
        }
    }
}

/// Result of a directory scan: pictures ingested and pictures that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_count: u64,
    pub error_count: u64,
}

impl Add for ScanSummary {
    type Output = ScanSummary;

    fn add(self, rhs: Self) -> Self::Output {
        ScanSummary {
            total_count: self.total_count + rhs.total_count,
            error_count: self.error_count + rhs.error_count,
        }
    }
}

impl AddAssign for ScanSummary {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_document_projects_tags_and_description() {
        let picture = Picture {
            id: 1,
            path: "/photos/a.png".into(),
            fingerprint: "ab12".into(),
            width: 10,
            height: 20,
            thumbnail_path: None,
            description: Some("sunset".into()),
            updated_at: 0,
            album_id: 1,
            tags: vec![
                Tag {
                    id: 1,
                    name: "sky".into(),
                    translation: None,
                },
                Tag {
                    id: 2,
                    name: "sea".into(),
                    translation: Some("mer".into()),
                },
            ],
        };

        let doc = IndexDocument::from(&picture);
        assert_eq!(doc.fingerprint, "ab12");
        assert_eq!(doc.tags, vec!["sky".to_string(), "sea".to_string()]);
        assert_eq!(doc.description.as_deref(), Some("sunset"));
    }

    #[test]
    fn summaries_add_up() {
        let mut total = ScanSummary {
            total_count: 2,
            error_count: 1,
        };
        total += ScanSummary {
            total_count: 3,
            error_count: 0,
        };
        assert_eq!(total.total_count, 5);
        assert_eq!(total.error_count, 1);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let json = serde_json::to_value(ScanSummary {
            total_count: 3,
            error_count: 0,
        })
        .unwrap();
        assert_eq!(json["totalCount"], 3);
        assert_eq!(json["errorCount"], 0);
    }
}
