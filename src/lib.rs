//! # Phologix
//!
//! A local photo library engine: it discovers images under album roots,
//! deduplicates them by content, tags them through a local inference
//! service, renders WebP thumbnails, and keeps a hybrid keyword/semantic
//! search index in sync with a SQLite store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────────┐   ┌──────────┐
//! │ Scan/Watcher │──▶│ Ingestor                   │──▶│  SQLite  │
//! │ album roots  │   │ hash, tag, thumb, persist  │   │  store   │
//! └──────────────┘   └─────────────┬──────────────┘   └──────────┘
//!                                  │
//!                                  ▼
//!  ┌───────────────────┐     ┌──────────┐
//!  │ ProcessSupervisor │────▶│  index   │  (Meilisearch-compatible)
//!  │ tagger, index     │     │  tagger  │  (HTTP inference service)
//!  └───────────────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! phologix init                         # create database
//! phologix services &                   # install and start helpers
//! phologix album add ~/Pictures/2024    # register an album
//! phologix scan ~/Pictures/2024         # ingest it
//! phologix search "beach sunset" --semantic-ratio 0.5
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`hasher`] | Content fingerprints |
//! | [`thumbnail`] | Thumbnail rendering and dimension probing |
//! | [`tagger`] | HTTP client for the tagging service |
//! | [`meili`] | HTTP client for the search index |
//! | [`index_sync`] | Index document upkeep |
//! | [`ingest`] | Per-file ingestion pipeline |
//! | [`scan`] | Batched directory scans and the scan registry |
//! | [`watcher`] | Live album watching |
//! | [`library`] | Album and picture operations |
//! | [`supervisor`] | Helper process lifecycle |
//! | [`services`] | Installing and starting helper services |
//! | [`sqlite_store`] | SQLite-backed library store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod hasher;
pub mod index_sync;
pub mod ingest;
pub mod library;
pub mod meili;
pub mod migrate;
pub mod progress;
pub mod scan;
pub mod services;
pub mod sqlite_store;
pub mod supervisor;
pub mod tagger;
pub mod thumbnail;
pub mod watcher;

pub use error::{Error, Result};
