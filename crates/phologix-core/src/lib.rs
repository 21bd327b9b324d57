//! # Phologix Core
//!
//! Shared, runtime-agnostic pieces of Phologix: the data model, the
//! repository contract consumed by the ingestion pipeline, the search index
//! contract, and the tagging service contract.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! backends (SQLite, Meilisearch, the tagging HTTP client) live in the
//! `phologix` crate; the in-memory implementations here back the tests.

pub mod index;
pub mod models;
pub mod store;
pub mod tagging;
