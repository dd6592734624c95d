//! Tintuc - a news aggregation backend
//!
//! Periodically scrapes RSS feeds into SQLite, one category per feed, and
//! serves the stored articles and categories over a JSON API.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod routes;
pub mod scheduler;
pub mod slug;
